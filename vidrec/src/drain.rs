/*!
    Video and audio drain loops.

    One loop per track, each on its own thread. The loop starts the encoder,
    then polls its output queue until asked to exit, normalizing timestamps
    against the first unit it sees and handing every unit to the sink.
*/

use std::sync::Arc;
use std::time::Duration;

use codec_encode::{BufferInfo, CodecError, MediaEncoder, MediaKind, OutputStatus};
use tracing::{debug, info, info_span, warn};

use crate::error::RecorderError;
use crate::sink::{self, EncodedUnit, SinkSlot};
use crate::track::{AudioTrack, ConfigurationBlobs, VideoTrack};
use crate::worker::{ExitGuard, WorkerControl};

/// Bytes of each configuration blob shown in debug logs.
const BLOB_PREVIEW_BYTES: usize = 20;

pub(crate) enum DrainTrack {
    Video(Arc<VideoTrack>),
    Audio(Arc<AudioTrack>),
}

impl DrainTrack {
    fn kind(&self) -> MediaKind {
        match self {
            DrainTrack::Video(_) => MediaKind::Video,
            DrainTrack::Audio(_) => MediaKind::Audio,
        }
    }

    fn encoder(&self) -> &Arc<dyn MediaEncoder> {
        match self {
            DrainTrack::Video(track) => track.encoder(),
            DrainTrack::Audio(track) => track.encoder(),
        }
    }
}

pub(crate) struct DrainLoop {
    track: DrainTrack,
    control: Arc<WorkerControl>,
    sink: SinkSlot,
    poll_timeout: Duration,
    info: BufferInfo,
    scratch: Vec<u8>,
    zero_pts: Option<i64>,
}

impl DrainLoop {
    pub fn new(
        track: DrainTrack,
        control: Arc<WorkerControl>,
        sink: SinkSlot,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            track,
            control,
            sink,
            poll_timeout,
            info: BufferInfo::default(),
            scratch: Vec::new(),
            zero_pts: None,
        }
    }

    /**
        Thread body. Faults outside shutdown are reported to the sink; faults
        during shutdown are logged and dropped.
    */
    pub fn run(mut self, tag: &str) {
        let _exit = ExitGuard::new(Arc::clone(&self.control));
        let kind = self.track.kind();
        let span = info_span!("drain", tag, %kind);
        let _enter = span.enter();

        let encoder = Arc::clone(self.track.encoder());
        info!("starting {} encoder {}", kind, encoder.name());
        if let Err(e) = encoder.start() {
            sink::report(&self.sink, RecorderError::Drain { kind, source: e });
            return;
        }
        if let DrainTrack::Audio(track) = &self.track {
            track.mark_started();
        }

        match self.pump(encoder.as_ref()) {
            Ok(()) => info!("{kind} drain loop finished"),
            Err(e) if self.control.should_exit() => {
                warn!("{kind} drain stopped with error during shutdown: {e}");
            }
            Err(e) => sink::report(&self.sink, RecorderError::Drain { kind, source: e }),
        }
    }

    fn pump(&mut self, encoder: &dyn MediaEncoder) -> Result<(), CodecError> {
        while !self.control.should_exit() {
            match encoder.dequeue_output_buffer(&mut self.info, self.poll_timeout)? {
                OutputStatus::TryAgainLater => {
                    if self.poll_timeout.is_zero() {
                        std::thread::yield_now();
                    }
                }
                OutputStatus::FormatChanged => self.on_format_changed(encoder)?,
                OutputStatus::Buffer(index) => self.forward(encoder, index)?,
            }
        }
        Ok(())
    }

    fn on_format_changed(&mut self, encoder: &dyn MediaEncoder) -> Result<(), CodecError> {
        let DrainTrack::Video(track) = &self.track else {
            debug!("audio output format changed, ignoring");
            return Ok(());
        };

        let format = encoder.output_format()?;
        let blobs = ConfigurationBlobs {
            csd0: format.csd(0).map(<[u8]>::to_vec).unwrap_or_default(),
            csd1: format.csd(1).map(<[u8]>::to_vec).unwrap_or_default(),
        };
        debug!(
            "{} csd0 ({} bytes): {}",
            format.mime,
            blobs.csd0.len(),
            hex_preview(&blobs.csd0)
        );
        debug!(
            "{} csd1 ({} bytes): {}",
            format.mime,
            blobs.csd1.len(),
            hex_preview(&blobs.csd1)
        );
        if !track.store_blobs(blobs) {
            warn!("video format changed again, keeping the first parameter sets");
        }
        Ok(())
    }

    fn forward(&mut self, encoder: &dyn MediaEncoder, index: usize) -> Result<(), CodecError> {
        let size = self.info.size;
        if self.scratch.len() < size {
            self.scratch.resize(size, 0);
        }
        encoder.read_output_buffer(index, &mut self.scratch[..size])?;

        let pts = self.info.presentation_time_us;
        let is_codec_config = self.info.is_codec_config();
        let relative_us = if is_codec_config {
            self.zero_pts.map_or(0, |zero| pts - zero)
        } else {
            pts - *self.zero_pts.get_or_insert(pts)
        };

        let kind = self.track.kind();
        if let DrainTrack::Video(track) = &self.track {
            if !is_codec_config {
                track.publish_encode_time(relative_us / 1000);
            }
        }

        if let Some(sink) = sink::current(&self.sink) {
            let unit = EncodedUnit {
                kind,
                data: &self.scratch[..size],
                is_keyframe: kind == MediaKind::Video && self.info.is_keyframe(),
                is_codec_config,
                presentation_time_us: relative_us,
            };
            match kind {
                MediaKind::Video => sink.on_video_data(unit),
                MediaKind::Audio => sink.on_audio_data(unit),
            }
        }

        encoder.release_output_buffer(index)
    }
}

fn hex_preview(blob: &[u8]) -> String {
    hex::encode(&blob[..blob.len().min(BLOB_PREVIEW_BYTES)])
}
