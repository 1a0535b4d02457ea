/*!
    Per-track state shared between the drain loops, the audio feed and the
    facade.

    Each mutable field has exactly one writer: the configuration blobs and
    the elapsed time belong to the video drain loop, the started flag to the
    audio drain loop, and the audio clock to the feed half.
*/

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use codec_encode::{AudioFormat, BufferFlags, CodecError, MediaEncoder};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

/**
    Out-of-band codec parameters, extracted once per session.

    For H.264 these are the SPS (`csd0`) and PPS (`csd1`) with Annex-B start
    codes; codecs with a single blob leave `csd1` empty.
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigurationBlobs {
    pub csd0: Vec<u8>,
    pub csd1: Vec<u8>,
}

pub(crate) struct VideoTrack {
    encoder: Arc<dyn MediaEncoder>,
    blobs: OnceLock<ConfigurationBlobs>,
    encode_time_ms: AtomicI64,
}

impl VideoTrack {
    pub fn new(encoder: Arc<dyn MediaEncoder>) -> Self {
        Self {
            encoder,
            blobs: OnceLock::new(),
            encode_time_ms: AtomicI64::new(0),
        }
    }

    pub fn encoder(&self) -> &Arc<dyn MediaEncoder> {
        &self.encoder
    }

    /// Returns false if blobs were already stored; the first set is kept.
    pub fn store_blobs(&self, blobs: ConfigurationBlobs) -> bool {
        self.blobs.set(blobs).is_ok()
    }

    pub fn blobs(&self) -> Option<&ConfigurationBlobs> {
        self.blobs.get()
    }

    pub fn publish_encode_time(&self, millis: i64) {
        self.encode_time_ms.fetch_max(millis, Ordering::AcqRel);
    }

    pub fn encode_time_ms(&self) -> i64 {
        self.encode_time_ms.load(Ordering::Acquire)
    }
}

/**
    What became of one PCM chunk handed to the feed half.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FeedOutcome {
    /// Submitted with this presentation time.
    Queued(i64),
    /// No input slot within the bounded wait, or no room in the output.
    Dropped,
    /// Encoder not started yet or empty payload.
    Skipped,
    /// The encoder refused the chunk.
    Failed,
}

pub(crate) struct AudioTrack {
    encoder: Arc<dyn MediaEncoder>,
    format: AudioFormat,
    input_timeout: Duration,
    started: AtomicBool,
    /// Serializes feeders across slot acquisition and submission.
    feed_lock: Mutex<()>,
    /// Written only by the feeder holding `feed_lock`.
    clock_us: AtomicI64,
    dropped: AtomicU64,
}

impl AudioTrack {
    pub fn new(encoder: Arc<dyn MediaEncoder>, format: AudioFormat, input_timeout: Duration) -> Self {
        Self {
            encoder,
            format,
            input_timeout,
            started: AtomicBool::new(false),
            feed_lock: Mutex::new(()),
            clock_us: AtomicI64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn encoder(&self) -> &Arc<dyn MediaEncoder> {
        &self.encoder
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Set by the audio drain loop once the encoder accepted `start`.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Cumulative presentation time of everything submitted so far.
    pub fn clock_us(&self) -> i64 {
        self.clock_us.load(Ordering::Acquire)
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /**
        Submit one PCM chunk to the encoder.

        Feeders are serialized across slot acquisition and submission so
        that they submit in timestamp order. The clock only advances when the
        encoder accepts the chunk; readers never wait on a feeder.
    */
    pub fn feed(&self, pcm: &[u8]) -> FeedOutcome {
        if pcm.is_empty() || !self.is_started() {
            return FeedOutcome::Skipped;
        }

        let _feeder = self.feed_lock.lock();
        let index = match self.encoder.dequeue_input_buffer(self.input_timeout) {
            Ok(Some(index)) => index,
            Ok(None) => {
                self.note_drop(pcm.len(), "no input slot free");
                return FeedOutcome::Dropped;
            }
            Err(e) => {
                error!("audio input dequeue failed: {e}");
                return FeedOutcome::Failed;
            }
        };

        let pts = self.clock_us.load(Ordering::Acquire) + self.format.duration_us(pcm.len());
        match self.encoder.queue_input_buffer(index, pcm, pts, BufferFlags::NONE) {
            Ok(()) => {
                self.clock_us.store(pts, Ordering::Release);
                FeedOutcome::Queued(pts)
            }
            Err(CodecError::OutputFull(_)) => {
                self.note_drop(pcm.len(), "encoder output backed up");
                FeedOutcome::Dropped
            }
            Err(e) => {
                error!("audio input rejected: {e}");
                FeedOutcome::Failed
            }
        }
    }

    fn note_drop(&self, len: usize, reason: &str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed);
        if dropped == 0 {
            warn!("dropping audio chunk: {reason}");
        } else {
            debug!("dropping audio chunk of {len} bytes, {reason} ({} dropped)", dropped + 1);
        }
    }
}
