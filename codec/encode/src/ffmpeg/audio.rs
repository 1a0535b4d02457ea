/*!
    Slot-fed audio encoder.
*/

use std::time::Duration;

use ffmpeg_next::{
    ChannelLayout as FFmpegChannelLayout,
    codec::{self, encoder::Audio as AudioEncoderFFmpeg},
    ffi,
    format::{Sample, sample::Type},
    util::frame::audio::Audio as AudioFrameFFmpeg,
};
use parking_lot::Mutex;
use tracing::debug;

use codec_types::{
    AudioFormat, BufferFlags, BufferInfo, CodecError, MediaKind, OutputFormat, OutputStatus,
    Result,
};

use super::{AUDIO_INPUT_SLOTS, codec_id_for_mime, extradata, ffmpeg_error};
use crate::aac;
use crate::config::AudioEncoderConfig;
use crate::encoder::MediaEncoder;
use crate::queue::{DEFAULT_OUTPUT_CAPACITY, EncodedPacket, InputSlots, OutputQueue};

/// Samples per frame when the codec accepts any size.
const FALLBACK_FRAME_SIZE: usize = 1024;

struct AudioState {
    encoder: AudioEncoderFFmpeg,
    /// De-interleaved samples waiting for a full codec frame.
    pending: Vec<Vec<f32>>,
    /// Presentation time of the first pending sample.
    pending_pts_us: i64,
    started: bool,
    released: bool,
}

// The codec context is only touched with the state mutex held.
unsafe impl Send for AudioState {}

/**
    AAC encoder fed with interleaved signed 16-bit PCM through input slots.

    Chunks of any size are accepted; samples are buffered until a full codec
    frame is available, and frame timestamps are derived from the timestamp
    of the chunk that started the frame.
*/
pub struct FfmpegAudioEncoder {
    name: String,
    format: AudioFormat,
    max_input_size: usize,
    frame_size: usize,
    layout: FFmpegChannelLayout,
    state: Mutex<AudioState>,
    slots: InputSlots,
    output: OutputQueue,
}

impl FfmpegAudioEncoder {
    pub fn new(config: &AudioEncoderConfig) -> Result<Self> {
        let format = config.format;
        if format.bits_per_sample != 16 {
            return Err(CodecError::unsupported_format(format!(
                "{}-bit PCM input",
                format.bits_per_sample
            )));
        }
        let layout = match format.channels {
            1 => FFmpegChannelLayout::MONO,
            2 => FFmpegChannelLayout::STEREO,
            n => {
                return Err(CodecError::unsupported_format(format!("{n} channel input")));
            }
        };

        let codec_id = codec_id_for_mime(&config.mime)?;
        let codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            CodecError::unsupported_format(format!("codec {} not found", config.mime))
        })?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(ffmpeg_error)?;

        encoder.set_format(Sample::F32(Type::Planar));
        encoder.set_rate(format.sample_rate as i32);
        encoder.set_channel_layout(layout);
        encoder.set_time_base(ffmpeg_next::Rational::new(1, format.sample_rate as i32));
        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_flags(codec::flag::Flags::GLOBAL_HEADER);

        let encoder = encoder
            .open()
            .map_err(|e| CodecError::codec(format!("failed to open encoder: {e}")))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => FALLBACK_FRAME_SIZE,
            n => n,
        };

        // SAFETY: the encoder was just opened and is alive.
        let csd = unsafe { extradata(encoder.as_ptr()) }
            .or_else(|| {
                aac::audio_specific_config(format.sample_rate, format.channels)
                    .map(|asc| asc.to_vec())
            })
            .map(|asc| vec![asc])
            .unwrap_or_default();

        let output = OutputQueue::new(DEFAULT_OUTPUT_CAPACITY);
        output.set_format(OutputFormat::new(config.mime.clone(), csd));

        debug!(
            "audio encoder {} {}Hz x{} frame_size={frame_size}",
            codec.name(),
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            name: format!("ffmpeg-{}", codec.name()),
            format,
            max_input_size: config.max_input_size,
            frame_size,
            layout,
            state: Mutex::new(AudioState {
                encoder,
                pending: vec![Vec::new(); format.channels as usize],
                pending_pts_us: 0,
                started: false,
                released: false,
            }),
            slots: InputSlots::new(AUDIO_INPUT_SLOTS),
            output,
        })
    }

    fn samples_to_us(&self, samples: usize) -> i64 {
        (samples as u64 * 1_000_000 / self.format.sample_rate as u64) as i64
    }

    fn encode_chunk(&self, state: &mut AudioState, data: &[u8], pts_us: i64) -> Result<()> {
        if state.pending[0].is_empty() {
            state.pending_pts_us = pts_us;
        }

        let channels = self.format.channels as usize;
        for (i, bytes) in data.chunks_exact(2).enumerate() {
            let sample = i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0;
            state.pending[i % channels].push(sample);
        }

        while state.pending[0].len() >= self.frame_size {
            let mut frame = AudioFrameFFmpeg::new(
                Sample::F32(Type::Planar),
                self.frame_size,
                self.layout,
            );
            frame.set_rate(self.format.sample_rate);
            frame.set_pts(Some(
                state.pending_pts_us * self.format.sample_rate as i64 / 1_000_000,
            ));
            for (ch, pending) in state.pending.iter_mut().enumerate() {
                frame
                    .plane_mut::<f32>(ch)
                    .copy_from_slice(&pending[..self.frame_size]);
                pending.drain(..self.frame_size);
            }
            state.pending_pts_us += self.samples_to_us(self.frame_size);

            state.encoder.send_frame(&frame).map_err(ffmpeg_error)?;
            self.receive_packets(&mut state.encoder)?;
        }
        Ok(())
    }

    fn receive_packets(&self, encoder: &mut AudioEncoderFFmpeg) -> Result<()> {
        let mut packet = ffmpeg_next::Packet::empty();
        loop {
            match encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
                    let pts = packet.pts().unwrap_or_default();
                    self.output.push(EncodedPacket {
                        data,
                        presentation_time_us: pts * 1_000_000 / self.format.sample_rate as i64,
                        flags: BufferFlags::NONE,
                    });
                }
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::AVERROR(ffi::EAGAIN) => {
                    return Ok(());
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(e) => return Err(ffmpeg_error(e)),
            }
        }
    }
}

impl MediaEncoder for FfmpegAudioEncoder {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        state.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&self, timeout: Duration) -> Result<Option<usize>> {
        if self.state.lock().released {
            return Err(CodecError::Released);
        }
        Ok(self.slots.acquire(timeout))
    }

    fn queue_input_buffer(
        &self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        _flags: BufferFlags,
    ) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            if state.released {
                return Err(CodecError::Released);
            }
            if !state.started {
                Err(CodecError::invalid_state("encoder is not started"))
            } else if data.len() > self.max_input_size {
                Err(CodecError::invalid_data(format!(
                    "input chunk of {} bytes exceeds max input size {}",
                    data.len(),
                    self.max_input_size
                )))
            } else {
                self.output
                    .wait_for_space(Duration::ZERO)
                    .and_then(|()| self.encode_chunk(&mut state, data, presentation_time_us))
            }
        };
        self.slots.release(index)?;
        result
    }

    fn dequeue_output_buffer(&self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus> {
        self.output.dequeue(info, timeout)
    }

    fn read_output_buffer(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.output.read(index, dst)
    }

    fn release_output_buffer(&self, index: usize) -> Result<()> {
        self.output.release(index)
    }

    fn output_format(&self) -> Result<OutputFormat> {
        self.output
            .format()
            .ok_or_else(|| CodecError::invalid_state("output format not yet known"))
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        state.started = false;
        state.encoder.send_eof().map_err(ffmpeg_error)?;
        self.receive_packets(&mut state.encoder)
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.released = true;
            state.pending.iter_mut().for_each(Vec::clear);
        }
        self.slots.close();
        self.output.close();
    }
}
