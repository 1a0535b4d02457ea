/*!
    Software encoders through `ffmpeg-next`.

    Both encoders are opened at creation time with global headers, so their
    parameter sets are known before the first unit and announced through the
    usual [`OutputStatus::FormatChanged`](codec_types::OutputStatus).
    Encoding happens synchronously on the feeding thread; the resulting
    packets wait in an [`OutputQueue`](crate::OutputQueue) for the drain loop.
*/

use std::sync::{Arc, Once};

use ffmpeg_next::codec::Id as CodecIdFFmpeg;

use codec_types::{CodecError, Result, mime};

use crate::config::{AudioEncoderConfig, VideoEncoderConfig};
use crate::encoder::{EncoderFactory, MediaEncoder};

mod audio;
mod video;

pub use audio::FfmpegAudioEncoder;
pub use video::FfmpegVideoEncoder;

/// x264 preset used when none is configured.
pub const DEFAULT_PRESET: &str = "veryfast";

/// Input slots offered by the audio encoder.
const AUDIO_INPUT_SLOTS: usize = 4;

/**
    Creates ffmpeg-backed encoders.
*/
#[derive(Clone, Debug)]
pub struct FfmpegFactory {
    preset: String,
}

impl FfmpegFactory {
    pub fn new() -> Self {
        Self {
            preset: DEFAULT_PRESET.to_string(),
        }
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }
}

impl Default for FfmpegFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for FfmpegFactory {
    fn create_video_encoder(&self, config: &VideoEncoderConfig) -> Result<Arc<dyn MediaEncoder>> {
        init()?;
        Ok(Arc::new(FfmpegVideoEncoder::new(config, &self.preset)?))
    }

    fn create_audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Arc<dyn MediaEncoder>> {
        init()?;
        Ok(Arc::new(FfmpegAudioEncoder::new(config)?))
    }
}

fn init() -> Result<()> {
    static INIT: Once = Once::new();
    let mut result = Ok(());
    INIT.call_once(|| {
        result = ffmpeg_next::init().map_err(ffmpeg_error);
    });
    result
}

fn ffmpeg_error(e: ffmpeg_next::Error) -> CodecError {
    CodecError::codec(e.to_string())
}

fn codec_id_for_mime(name: &str) -> Result<CodecIdFFmpeg> {
    match name {
        mime::VIDEO_AVC => Ok(CodecIdFFmpeg::H264),
        mime::VIDEO_HEVC => Ok(CodecIdFFmpeg::HEVC),
        mime::AUDIO_AAC => Ok(CodecIdFFmpeg::AAC),
        other => Err(CodecError::unsupported_format(format!(
            "no ffmpeg encoder for {other}"
        ))),
    }
}

/**
    Copy the codec context's extradata, if the encoder produced any.

    # Safety

    `ctx` must point to an opened codec context that outlives this call.
*/
unsafe fn extradata(ctx: *const ffmpeg_next::ffi::AVCodecContext) -> Option<Vec<u8>> {
    // SAFETY: extradata is owned by the context and sized by extradata_size.
    unsafe {
        if ctx.is_null() || (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
            return None;
        }
        let slice = std::slice::from_raw_parts((*ctx).extradata, (*ctx).extradata_size as usize);
        Some(slice.to_vec())
    }
}
