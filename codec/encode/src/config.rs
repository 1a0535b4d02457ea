/*!
    Encoder configuration types.
*/

use codec_types::{AudioFormat, VideoFormat, mime};

/// Frame rate hint given to video encoders.
pub const DEFAULT_FRAME_RATE: u32 = 30;
/// One keyframe per second.
pub const DEFAULT_KEYFRAME_INTERVAL_SECS: u32 = 1;
/// Bitrate is `width * height * DEFAULT_BITS_PER_PIXEL`.
pub const DEFAULT_BITS_PER_PIXEL: u64 = 4;
/// AAC bitrate in bits per second.
pub const DEFAULT_AUDIO_BITRATE: u64 = 96_000;

/**
    Configuration for a surface-fed video encoder.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    /// Codec mime type and frame geometry.
    pub format: VideoFormat,
    /// Nominal frame rate. Actual timing comes from surface timestamps.
    pub frame_rate: u32,
    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
}

impl VideoEncoderConfig {
    /**
        Create a configuration with the default frame rate, keyframe interval
        and a bitrate derived from the frame area.
    */
    pub fn new(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            format: VideoFormat::new(mime, width, height),
            frame_rate: DEFAULT_FRAME_RATE,
            keyframe_interval_secs: DEFAULT_KEYFRAME_INTERVAL_SECS,
            bitrate: width as u64 * height as u64 * DEFAULT_BITS_PER_PIXEL,
        }
    }

    /**
        Create configuration for H.264 encoding.
    */
    pub fn avc(width: u32, height: u32) -> Self {
        Self::new(mime::VIDEO_AVC, width, height)
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    pub fn with_keyframe_interval(mut self, secs: u32) -> Self {
        self.keyframe_interval_secs = secs;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    /**
        Derive the bitrate from the frame area.
    */
    pub fn with_bits_per_pixel(mut self, bits: u64) -> Self {
        self.bitrate = self.format.width as u64 * self.format.height as u64 * bits;
        self
    }

    /**
        Number of frames between keyframes, at least one.
    */
    pub fn gop_frames(&self) -> u32 {
        (self.frame_rate * self.keyframe_interval_secs).max(1)
    }
}

/**
    Configuration for a slot-fed audio encoder.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    /// Codec mime type.
    pub mime: String,
    /// Negotiated PCM input format.
    pub format: AudioFormat,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
    /// Largest chunk accepted by one input slot.
    pub max_input_size: usize,
}

impl AudioEncoderConfig {
    /**
        Create configuration for AAC-LC encoding of the given PCM format.
    */
    pub fn aac(format: AudioFormat) -> Self {
        Self {
            mime: mime::AUDIO_AAC.to_string(),
            format,
            bitrate: DEFAULT_AUDIO_BITRATE,
            max_input_size: format.max_chunk_bytes,
        }
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }
}
