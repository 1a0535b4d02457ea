/*!
    Stream format descriptors.
*/

/**
    Mime types understood by the bundled encoder backends.
*/
pub mod mime {
    /// H.264 / AVC elementary stream.
    pub const VIDEO_AVC: &str = "video/avc";
    /// H.265 / HEVC elementary stream.
    pub const VIDEO_HEVC: &str = "video/hevc";
    /// AAC in LATM framing (raw access units).
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
}

/**
    Which track an encoder or an encoded unit belongs to.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
    Video stream geometry and codec.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    /// Codec mime type, e.g. [`mime::VIDEO_AVC`].
    pub mime: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl VideoFormat {
    pub fn new(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width,
            height,
        }
    }
}

/**
    Negotiated PCM input format for the audio track.

    Samples are interleaved, little-endian, signed integers of
    `bits_per_sample` width.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Bits per sample per channel.
    pub bits_per_sample: u16,
    /// Largest PCM chunk the source will ever push, in bytes.
    pub max_chunk_bytes: usize,
}

impl AudioFormat {
    pub const fn new(
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
        max_chunk_bytes: usize,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            max_chunk_bytes,
        }
    }

    /**
        Returns true when every field has been set to a usable value.
    */
    pub const fn is_complete(&self) -> bool {
        self.sample_rate > 0
            && self.channels > 0
            && self.bits_per_sample > 0
            && self.max_chunk_bytes > 0
    }

    /**
        Returns the PCM byte rate: `sample_rate * channels * bits_per_sample / 8`.
    */
    pub const fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * self.bits_per_sample as u64 / 8
    }

    /**
        Returns the size in bytes of one interleaved sample frame.
    */
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /**
        Returns the playback duration of `bytes` of PCM, in microseconds.

        Returns zero when the format is incomplete.
    */
    pub const fn duration_us(&self, bytes: usize) -> i64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        (bytes as u64 * 1_000_000 / bps) as i64
    }
}
