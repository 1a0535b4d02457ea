/*!
    Encoder buffer descriptors and output-queue status.
*/

use std::ops::{BitOr, BitOrAssign};

/**
    Per-unit flags reported by an encoder.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    /// The unit is a sync point (IDR / keyframe).
    pub const KEY_FRAME: Self = Self(1);
    /// The unit carries codec configuration rather than media data.
    pub const CODEC_CONFIG: Self = Self(2);
    /// The unit is the last one of the stream.
    pub const END_OF_STREAM: Self = Self(4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/**
    Describes the valid byte range and timing of one output unit.

    The drain loop owns one of these per track and lets the encoder overwrite
    it on every dequeue.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Start of the payload inside the output buffer.
    pub offset: usize,
    /// Payload length in bytes.
    pub size: usize,
    /// Presentation time in microseconds, in the encoder's clock.
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn set(&mut self, offset: usize, size: usize, presentation_time_us: i64, flags: BufferFlags) {
        self.offset = offset;
        self.size = size;
        self.presentation_time_us = presentation_time_us;
        self.flags = flags;
    }

    pub const fn is_keyframe(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    pub const fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }
}

/**
    Result of polling an encoder's output queue.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing is ready within the requested timeout.
    TryAgainLater,
    /// The output format is now known. Emitted once, before the first unit.
    FormatChanged,
    /// An output unit is ready at this index; `BufferInfo` describes it.
    Buffer(usize),
}

/**
    Output format of an encoder, available after [`OutputStatus::FormatChanged`].
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputFormat {
    /// Codec mime type.
    pub mime: String,
    /// Codec-specific data blobs (`csd-0`, `csd-1`, ...), verbatim.
    pub csd: Vec<Vec<u8>>,
}

impl OutputFormat {
    pub fn new(mime: impl Into<String>, csd: Vec<Vec<u8>>) -> Self {
        Self {
            mime: mime.into(),
            csd,
        }
    }

    /**
        Returns codec-specific data blob `index`, if present.
    */
    pub fn csd(&self, index: usize) -> Option<&[u8]> {
        self.csd.get(index).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_contains() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(!flags.contains(BufferFlags::NONE));
    }

    #[test]
    fn buffer_info_classification() {
        let mut info = BufferInfo::default();
        info.set(0, 10, 33_000, BufferFlags::KEY_FRAME);
        assert!(info.is_keyframe());
        assert!(!info.is_codec_config());

        info.set(0, 10, 0, BufferFlags::CODEC_CONFIG);
        assert!(!info.is_keyframe());
        assert!(info.is_codec_config());
    }

    #[test]
    fn output_format_csd_lookup() {
        let format = OutputFormat::new("video/avc", vec![vec![1, 2], vec![3]]);
        assert_eq!(format.csd(0), Some(&[1u8, 2][..]));
        assert_eq!(format.csd(1), Some(&[3u8][..]));
        assert_eq!(format.csd(2), None);
    }
}
