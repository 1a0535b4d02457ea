/*!
    Shared types for the vidrec encoder pipeline.

    This crate defines the vocabulary that crosses crate boundaries: buffer
    descriptors, output-queue status codes, stream formats and the codec error
    type. It has no dependency on any codec binding, so render code and sinks
    can depend on it without pulling one in.
*/

mod buffer;
mod error;
mod format;

pub use buffer::{BufferFlags, BufferInfo, OutputFormat, OutputStatus};
pub use error::{CodecError, Result};
pub use format::{AudioFormat, MediaKind, VideoFormat, mime};
