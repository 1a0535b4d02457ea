/*!
    Queue-based encoder abstraction for the vidrec pipeline.

    An encoder is modelled the way hardware codecs expose themselves: it is
    created and configured by an [`EncoderFactory`], started once, fed either
    through an [`InputSurface`] (video) or through indexed input slots (audio),
    and drained by polling its output queue. Every method takes `&self` so that
    a feeding thread and a draining thread can share one encoder.

    # Draining

    ```ignore
    let mut info = BufferInfo::default();
    loop {
        match encoder.dequeue_output_buffer(&mut info, Duration::ZERO)? {
            OutputStatus::FormatChanged => {
                let format = encoder.output_format()?;
                // keep format.csd(0), format.csd(1)
            }
            OutputStatus::Buffer(index) => {
                encoder.read_output_buffer(index, &mut scratch[..info.size])?;
                encoder.release_output_buffer(index)?;
            }
            OutputStatus::TryAgainLater => {}
        }
    }
    ```

    # Backends

    - [`loopback`]: pass-through encoder with synthetic parameter sets. Always
      available, used for pipeline tests and dry runs.
    - `ffmpeg` (feature `ffmpeg`): software H.264/H.265 and AAC through
      `ffmpeg-next`.
*/

pub use codec_types::{
    AudioFormat, BufferFlags, BufferInfo, CodecError, MediaKind, OutputFormat, OutputStatus,
    Result, VideoFormat, mime,
};

pub mod aac;
pub mod config;
mod encoder;
pub mod loopback;
pub mod nal;
mod queue;
mod surface;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use config::{AudioEncoderConfig, VideoEncoderConfig};
pub use encoder::{EncoderFactory, MediaEncoder};
pub use queue::{
    DEFAULT_OUTPUT_CAPACITY, EncodedPacket, InputSlots, OutputQueue, SURFACE_FULL_WAIT,
};
pub use surface::{InputSurface, SurfaceConsumer, SurfaceFrame};
