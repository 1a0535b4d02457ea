/*!
    The encoder seam.
*/

use std::sync::Arc;
use std::time::Duration;

use codec_types::{BufferFlags, BufferInfo, CodecError, MediaKind, OutputFormat, OutputStatus, Result};

use crate::config::{AudioEncoderConfig, VideoEncoderConfig};
use crate::surface::InputSurface;

/**
    A configured, queue-based encoder.

    Lifecycle: created configured by an [`EncoderFactory`], then [`start`],
    fed and drained, then [`stop`] and [`release`]. Calls after `release`
    fail with [`CodecError::Released`].

    Implementations must allow the input methods and the output methods to be
    called from two different threads at the same time.

    [`start`]: MediaEncoder::start
    [`stop`]: MediaEncoder::stop
    [`release`]: MediaEncoder::release
*/
pub trait MediaEncoder: Send + Sync {
    /// Track this encoder produces.
    fn kind(&self) -> MediaKind;

    /// Human-readable backend name, for logs.
    fn name(&self) -> &str;

    fn start(&self) -> Result<()>;

    /**
        Create the surface that feeds this encoder. Video encoders only, and
        only between configuration and `start`.
    */
    fn create_input_surface(&self) -> Result<InputSurface> {
        Err(CodecError::invalid_state(format!(
            "{} encoder has no input surface",
            self.kind()
        )))
    }

    /**
        Wait up to `timeout` for a free input slot.

        Returns `Ok(None)` when no slot freed up in time.
    */
    fn dequeue_input_buffer(&self, timeout: Duration) -> Result<Option<usize>>;

    /**
        Copy `data` into input slot `index` and submit it.
    */
    fn queue_input_buffer(
        &self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    /**
        Poll the output queue, waiting up to `timeout`. A zero timeout never
        blocks. On [`OutputStatus::Buffer`], `info` describes the unit.
    */
    fn dequeue_output_buffer(&self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus>;

    /**
        Copy the payload of dequeued output unit `index` into `dst`.
        `dst` must be at least `info.size` bytes long.
    */
    fn read_output_buffer(&self, index: usize, dst: &mut [u8]) -> Result<()>;

    /**
        Hand output unit `index` back to the encoder.
    */
    fn release_output_buffer(&self, index: usize) -> Result<()>;

    /**
        Current output format. Complete once `FormatChanged` has been seen.
    */
    fn output_format(&self) -> Result<OutputFormat>;

    fn stop(&self) -> Result<()>;

    /// Free the codec. Idempotent.
    fn release(&self);
}

/**
    Creates configured encoders.
*/
pub trait EncoderFactory: Send + Sync {
    fn create_video_encoder(&self, config: &VideoEncoderConfig) -> Result<Arc<dyn MediaEncoder>>;

    fn create_audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Arc<dyn MediaEncoder>>;
}
