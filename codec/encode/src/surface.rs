/*!
    Encoder input surfaces.
*/

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use codec_types::{CodecError, Result};

/**
    One rendered frame presented on an input surface.

    Pixels are packed RGBA, `stride` bytes per row.
*/
#[derive(Clone, Copy, Debug)]
pub struct SurfaceFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: &'a [u8],
    /// Presentation time in microseconds on a monotonic clock.
    pub timestamp_us: i64,
}

/**
    Receiving end of an input surface, implemented by encoder backends.
*/
pub trait SurfaceConsumer: Send + Sync {
    fn on_frame(&self, frame: SurfaceFrame<'_>) -> Result<()>;
}

/**
    A render target that delivers swapped frames straight to an encoder.

    Cloning shares the same surface. Once [`release`](Self::release)d, every
    later frame is rejected.
*/
#[derive(Clone)]
pub struct InputSurface {
    consumer: Arc<dyn SurfaceConsumer>,
    width: u32,
    height: u32,
    released: Arc<AtomicBool>,
}

impl InputSurface {
    pub fn new(consumer: Arc<dyn SurfaceConsumer>, width: u32, height: u32) -> Self {
        Self {
            consumer,
            width,
            height,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /**
        Size the encoder was configured with.
    */
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn queue_frame(&self, frame: SurfaceFrame<'_>) -> Result<()> {
        if self.is_released() {
            return Err(CodecError::SurfaceReleased);
        }
        if frame.data.len() < frame.stride * frame.height as usize {
            return Err(CodecError::invalid_data(format!(
                "surface frame holds {} bytes, expected {}",
                frame.data.len(),
                frame.stride * frame.height as usize
            )));
        }
        self.consumer.on_frame(frame)
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
