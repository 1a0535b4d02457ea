/*!
    Software render context.
*/

use std::sync::OnceLock;
use std::time::Instant;

use codec_encode::{CodecError, InputSurface, SurfaceFrame};
use tracing::debug;

use super::{RenderContext, RenderWindow};
use crate::error::{RecorderError, RecorderResult};

/**
    Render context whose windows are plain RGBA canvases.

    Swapping copies the canvas onto the input surface, stamped with a
    monotonic microsecond clock shared by every window in the process. A
    swap the encoder refuses because its output is backed up drops the
    frame; the next swap tries again.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuContext;

impl CpuContext {
    pub fn new() -> Self {
        Self
    }
}

impl RenderContext for CpuContext {
    fn create_window(&self, surface: &InputSurface) -> RecorderResult<Box<dyn RenderWindow>> {
        if surface.is_released() {
            return Err(RecorderError::render("input surface already released"));
        }
        Ok(Box::new(CpuWindow::new(surface.clone())))
    }
}

pub struct CpuWindow {
    surface: Option<InputSurface>,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    last_timestamp_us: i64,
    dropped_frames: u64,
}

impl CpuWindow {
    pub fn new(surface: InputSurface) -> Self {
        let (width, height) = surface.size();
        Self {
            surface: Some(surface),
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            last_timestamp_us: -1,
            dropped_frames: 0,
        }
    }

    /// Swaps refused by a backed-up encoder.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn surface(&self) -> RecorderResult<&InputSurface> {
        match &self.surface {
            Some(surface) if !surface.is_released() => Ok(surface),
            _ => Err(RecorderError::render("window surface released")),
        }
    }
}

impl RenderWindow for CpuWindow {
    fn make_current(&mut self) -> RecorderResult<()> {
        self.surface().map(|_| ())
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.pixels)
    }

    fn swap_buffers(&mut self) -> RecorderResult<()> {
        let timestamp_us = monotonic_us().max(self.last_timestamp_us + 1);
        let queued = self.surface()?.queue_frame(SurfaceFrame {
            width: self.width,
            height: self.height,
            stride: self.width as usize * 4,
            data: &self.pixels,
            timestamp_us,
        });
        match queued {
            Ok(()) => {
                self.last_timestamp_us = timestamp_us;
                Ok(())
            }
            Err(CodecError::OutputFull(waiting)) => {
                self.dropped_frames += 1;
                if self.dropped_frames == 1 || self.dropped_frames % 100 == 0 {
                    debug!(
                        "encoder backed up with {waiting} units, {} frames dropped",
                        self.dropped_frames
                    );
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release(&mut self) {
        self.surface = None;
        self.pixels = Vec::new();
    }
}

fn monotonic_us() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use codec_encode::loopback::LoopbackEncoder;
    use codec_encode::{BufferInfo, MediaEncoder, OutputStatus, VideoEncoderConfig};

    use super::*;

    #[test]
    fn swaps_reach_encoder_with_increasing_timestamps() {
        let encoder = Arc::new(LoopbackEncoder::video(&VideoEncoderConfig::avc(8, 4)));
        let surface = encoder.create_input_surface().unwrap();
        let mut window = CpuContext::new().create_window(&surface).unwrap();

        window.make_current().unwrap();
        assert_eq!(window.size(), (8, 4));
        window.pixels_mut().unwrap().fill(0xff);
        window.swap_buffers().unwrap();
        window.swap_buffers().unwrap();
        assert_eq!(encoder.frames_received(), 2);

        let mut info = BufferInfo::default();
        let mut timestamps = Vec::new();
        loop {
            match encoder.dequeue_output_buffer(&mut info, Default::default()).unwrap() {
                OutputStatus::FormatChanged => {}
                OutputStatus::Buffer(index) => {
                    timestamps.push(info.presentation_time_us);
                    encoder.release_output_buffer(index).unwrap();
                }
                OutputStatus::TryAgainLater => break,
            }
        }
        assert_eq!(timestamps.len(), 2);
        assert!(timestamps[1] > timestamps[0]);
    }

    #[test]
    fn backed_up_encoder_drops_frames() {
        let encoder = Arc::new(LoopbackEncoder::video(&VideoEncoderConfig::avc(2, 2)));
        let mut window = CpuWindow::new(encoder.create_input_surface().unwrap());

        let swaps = codec_encode::DEFAULT_OUTPUT_CAPACITY as u64 + 3;
        for _ in 0..swaps {
            window.swap_buffers().unwrap();
        }
        assert_eq!(encoder.frames_received(), swaps - 3);
        assert_eq!(window.dropped_frames(), 3);
    }

    #[test]
    fn released_surface_fails_swap() {
        let encoder = LoopbackEncoder::video(&VideoEncoderConfig::avc(2, 2));
        let surface = encoder.create_input_surface().unwrap();
        let mut window = CpuContext::new().create_window(&surface).unwrap();

        surface.release();
        assert!(window.make_current().is_err());
        assert!(window.swap_buffers().is_err());
        assert!(CpuContext::new().create_window(&surface).is_err());
    }

    #[test]
    fn release_drops_canvas() {
        let encoder = LoopbackEncoder::video(&VideoEncoderConfig::avc(2, 2));
        let mut window = CpuWindow::new(encoder.create_input_surface().unwrap());
        window.release();
        assert_eq!(window.pixels_mut().map(|p| p.len()), Some(0));
        assert!(window.swap_buffers().is_err());
    }
}
