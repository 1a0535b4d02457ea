/*!
    Rendering seam.

    A [`RenderContext`] is supplied by the caller and outlives the session.
    When the render thread starts it creates a [`RenderWindow`] bound to the
    encoder's input surface, asks the [`RendererProvider`] for a fresh
    [`Renderer`], and then draws and swaps frames onto the surface.

    The [`Renderer`] lives on the render thread only and need not be `Send`.
*/

use std::sync::Arc;

use codec_encode::InputSurface;

use crate::error::RecorderResult;

mod cpu;
pub(crate) mod driver;

pub use cpu::{CpuContext, CpuWindow};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// Render back to back, optionally capped by a frame rate.
    #[default]
    Continuous,
    /// Render only after a request or a resize.
    OnDemand,
}

/**
    Graphics context that can bind windows to encoder input surfaces.
*/
pub trait RenderContext: Send + Sync {
    fn create_window(&self, surface: &InputSurface) -> RecorderResult<Box<dyn RenderWindow>>;
}

/**
    Drawable bound to one input surface.
*/
pub trait RenderWindow: Send {
    /// Bind the window to the calling thread.
    fn make_current(&mut self) -> RecorderResult<()>;

    fn size(&self) -> (u32, u32);

    /**
        CPU-addressable RGBA pixels, `width * 4` bytes per row. GPU backed
        windows return `None`.
    */
    fn pixels_mut(&mut self) -> Option<&mut [u8]>;

    /// Present the drawn frame to the encoder.
    fn swap_buffers(&mut self) -> RecorderResult<()>;

    fn release(&mut self);
}

/**
    Draws frames. Callbacks run on the render thread.
*/
pub trait Renderer {
    fn on_surface_created(&mut self, _window: &mut dyn RenderWindow) -> RecorderResult<()> {
        Ok(())
    }

    /// The viewport changed. Always called once before the first frame.
    fn on_surface_changed(&mut self, _width: u32, _height: u32) {}

    fn on_draw_frame(&mut self, window: &mut dyn RenderWindow) -> RecorderResult<()>;
}

/**
    Creates the renderer for a session. Queried when the render thread
    starts; `None` aborts rendering for that session.
*/
pub type RendererProvider = Arc<dyn Fn() -> Option<Box<dyn Renderer>> + Send + Sync>;
