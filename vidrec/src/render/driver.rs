/*!
    Render driver: pumps frames into the video encoder's input surface.
*/

use std::sync::Arc;
use std::time::{Duration, Instant};

use codec_encode::InputSurface;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, info_span, warn};

use super::{RenderContext, RenderMode, RenderWindow, RendererProvider};
use crate::error::{RecorderError, RecorderResult};
use crate::sink::{self, SinkSlot};
use crate::worker::{ExitGuard, WorkerControl};

struct RenderState {
    width: u32,
    height: u32,
    size_changed: bool,
    render_requested: bool,
    mode: RenderMode,
    /// Frame cap in continuous mode; zero renders back to back.
    fps: u32,
}

/**
    Resources the render thread binds to when it starts.
*/
pub(crate) struct RenderBinding {
    pub context: Arc<dyn RenderContext>,
    pub surface: InputSurface,
    pub renderer: RendererProvider,
}

pub(crate) struct RenderDriver {
    control: Arc<WorkerControl>,
    state: Mutex<RenderState>,
    wake: Condvar,
    /// Filled by the render thread as it exits, emptied by the session.
    window: Mutex<Option<Box<dyn RenderWindow>>>,
}

impl RenderDriver {
    pub fn new(
        control: Arc<WorkerControl>,
        width: u32,
        height: u32,
        mode: RenderMode,
        fps: u32,
    ) -> Self {
        Self {
            control,
            state: Mutex::new(RenderState {
                width,
                height,
                size_changed: true,
                render_requested: false,
                mode,
                fps,
            }),
            wake: Condvar::new(),
            window: Mutex::new(None),
        }
    }

    pub fn control(&self) -> &Arc<WorkerControl> {
        &self.control
    }

    pub fn on_window_resize(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.width = width;
        state.height = height;
        state.size_changed = true;
        self.wake.notify_all();
    }

    pub fn request_render(&self) {
        self.state.lock().render_requested = true;
        self.wake.notify_all();
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        self.state.lock().mode = mode;
        self.wake.notify_all();
    }

    pub fn set_render_fps(&self, fps: u32) {
        self.state.lock().fps = fps;
        self.wake.notify_all();
    }

    /// Interrupt a pending wait so the exit flag is seen.
    pub fn wake(&self) {
        let _state = self.state.lock();
        self.wake.notify_all();
    }

    /// The window left behind by an exited render thread.
    pub fn take_window(&self) -> Option<Box<dyn RenderWindow>> {
        self.window.lock().take()
    }

    /**
        Thread body. The window is parked for the session before the worker
        reports its exit, so the session can release it afterwards.
    */
    pub fn run(&self, binding: RenderBinding, sink: SinkSlot, tag: &str) {
        let _exit = ExitGuard::new(Arc::clone(&self.control));
        let span = info_span!("render", tag);
        let _enter = span.enter();

        let mut window = match binding.context.create_window(&binding.surface) {
            Ok(window) => window,
            Err(e) => {
                sink::report(&sink, e);
                return;
            }
        };

        let result = self.render_loop(window.as_mut(), &binding.renderer);
        *self.window.lock() = Some(window);

        match result {
            Ok(frames) => info!("render loop finished after {frames} frames"),
            Err(e) if self.control.should_exit() => warn!("render stopped with error: {e}"),
            Err(e) => sink::report(&sink, e),
        }
    }

    fn render_loop(
        &self,
        window: &mut dyn RenderWindow,
        provider: &RendererProvider,
    ) -> RecorderResult<u64> {
        window.make_current()?;
        let mut renderer = provider().ok_or(RecorderError::MissingRenderer)?;
        renderer.on_surface_created(window)?;

        let mut frames = 0u64;
        let mut last_frame: Option<Instant> = None;
        while let Some(resized) = self.next_frame(last_frame) {
            if let Some((width, height)) = resized {
                debug!("surface changed to {width}x{height}");
                renderer.on_surface_changed(width, height);
            }
            last_frame = Some(Instant::now());
            renderer.on_draw_frame(window)?;
            window.swap_buffers()?;
            frames += 1;
        }
        Ok(frames)
    }

    /**
        Block until the next frame is due. Returns `None` on exit, otherwise
        the new size if it changed since the last frame.
    */
    fn next_frame(&self, last_frame: Option<Instant>) -> Option<Option<(u32, u32)>> {
        let mut state = self.state.lock();
        loop {
            if self.control.should_exit() {
                return None;
            }
            match state.mode {
                RenderMode::OnDemand if !state.render_requested && !state.size_changed => {
                    self.wake.wait(&mut state);
                }
                RenderMode::Continuous if !state.size_changed => {
                    let due = frame_interval(state.fps)
                        .zip(last_frame)
                        .map(|(interval, last)| last + interval);
                    match due {
                        Some(due) if Instant::now() < due => {
                            self.wake.wait_until(&mut state, due);
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }

        state.render_requested = false;
        let resized = state.size_changed.then_some((state.width, state.height));
        state.size_changed = false;
        Some(resized)
    }
}

fn frame_interval(fps: u32) -> Option<Duration> {
    (fps > 0).then(|| Duration::from_secs(1) / fps)
}

impl Drop for RenderDriver {
    fn drop(&mut self) {
        if let Some(mut window) = self.window.get_mut().take() {
            error!("render window dropped without release");
            window.release();
        }
    }
}
