/*!
    Helpers shared by the pipeline tests.
*/

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use codec_types::MediaKind;
use parking_lot::{Condvar, Mutex};

use crate::config::RecorderConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::render::{RenderWindow, Renderer, RendererProvider};
use crate::sink::{EncodedSink, EncodedUnit};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn test_config() -> RecorderConfig {
    RecorderConfig {
        drain_poll_timeout_ms: 2,
        audio_input_timeout_ms: 5,
        shutdown_poll_interval_ms: 2,
        ..RecorderConfig::default()
    }
    .with_log_tag("test")
}

struct SolidRenderer(u8);

impl Renderer for SolidRenderer {
    fn on_draw_frame(&mut self, window: &mut dyn RenderWindow) -> RecorderResult<()> {
        if let Some(pixels) = window.pixels_mut() {
            pixels.fill(self.0);
        }
        self.0 = self.0.wrapping_add(1);
        Ok(())
    }
}

pub fn solid_renderer() -> RendererProvider {
    Arc::new(|| Some(Box::new(SolidRenderer(0)) as Box<dyn Renderer>))
}

#[derive(Clone, Debug)]
pub struct RecordedUnit {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    pub is_keyframe: bool,
    pub is_codec_config: bool,
    pub presentation_time_us: i64,
}

impl From<EncodedUnit<'_>> for RecordedUnit {
    fn from(unit: EncodedUnit<'_>) -> Self {
        Self {
            kind: unit.kind,
            data: unit.data.to_vec(),
            is_keyframe: unit.is_keyframe,
            is_codec_config: unit.is_codec_config,
            presentation_time_us: unit.presentation_time_us,
        }
    }
}

#[derive(Default)]
pub struct CollectingSink {
    video: Mutex<Vec<RecordedUnit>>,
    audio: Mutex<Vec<RecordedUnit>>,
    errors: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn video_units(&self) -> Vec<RecordedUnit> {
        self.video.lock().clone()
    }

    pub fn audio_units(&self) -> Vec<RecordedUnit> {
        self.audio.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl EncodedSink for CollectingSink {
    fn on_video_data(&self, unit: EncodedUnit<'_>) {
        self.video.lock().push(unit.into());
    }

    fn on_audio_data(&self, unit: EncodedUnit<'_>) {
        self.audio.lock().push(unit.into());
    }

    fn on_error(&self, error: &RecorderError) {
        self.errors.lock().push(error.to_string());
    }
}

/**
    A latch that blocks callers of [`Gate::pass`] until opened.
*/
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

impl Gate {
    pub fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting += 1;
        while !state.open {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }
}

/**
    Collecting sink whose video callback blocks on a gate, stalling the
    video drain loop.
*/
#[derive(Default)]
pub struct GatedSink {
    pub gate: Gate,
    pub inner: CollectingSink,
}

impl EncodedSink for GatedSink {
    fn on_video_data(&self, unit: EncodedUnit<'_>) {
        self.gate.pass();
        self.inner.on_video_data(unit);
    }

    fn on_audio_data(&self, unit: EncodedUnit<'_>) {
        self.inner.on_audio_data(unit);
    }

    fn on_error(&self, error: &RecorderError) {
        self.inner.on_error(error);
    }
}
