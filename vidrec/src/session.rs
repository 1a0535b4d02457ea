/*!
    One recording session: resource creation, worker startup and the ordered
    teardown. Runs on the command executor thread only.
*/

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use codec_encode::{AudioFormat, EncoderFactory, InputSurface, MediaEncoder};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::command::{Command, StartRequest};
use crate::config::RecorderConfig;
use crate::drain::{DrainLoop, DrainTrack};
use crate::error::{RecorderError, RecorderResult};
use crate::render::driver::{RenderBinding, RenderDriver};
use crate::render::{RenderContext, RenderMode, RendererProvider};
use crate::sink::{self, SinkSlot};
use crate::track::{AudioTrack, VideoTrack};
use crate::worker::{ShutdownCoordinator, WorkerControl, WorkerHandle, WorkerKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle,
    Starting,
    Recording,
    Stopping,
    Released,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Recording,
            3 => SessionState::Stopping,
            _ => SessionState::Released,
        }
    }
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Idle as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RenderSettings {
    pub mode: RenderMode,
    pub fps: u32,
}

/**
    State visible to both the facade and the executor thread.
*/
pub(crate) struct Shared {
    pub config: RecorderConfig,
    pub state: StateCell,
    pub released: AtomicBool,
    pub sink: SinkSlot,
    pub render_settings: Mutex<RenderSettings>,
    pub audio_format: Mutex<Option<AudioFormat>>,
    pub render: RwLock<Option<Arc<RenderDriver>>>,
    pub video: RwLock<Option<Arc<VideoTrack>>>,
    pub audio: RwLock<Option<Arc<AudioTrack>>>,
}

impl Shared {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: StateCell::new(),
            released: AtomicBool::new(false),
            sink: Arc::new(RwLock::new(None)),
            render_settings: Mutex::new(RenderSettings {
                mode: RenderMode::Continuous,
                fps: 0,
            }),
            audio_format: Mutex::new(None),
            render: RwLock::new(None),
            video: RwLock::new(None),
            audio: RwLock::new(None),
        }
    }

    pub fn render_driver(&self) -> Option<Arc<RenderDriver>> {
        self.render.read().clone()
    }

    fn publish(&self, active: &ActiveSession) {
        *self.render.write() = Some(Arc::clone(&active.driver));
        *self.video.write() = Some(Arc::clone(&active.video));
        *self.audio.write() = active.audio.clone();
    }

    fn clear(&self) {
        *self.render.write() = None;
        *self.video.write() = None;
        *self.audio.write() = None;
    }
}

struct ActiveSession {
    surface: InputSurface,
    driver: Arc<RenderDriver>,
    video: Arc<VideoTrack>,
    audio: Option<Arc<AudioTrack>>,
    workers: Vec<WorkerHandle>,
}

pub(crate) struct Session {
    shared: Arc<Shared>,
    factory: Arc<dyn EncoderFactory>,
    renderer: RendererProvider,
    active: Option<ActiveSession>,
}

impl Session {
    pub fn new(
        shared: Arc<Shared>,
        factory: Arc<dyn EncoderFactory>,
        renderer: RendererProvider,
    ) -> Self {
        Self {
            shared,
            factory,
            renderer,
            active: None,
        }
    }

    pub fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Start(request) => self.start(request),
            Command::Stop => self.stop(),
            Command::Release => {
                self.stop();
                self.shared.state.set(SessionState::Released);
                info!("recorder released");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn start(&mut self, request: StartRequest) {
        if self.shared.released.load(Ordering::Acquire) {
            warn!("start ignored, recorder released");
            return;
        }
        if self.active.is_some() {
            warn!("start ignored, already recording");
            return;
        }

        self.shared.state.set(SessionState::Starting);
        match self.open(request) {
            Ok(active) => {
                self.active = Some(active);
                self.shared.state.set(SessionState::Recording);
                info!("recording started");
            }
            Err(e) => {
                self.shared.state.set(SessionState::Idle);
                sink::report(&self.shared.sink, e);
            }
        }
    }

    fn open(&self, request: StartRequest) -> RecorderResult<ActiveSession> {
        let config = &self.shared.config;

        let video_config = config.video_encoder_config(&request.mime, request.width, request.height);
        let video_encoder = self.factory.create_video_encoder(&video_config)?;
        let surface = match video_encoder.create_input_surface() {
            Ok(surface) => surface,
            Err(e) => {
                video_encoder.release();
                return Err(e.into());
            }
        };
        info!(
            "video encoder {} {}x{} @ {} bit/s",
            video_encoder.name(),
            request.width,
            request.height,
            video_config.bitrate
        );

        let audio = request.audio.filter(AudioFormat::is_complete).and_then(|format| {
            match self.factory.create_audio_encoder(&config.audio_encoder_config(format)) {
                Ok(encoder) => {
                    info!(
                        "audio encoder {} {}Hz x{}",
                        encoder.name(),
                        format.sample_rate,
                        format.channels
                    );
                    Some(Arc::new(AudioTrack::new(
                        encoder,
                        format,
                        config.audio_input_timeout(),
                    )))
                }
                Err(e) => {
                    warn!("audio encoder unavailable, recording video only: {e}");
                    None
                }
            }
        });

        let settings = *self.shared.render_settings.lock();
        let driver = Arc::new(RenderDriver::new(
            WorkerControl::new(WorkerKind::Render),
            request.width,
            request.height,
            settings.mode,
            settings.fps,
        ));

        let mut active = ActiveSession {
            surface,
            driver,
            video: Arc::new(VideoTrack::new(video_encoder)),
            audio,
            workers: Vec::new(),
        };
        self.shared.publish(&active);

        if let Err(e) = self.spawn_workers(&mut active, request.context) {
            self.shut_down(active);
            return Err(e);
        }
        Ok(active)
    }

    fn spawn_workers(
        &self,
        active: &mut ActiveSession,
        context: Arc<dyn RenderContext>,
    ) -> RecorderResult<()> {
        let config = &self.shared.config;
        let tag = config.log_tag.clone();

        let driver = Arc::clone(&active.driver);
        let binding = RenderBinding {
            context,
            surface: active.surface.clone(),
            renderer: Arc::clone(&self.renderer),
        };
        let render = {
            let driver = Arc::clone(&driver);
            let sink = Arc::clone(&self.shared.sink);
            let tag = tag.clone();
            WorkerHandle::spawn(
                format!("{tag}-render"),
                Arc::clone(driver.control()),
                move || driver.run(binding, sink, &tag),
            )?
        };
        active.workers.push(render.with_waker(move || driver.wake()));

        let mut tracks = vec![(
            WorkerKind::VideoDrain,
            DrainTrack::Video(Arc::clone(&active.video)),
        )];
        if let Some(audio) = &active.audio {
            tracks.push((WorkerKind::AudioDrain, DrainTrack::Audio(Arc::clone(audio))));
        }
        for (kind, track) in tracks {
            let control = WorkerControl::new(kind);
            let drain = DrainLoop::new(
                track,
                Arc::clone(&control),
                Arc::clone(&self.shared.sink),
                config.drain_poll_timeout(),
            );
            let tag = tag.clone();
            let worker =
                WorkerHandle::spawn(format!("{tag}-{kind}"), control, move || drain.run(&tag))?;
            active.workers.push(worker);
        }
        Ok(())
    }

    fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            info!("already stopped");
            return;
        };
        self.shared.state.set(SessionState::Stopping);
        self.shut_down(active);
        self.shared.state.set(SessionState::Idle);
        info!("recording stopped");
    }

    /**
        Wait for every worker, then release what the exited ones used:
        render window and surface first, then the encoders. Resources of a
        stuck worker are left to be dropped when it finally returns.
    */
    fn shut_down(&self, active: ActiveSession) {
        let config = &self.shared.config;
        let coordinator =
            ShutdownCoordinator::new(config.shutdown_poll_interval(), config.shutdown_timeout());
        let report = coordinator.shut_down(active.workers);
        for &worker in &report.stuck {
            sink::report(
                &self.shared.sink,
                RecorderError::StuckWorker {
                    worker,
                    waited: report.waited,
                },
            );
        }

        let render_exited = report.has_exited(WorkerKind::Render);
        if render_exited {
            if let Some(mut window) = active.driver.take_window() {
                window.release();
            }
            active.surface.release();
        }
        if render_exited && report.has_exited(WorkerKind::VideoDrain) {
            stop_and_release(active.video.encoder().as_ref());
        }
        if let Some(audio) = &active.audio {
            if report.has_exited(WorkerKind::AudioDrain) {
                stop_and_release(audio.encoder().as_ref());
            }
        }

        self.shared.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.stop();
        }
    }
}

fn stop_and_release(encoder: &dyn MediaEncoder) {
    if let Err(e) = encoder.stop() {
        warn!("{} stop failed: {e}", encoder.name());
    }
    encoder.release();
}
