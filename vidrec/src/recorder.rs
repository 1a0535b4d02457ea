/*!
    Public facade.
*/

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use codec_encode::{AudioFormat, EncoderFactory};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::command::{self, CommandQueue, StartRequest};
use crate::config::RecorderConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::render::{RenderContext, RenderMode, RendererProvider};
use crate::session::{Session, SessionState, Shared};
use crate::sink::EncodedSink;
use crate::track::ConfigurationBlobs;

/**
    Records rendered video and pushed PCM audio into encoded elementary
    streams.

    Lifecycle calls (`start`, `stop`, `release`) may come from any thread.
    They are queued and executed in order on a dedicated command thread, so
    they return before the work is done; use [`sync`](Self::sync) to wait.
    Encoded units are delivered to the [`EncodedSink`] from the drain
    threads.

    ```ignore
    let recorder = VideoRecorder::new(factory, renderer, RecorderConfig::default())?;
    recorder.set_sink(Some(sink));
    recorder.set_audio_params(44_100, 2, 16, 3528);
    recorder.start(Some(context), mime::VIDEO_AVC, 1280, 720)?;
    // feed recorder.on_audio_pcm(..) from the audio source
    recorder.stop();
    recorder.sync();
    ```
*/
pub struct VideoRecorder {
    shared: Arc<Shared>,
    queue: Arc<CommandQueue>,
    executor: Mutex<Option<JoinHandle<()>>>,
}

impl VideoRecorder {
    pub fn new(
        factory: Arc<dyn EncoderFactory>,
        renderer: RendererProvider,
        config: RecorderConfig,
    ) -> RecorderResult<Self> {
        let tag = config.log_tag.clone();
        let shared = Arc::new(Shared::new(config));
        let queue = Arc::new(CommandQueue::new());

        let mut session = Session::new(Arc::clone(&shared), factory, renderer);
        let executor = command::spawn_executor(&tag, Arc::clone(&queue), move |command| {
            session.handle(command)
        })?;

        Ok(Self {
            shared,
            queue,
            executor: Mutex::new(Some(executor)),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }

    pub fn set_sink(&self, sink: Option<Arc<dyn EncodedSink>>) {
        *self.shared.sink.write() = sink;
    }

    /**
        Set the PCM format for the next session. Audio is recorded only if
        every value is non-zero; otherwise the session is video only.
    */
    pub fn set_audio_params(
        &self,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
        max_chunk_bytes: usize,
    ) {
        let format = AudioFormat::new(sample_rate, channels, bits_per_sample, max_chunk_bytes);
        if format.is_complete() {
            info!(
                "audio params {sample_rate}Hz x{channels} {bits_per_sample}bit, {} bytes/s",
                format.bytes_per_second()
            );
        } else {
            warn!("incomplete audio params {format:?}, sessions will be video only");
        }
        *self.shared.audio_format.lock() = Some(format);
    }

    /**
        Validate the request and queue a start.

        Invalid parameters fail here and leave the recorder untouched.
        Encoder failures happen later on the command thread and are
        reported to the sink.
    */
    pub fn start(
        &self,
        context: Option<Arc<dyn RenderContext>>,
        mime: &str,
        width: u32,
        height: u32,
    ) -> RecorderResult<()> {
        let request = self.start_request(context, mime, width, height).inspect_err(|e| {
            error!("start rejected: {e}");
        })?;
        if !self.queue.submit_start(request) {
            error!("start rejected: recorder released");
            return Err(RecorderError::Released);
        }
        Ok(())
    }

    fn start_request(
        &self,
        context: Option<Arc<dyn RenderContext>>,
        mime: &str,
        width: u32,
        height: u32,
    ) -> RecorderResult<StartRequest> {
        if self.is_released() {
            return Err(RecorderError::Released);
        }
        let context =
            context.ok_or_else(|| RecorderError::invalid_config("missing render context"))?;
        if mime.is_empty() {
            return Err(RecorderError::invalid_config("empty codec type"));
        }
        if width == 0 || height == 0 {
            return Err(RecorderError::invalid_config(format!(
                "invalid video size {width}x{height}"
            )));
        }
        Ok(StartRequest {
            context,
            mime: mime.to_string(),
            width,
            height,
            audio: *self.shared.audio_format.lock(),
        })
    }

    /// Queue a stop. Stopping an idle recorder is a logged no-op.
    pub fn stop(&self) {
        if !self.queue.submit_stop() {
            error!("stop ignored, recorder released");
        }
    }

    /**
        Stop any session and shut the command thread down. Terminal: every
        later lifecycle call is a logged no-op.
    */
    pub fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            error!("release called more than once");
            return;
        }
        self.queue.submit_release();
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /**
        Block until every lifecycle call made before this one has been
        executed. After `release` this waits for the command thread to exit.
    */
    pub fn sync(&self) {
        match self.queue.submit_barrier() {
            Some(done) => {
                let _ = done.recv();
            }
            None => self.join_executor(),
        }
    }

    fn join_executor(&self) {
        let Some(handle) = self.executor.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            warn!("not joining the command thread from itself");
            return;
        }
        if handle.join().is_err() {
            error!("command thread panicked");
        }
    }

    /// Resize the render viewport and draw a frame at the new size.
    pub fn on_video_size_changed(&self, width: u32, height: u32) {
        match self.shared.render_driver() {
            Some(driver) => {
                driver.on_window_resize(width, height);
                driver.request_render();
            }
            None => warn!("size change to {width}x{height} ignored, not recording"),
        }
    }

    pub fn request_render(&self) {
        match self.shared.render_driver() {
            Some(driver) => driver.request_render(),
            None => error!("request_render called before the render driver started"),
        }
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        self.shared.render_settings.lock().mode = mode;
        if let Some(driver) = self.shared.render_driver() {
            driver.set_render_mode(mode);
        }
    }

    /// Cap continuous rendering at `fps` frames per second; zero removes the cap.
    pub fn set_render_fps(&self, fps: u32) {
        self.shared.render_settings.lock().fps = fps;
        if let Some(driver) = self.shared.render_driver() {
            driver.set_render_fps(fps);
        }
    }

    /// Session-relative time of the latest video unit, in milliseconds.
    pub fn encode_time_millis(&self) -> i64 {
        self.shared
            .video
            .read()
            .as_ref()
            .map_or(0, |track| track.encode_time_ms())
    }

    /// Video parameter sets, once the encoder has announced them.
    pub fn configuration_blobs(&self) -> Option<ConfigurationBlobs> {
        self.shared
            .video
            .read()
            .as_ref()
            .and_then(|track| track.blobs().cloned())
    }

    /// Cumulative presentation time of submitted audio, in microseconds.
    pub fn audio_time_us(&self) -> i64 {
        self.shared
            .audio
            .read()
            .as_ref()
            .map_or(0, |track| track.clock_us())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    /**
        Push one chunk of interleaved PCM in the configured format.

        Never waits on lifecycle calls. The chunk is dropped when not
        recording, when no input slot frees up within
        `audio_input_timeout_ms`, or while a lifecycle call holds the track.
    */
    pub fn on_audio_pcm(&self, pcm: &[u8]) {
        if self.shared.state.get() != SessionState::Recording {
            return;
        }
        let Some(track) = self.shared.audio.try_read().and_then(|audio| audio.clone()) else {
            return;
        };
        track.feed(pcm);
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        if !self.shared.released.swap(true, Ordering::AcqRel) {
            self.queue.submit_release();
        }
        self.join_executor();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use codec_encode::MediaKind;
    use codec_encode::loopback::LoopbackFactory;
    use codec_encode::mime;

    use super::*;
    use crate::render::CpuContext;
    use crate::testing::{
        CollectingSink, GatedSink, WAIT, solid_renderer, test_config, wait_until,
    };

    struct Fixture {
        factory: Arc<LoopbackFactory>,
        sink: Arc<CollectingSink>,
        recorder: VideoRecorder,
    }

    fn fixture_with(config: RecorderConfig) -> Fixture {
        let factory = Arc::new(LoopbackFactory::recording());
        let sink = Arc::new(CollectingSink::default());
        let recorder = VideoRecorder::new(factory.clone(), solid_renderer(), config).unwrap();
        recorder.set_sink(Some(sink.clone()));
        recorder.set_render_fps(100);
        Fixture {
            factory,
            sink,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_config())
    }

    fn context() -> Option<Arc<dyn RenderContext>> {
        Some(Arc::new(CpuContext::new()))
    }

    fn start(recorder: &VideoRecorder, width: u32, height: u32) {
        recorder
            .start(context(), mime::VIDEO_AVC, width, height)
            .unwrap();
        recorder.sync();
    }

    #[test]
    fn invalid_start_fails_fast() {
        let f = fixture();
        let r = &f.recorder;

        assert!(matches!(
            r.start(None, mime::VIDEO_AVC, 640, 480),
            Err(RecorderError::InvalidConfig(_))
        ));
        assert!(matches!(
            r.start(context(), "", 640, 480),
            Err(RecorderError::InvalidConfig(_))
        ));
        assert!(matches!(
            r.start(context(), mime::VIDEO_AVC, 0, 480),
            Err(RecorderError::InvalidConfig(_))
        ));
        r.sync();

        assert_eq!(r.state(), SessionState::Idle);
        assert!(f.factory.video_encoders().is_empty());
    }

    #[test]
    fn records_video_and_audio() {
        let f = fixture();
        let r = &f.recorder;
        r.set_audio_params(44_100, 2, 16, 3528);
        start(r, 640, 480);
        assert_eq!(r.state(), SessionState::Recording);

        assert!(wait_until(WAIT, || f.sink.video_units().len() >= 3));
        let audio = f.factory.audio_encoders();
        assert_eq!(audio.len(), 1);

        // Chunks are skipped until the audio drain has started its encoder.
        assert!(wait_until(WAIT, || {
            r.on_audio_pcm(&[0; 3528]);
            r.audio_time_us() > 0
        }));
        r.on_audio_pcm(&[0; 3528]);
        r.on_audio_pcm(&[0; 3528]);
        assert_eq!(r.audio_time_us(), 60_000);
        assert!(wait_until(WAIT, || f.sink.audio_units().len() == 3));
        assert!(r.configuration_blobs().is_some());

        r.stop();
        r.sync();
        assert_eq!(r.state(), SessionState::Idle);
        assert!(f.factory.video_encoders()[0].is_released());
        assert!(audio[0].is_released());
        assert_eq!(r.configuration_blobs(), None);
        assert_eq!(r.encode_time_millis(), 0);

        let video = f.sink.video_units();
        assert_eq!(video[0].presentation_time_us, 0);
        assert!(video[0].is_keyframe);
        assert!(
            video
                .windows(2)
                .all(|w| w[0].presentation_time_us <= w[1].presentation_time_us)
        );
        let audio_times: Vec<i64> = f
            .sink
            .audio_units()
            .iter()
            .map(|u| u.presentation_time_us)
            .collect();
        assert_eq!(audio_times, vec![0, 20_000, 40_000]);
        assert!(f.sink.errors().is_empty());
    }

    #[test]
    fn encode_time_tracks_video_units() {
        let f = fixture();
        let r = &f.recorder;
        start(r, 64, 48);

        let mut last = 0;
        let progressed = wait_until(WAIT, || {
            let now = r.encode_time_millis();
            assert!(now >= last, "elapsed time went back from {last} to {now}");
            last = now;
            now >= 50
        });
        assert!(progressed);
        r.stop();
        r.sync();
    }

    #[test]
    fn audio_is_ignored_without_params() {
        let f = fixture();
        let r = &f.recorder;
        r.set_audio_params(44_100, 0, 16, 3528);
        start(r, 64, 48);

        r.on_audio_pcm(&[0; 3528]);
        assert_eq!(r.audio_time_us(), 0);
        assert!(f.factory.audio_encoders().is_empty());
        r.stop();
        r.sync();
    }

    #[test]
    fn second_start_while_recording_is_ignored() {
        let f = fixture();
        let r = &f.recorder;
        start(r, 64, 48);
        start(r, 128, 96);

        assert_eq!(f.factory.video_encoders().len(), 1);
        assert_eq!(f.factory.video_encoders()[0].frame_size(), (64, 48));
        r.stop();
        r.sync();
    }

    #[test]
    fn stop_is_idempotent() {
        let f = fixture();
        let r = &f.recorder;
        start(r, 64, 48);
        r.stop();
        r.stop();
        r.sync();

        assert_eq!(r.state(), SessionState::Idle);
        assert_eq!(f.factory.video_encoders().len(), 1);
        assert!(f.sink.errors().is_empty());
    }

    #[test]
    fn stop_without_session_returns_immediately() {
        let f = fixture();
        let started = std::time::Instant::now();
        f.recorder.stop();
        f.recorder.sync();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(f.recorder.state(), SessionState::Idle);
    }

    #[test]
    fn restart_after_stop() {
        let f = fixture();
        let r = &f.recorder;
        start(r, 64, 48);
        r.stop();
        start(r, 32, 32);

        assert_eq!(r.state(), SessionState::Recording);
        let encoders = f.factory.video_encoders();
        assert_eq!(encoders.len(), 2);
        assert!(encoders[0].is_released());
        assert!(!encoders[1].is_released());
        r.stop();
        r.sync();
    }

    #[test]
    fn release_is_terminal() {
        let f = fixture();
        let r = &f.recorder;
        start(r, 64, 48);
        r.release();
        r.sync();

        assert_eq!(r.state(), SessionState::Released);
        assert!(f.factory.video_encoders()[0].is_released());
        assert!(matches!(
            r.start(context(), mime::VIDEO_AVC, 64, 48),
            Err(RecorderError::Released)
        ));
        r.stop();
        r.release();
        r.sync();
        assert_eq!(f.factory.video_encoders().len(), 1);
        assert_eq!(r.state(), SessionState::Released);
    }

    #[test]
    fn pending_start_is_superseded() {
        let factory = Arc::new(LoopbackFactory::recording());
        let sink = Arc::new(GatedSink::default());
        let r = VideoRecorder::new(factory.clone(), solid_renderer(), test_config()).unwrap();
        r.set_sink(Some(sink.clone()));
        r.set_render_fps(100);

        start(&r, 64, 48);
        // The video drain is now parked in the sink, so the stop below keeps
        // the command thread busy while both starts are queued.
        assert!(wait_until(WAIT, || sink.gate.waiting() == 1));
        r.stop();
        r.start(context(), mime::VIDEO_AVC, 320, 240).unwrap();
        r.start(context(), mime::VIDEO_AVC, 160, 120).unwrap();
        sink.gate.open();
        r.sync();

        let encoders = factory.video_encoders();
        assert_eq!(encoders.len(), 2);
        assert_eq!(encoders[1].frame_size(), (160, 120));
        assert_eq!(r.state(), SessionState::Recording);
        r.release();
        r.sync();
    }

    #[test]
    fn video_encoder_failure_aborts_session() {
        let f = fixture();
        f.factory.fail_creation(MediaKind::Video, true);
        f.recorder.set_audio_params(44_100, 2, 16, 3528);
        start(&f.recorder, 64, 48);

        assert_eq!(f.recorder.state(), SessionState::Idle);
        assert!(f.factory.audio_encoders().is_empty());
        assert_eq!(f.sink.errors().len(), 1);
    }

    #[test]
    fn audio_encoder_failure_records_video_only() {
        let f = fixture();
        f.factory.fail_creation(MediaKind::Audio, true);
        f.recorder.set_audio_params(44_100, 2, 16, 3528);
        start(&f.recorder, 64, 48);

        assert_eq!(f.recorder.state(), SessionState::Recording);
        assert!(wait_until(WAIT, || !f.sink.video_units().is_empty()));
        f.recorder.on_audio_pcm(&[0; 3528]);
        assert_eq!(f.recorder.audio_time_us(), 0);
        f.recorder.stop();
        f.recorder.sync();
    }

    #[test]
    fn render_calls_before_start_are_harmless() {
        let f = fixture();
        f.recorder.request_render();
        f.recorder.on_video_size_changed(320, 240);
        f.recorder.on_audio_pcm(&[0; 16]);
        assert_eq!(f.recorder.state(), SessionState::Idle);
    }

    #[test]
    fn on_demand_renders_on_request_and_resize() {
        let f = fixture();
        let r = &f.recorder;
        r.set_render_mode(RenderMode::OnDemand);
        start(r, 64, 48);

        assert!(wait_until(WAIT, || f.sink.video_units().len() == 1));
        r.request_render();
        assert!(wait_until(WAIT, || f.sink.video_units().len() == 2));
        r.on_video_size_changed(32, 24);
        assert!(wait_until(WAIT, || f.sink.video_units().len() == 3));
        r.stop();
        r.sync();
    }

    #[test]
    fn drain_fault_is_reported() {
        let f = fixture();
        start(&f.recorder, 64, 48);
        f.factory.video_encoders()[0].inject_output_fault();

        assert!(wait_until(WAIT, || !f.sink.errors().is_empty()));
        assert!(f.sink.errors()[0].contains("video drain failed"));
        f.recorder.stop();
        f.recorder.sync();
        assert_eq!(f.recorder.state(), SessionState::Idle);
    }

    #[test]
    fn dead_video_drain_bounds_the_backlog() {
        let f = fixture();
        let r = &f.recorder;
        r.set_render_fps(0);
        start(r, 64, 48);
        assert!(wait_until(WAIT, || f.sink.video_units().len() >= 3));

        let encoder = &f.factory.video_encoders()[0];
        encoder.inject_output_fault();
        assert!(wait_until(WAIT, || !f.sink.errors().is_empty()));
        thread::sleep(Duration::from_millis(200));

        let drained = f.sink.video_units().len() as u64;
        let accepted = encoder.frames_received();
        assert!(
            accepted <= drained + codec_encode::DEFAULT_OUTPUT_CAPACITY as u64,
            "{accepted} frames accepted, {drained} drained"
        );
        thread::sleep(Duration::from_millis(100));
        assert_eq!(encoder.frames_received(), accepted);
        assert_eq!(r.state(), SessionState::Recording);

        r.stop();
        r.sync();
        assert_eq!(r.state(), SessionState::Idle);
        assert!(encoder.is_released());
    }

    #[test]
    fn stuck_worker_times_out() {
        let factory = Arc::new(LoopbackFactory::recording());
        let sink = Arc::new(GatedSink::default());
        let config = RecorderConfig {
            shutdown_timeout_ms: Some(50),
            ..test_config()
        };
        let r = VideoRecorder::new(factory.clone(), solid_renderer(), config).unwrap();
        r.set_sink(Some(sink.clone()));
        r.set_render_fps(100);

        start(&r, 64, 48);
        assert!(wait_until(WAIT, || sink.gate.waiting() == 1));
        r.stop();
        r.sync();

        assert_eq!(r.state(), SessionState::Idle);
        let errors = sink.inner.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("video-drain worker did not exit"), "{errors:?}");
        assert!(!factory.video_encoders()[0].is_released());

        sink.gate.open();
        r.release();
        r.sync();
    }
}
