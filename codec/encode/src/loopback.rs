/*!
    Pass-through encoder backend.

    Every surface frame becomes one small Annex-B-looking unit and every PCM
    chunk is handed back verbatim, so the pipeline around an encoder can be
    exercised without codec hardware. Parameter sets are synthetic but
    well-formed enough for logging and muxer plumbing.
*/

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use codec_types::{
    BufferFlags, BufferInfo, CodecError, MediaKind, OutputFormat, OutputStatus, Result,
};

use crate::aac;
use crate::config::{AudioEncoderConfig, VideoEncoderConfig};
use crate::encoder::{EncoderFactory, MediaEncoder};
use crate::queue::{
    DEFAULT_OUTPUT_CAPACITY, EncodedPacket, InputSlots, OutputQueue, SURFACE_FULL_WAIT,
};
use crate::surface::{InputSurface, SurfaceConsumer, SurfaceFrame};

/// Input slots available to an audio loopback encoder.
pub const LOOPBACK_INPUT_SLOTS: usize = 4;

/// Input timestamps kept for inspection; older ones are forgotten.
const RECENT_INPUT_TIMESTAMPS: usize = 256;

#[derive(Default)]
struct LoopbackState {
    started: bool,
    released: bool,
    frames: u64,
    input_timestamps: VecDeque<i64>,
    held_slots: Vec<usize>,
    surface: Option<InputSurface>,
}

struct LoopbackInner {
    kind: MediaKind,
    name: String,
    size: (u32, u32),
    gop: u64,
    max_input_size: usize,
    output: OutputQueue,
    slots: InputSlots,
    state: Mutex<LoopbackState>,
    output_fault: AtomicBool,
}

impl LoopbackInner {
    fn ensure_alive(&self) -> Result<()> {
        if self.state.lock().released {
            return Err(CodecError::Released);
        }
        Ok(())
    }
}

impl SurfaceConsumer for LoopbackInner {
    fn on_frame(&self, frame: SurfaceFrame<'_>) -> Result<()> {
        self.output.wait_for_space(SURFACE_FULL_WAIT)?;
        let frame_no = {
            let mut state = self.state.lock();
            if state.released {
                return Err(CodecError::Released);
            }
            let n = state.frames;
            state.frames += 1;
            n
        };

        let keyframe = frame_no % self.gop == 0;
        let mut data = vec![0, 0, 0, 1, if keyframe { 0x65 } else { 0x41 }];
        data.extend_from_slice(&(frame_no as u32).to_be_bytes());
        data.extend_from_slice(&(frame.width as u16).to_be_bytes());
        data.extend_from_slice(&(frame.height as u16).to_be_bytes());

        self.output.push(EncodedPacket {
            data,
            presentation_time_us: frame.timestamp_us,
            flags: if keyframe {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::NONE
            },
        });
        Ok(())
    }
}

/**
    Pass-through encoder. See the [module docs](self).
*/
pub struct LoopbackEncoder {
    inner: Arc<LoopbackInner>,
}

impl LoopbackEncoder {
    pub fn video(config: &VideoEncoderConfig) -> Self {
        let (width, height) = (config.format.width, config.format.height);
        let sps = vec![
            0,
            0,
            0,
            1,
            0x67,
            0x42,
            0xc0,
            0x1e,
            (width >> 8) as u8,
            width as u8,
            (height >> 8) as u8,
            height as u8,
        ];
        let pps = vec![0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];
        let format = OutputFormat::new(config.format.mime.clone(), vec![sps, pps]);

        Self::with_format(
            MediaKind::Video,
            format,
            (width, height),
            config.gop_frames() as u64,
            0,
            0,
        )
    }

    pub fn audio(config: &AudioEncoderConfig) -> Self {
        let csd = aac::audio_specific_config(config.format.sample_rate, config.format.channels)
            .map(|asc| vec![asc.to_vec()])
            .unwrap_or_default();
        let format = OutputFormat::new(config.mime.clone(), csd);

        Self::with_format(
            MediaKind::Audio,
            format,
            (0, 0),
            1,
            config.max_input_size,
            LOOPBACK_INPUT_SLOTS,
        )
    }

    fn with_format(
        kind: MediaKind,
        format: OutputFormat,
        size: (u32, u32),
        gop: u64,
        max_input_size: usize,
        slots: usize,
    ) -> Self {
        let output = OutputQueue::new(DEFAULT_OUTPUT_CAPACITY);
        output.set_format(format);
        Self {
            inner: Arc::new(LoopbackInner {
                kind,
                name: format!("loopback-{kind}"),
                size,
                gop: gop.max(1),
                max_input_size,
                output,
                slots: InputSlots::new(slots),
                state: Mutex::new(LoopbackState::default()),
                output_fault: AtomicBool::new(false),
            }),
        }
    }

    /// Configured frame size of a video encoder; zero for audio.
    pub fn frame_size(&self) -> (u32, u32) {
        self.inner.size
    }

    /// Surface frames accepted so far. Frames refused for lack of output
    /// space are not counted.
    pub fn frames_received(&self) -> u64 {
        self.inner.state.lock().frames
    }

    /// Presentation times of the most recent queued input chunks, oldest first.
    pub fn input_timestamps(&self) -> Vec<i64> {
        self.inner.state.lock().input_timestamps.iter().copied().collect()
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.lock().started
    }

    pub fn is_released(&self) -> bool {
        self.inner.state.lock().released
    }

    /**
        Occupy every free input slot so that input dequeues time out, as a
        saturated hardware encoder would.
    */
    pub fn stall_input(&self) {
        let mut held = Vec::new();
        while let Some(index) = self.inner.slots.acquire(Duration::ZERO) {
            held.push(index);
        }
        self.inner.state.lock().held_slots.extend(held);
    }

    /**
        Give back the slots taken by [`stall_input`](Self::stall_input).
    */
    pub fn resume_input(&self) {
        let held = std::mem::take(&mut self.inner.state.lock().held_slots);
        for index in held {
            let _ = self.inner.slots.release(index);
        }
    }

    /**
        Make the next output dequeue fail with a codec error.
    */
    pub fn inject_output_fault(&self) {
        self.inner.output_fault.store(true, Ordering::Release);
    }
}

impl MediaEncoder for LoopbackEncoder {
    fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        state.started = true;
        Ok(())
    }

    fn create_input_surface(&self) -> Result<InputSurface> {
        if self.inner.kind != MediaKind::Video {
            return Err(CodecError::invalid_state("audio encoder has no input surface"));
        }
        let mut state = self.inner.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        let consumer: Arc<dyn SurfaceConsumer> = self.inner.clone();
        let surface = InputSurface::new(consumer, self.inner.size.0, self.inner.size.1);
        state.surface = Some(surface.clone());
        Ok(surface)
    }

    fn dequeue_input_buffer(&self, timeout: Duration) -> Result<Option<usize>> {
        self.inner.ensure_alive()?;
        if self.inner.kind != MediaKind::Audio {
            return Err(CodecError::invalid_state("video encoder is fed through its surface"));
        }
        Ok(self.inner.slots.acquire(timeout))
    }

    fn queue_input_buffer(
        &self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.released {
                return Err(CodecError::Released);
            }
            if !state.started {
                drop(state);
                self.inner.slots.release(index)?;
                return Err(CodecError::invalid_state("encoder is not started"));
            }
            if data.len() > self.inner.max_input_size {
                drop(state);
                self.inner.slots.release(index)?;
                return Err(CodecError::invalid_data(format!(
                    "input chunk of {} bytes exceeds max input size {}",
                    data.len(),
                    self.inner.max_input_size
                )));
            }
            if let Err(e) = self.inner.output.wait_for_space(Duration::ZERO) {
                drop(state);
                self.inner.slots.release(index)?;
                return Err(e);
            }
            if state.input_timestamps.len() == RECENT_INPUT_TIMESTAMPS {
                state.input_timestamps.pop_front();
            }
            state.input_timestamps.push_back(presentation_time_us);
        }

        self.inner.output.push(EncodedPacket {
            data: data.to_vec(),
            presentation_time_us,
            flags,
        });
        self.inner.slots.release(index)
    }

    fn dequeue_output_buffer(&self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus> {
        if self.inner.output_fault.swap(false, Ordering::AcqRel) {
            return Err(CodecError::codec("injected output fault"));
        }
        self.inner.output.dequeue(info, timeout)
    }

    fn read_output_buffer(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.inner.output.read(index, dst)
    }

    fn release_output_buffer(&self, index: usize) -> Result<()> {
        self.inner.output.release(index)
    }

    fn output_format(&self) -> Result<OutputFormat> {
        self.inner.ensure_alive()?;
        self.inner
            .output
            .format()
            .ok_or_else(|| CodecError::invalid_state("output format not yet known"))
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        state.started = false;
        Ok(())
    }

    fn release(&self) {
        let surface = {
            let mut state = self.inner.state.lock();
            if state.released {
                return;
            }
            state.released = true;
            state.started = false;
            state.surface.take()
        };
        if let Some(surface) = surface {
            surface.release();
        }
        self.inner.output.close();
        self.inner.slots.close();
    }
}

/**
    Factory for [`LoopbackEncoder`]s.

    A factory made with [`recording`](Self::recording) keeps every encoder it
    creates so tests can inspect them; one made with [`new`](Self::new) keeps
    nothing.
*/
#[derive(Default)]
pub struct LoopbackFactory {
    keep_created: bool,
    video: Mutex<Vec<Arc<LoopbackEncoder>>>,
    audio: Mutex<Vec<Arc<LoopbackEncoder>>>,
    fail_video: AtomicBool,
    fail_audio: AtomicBool,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording() -> Self {
        Self {
            keep_created: true,
            ..Self::default()
        }
    }

    /**
        Make every later creation of `kind` fail, as if the codec were
        unavailable.
    */
    pub fn fail_creation(&self, kind: MediaKind, fail: bool) {
        match kind {
            MediaKind::Video => self.fail_video.store(fail, Ordering::Release),
            MediaKind::Audio => self.fail_audio.store(fail, Ordering::Release),
        }
    }

    /// Every video encoder created so far, oldest first. Empty unless recording.
    pub fn video_encoders(&self) -> Vec<Arc<LoopbackEncoder>> {
        self.video.lock().clone()
    }

    /// Every audio encoder created so far, oldest first. Empty unless recording.
    pub fn audio_encoders(&self) -> Vec<Arc<LoopbackEncoder>> {
        self.audio.lock().clone()
    }
}

impl EncoderFactory for LoopbackFactory {
    fn create_video_encoder(&self, config: &VideoEncoderConfig) -> Result<Arc<dyn MediaEncoder>> {
        if self.fail_video.load(Ordering::Acquire) {
            return Err(CodecError::unsupported_format(format!(
                "no loopback encoder for {}",
                config.format.mime
            )));
        }
        let encoder = Arc::new(LoopbackEncoder::video(config));
        if self.keep_created {
            self.video.lock().push(Arc::clone(&encoder));
        }
        Ok(encoder)
    }

    fn create_audio_encoder(&self, config: &AudioEncoderConfig) -> Result<Arc<dyn MediaEncoder>> {
        if self.fail_audio.load(Ordering::Acquire) {
            return Err(CodecError::unsupported_format(format!(
                "no loopback encoder for {}",
                config.mime
            )));
        }
        let encoder = Arc::new(LoopbackEncoder::audio(config));
        if self.keep_created {
            self.audio.lock().push(Arc::clone(&encoder));
        }
        Ok(encoder)
    }
}

#[cfg(test)]
mod tests {
    use codec_types::AudioFormat;

    use super::*;

    fn drain_one(encoder: &LoopbackEncoder, info: &mut BufferInfo) -> Vec<u8> {
        let OutputStatus::Buffer(index) = encoder.dequeue_output_buffer(info, Duration::ZERO).unwrap()
        else {
            panic!("expected an output unit");
        };
        let mut data = vec![0u8; info.size];
        encoder.read_output_buffer(index, &mut data).unwrap();
        encoder.release_output_buffer(index).unwrap();
        data
    }

    #[test]
    fn video_frames_become_units_with_keyframe_cadence() {
        let config = VideoEncoderConfig::avc(4, 2).with_frame_rate(2);
        let encoder = LoopbackEncoder::video(&config);
        let surface = encoder.create_input_surface().unwrap();
        encoder.start().unwrap();

        let pixels = vec![0u8; 4 * 2 * 4];
        for ts in [100, 200, 300] {
            surface
                .queue_frame(SurfaceFrame {
                    width: 4,
                    height: 2,
                    stride: 16,
                    data: &pixels,
                    timestamp_us: ts,
                })
                .unwrap();
        }

        let mut info = BufferInfo::default();
        assert_eq!(
            encoder.dequeue_output_buffer(&mut info, Duration::ZERO).unwrap(),
            OutputStatus::FormatChanged
        );
        let format = encoder.output_format().unwrap();
        assert_eq!(format.csd(1), Some(&[0u8, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80][..]));

        let first = drain_one(&encoder, &mut info);
        assert!(info.is_keyframe());
        assert_eq!(info.presentation_time_us, 100);
        assert_eq!(first[4], 0x65);

        drain_one(&encoder, &mut info);
        assert!(!info.is_keyframe());
        drain_one(&encoder, &mut info);
        assert!(info.is_keyframe());
    }

    #[test]
    fn audio_chunks_pass_through() {
        let config = AudioEncoderConfig::aac(AudioFormat::new(44_100, 2, 16, 8));
        let encoder = LoopbackEncoder::audio(&config);
        encoder.start().unwrap();

        let slot = encoder.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        encoder
            .queue_input_buffer(slot, &[1, 2, 3, 4], 20_000, BufferFlags::NONE)
            .unwrap();

        let mut info = BufferInfo::default();
        assert_eq!(
            encoder.dequeue_output_buffer(&mut info, Duration::ZERO).unwrap(),
            OutputStatus::FormatChanged
        );
        assert_eq!(drain_one(&encoder, &mut info), vec![1, 2, 3, 4]);
        assert_eq!(encoder.input_timestamps(), vec![20_000]);
        assert_eq!(encoder.output_format().unwrap().csd(0), Some(&[0x12u8, 0x10][..]));
    }

    #[test]
    fn oversized_chunk_is_rejected_and_slot_returned() {
        let config = AudioEncoderConfig::aac(AudioFormat::new(44_100, 2, 16, 2));
        let encoder = LoopbackEncoder::audio(&config);
        encoder.start().unwrap();

        let slot = encoder.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        assert!(
            encoder
                .queue_input_buffer(slot, &[0; 4], 0, BufferFlags::NONE)
                .is_err()
        );
        assert_eq!(encoder.inner.slots.available(), LOOPBACK_INPUT_SLOTS);
    }

    #[test]
    fn stalled_input_times_out() {
        let config = AudioEncoderConfig::aac(AudioFormat::new(44_100, 2, 16, 8));
        let encoder = LoopbackEncoder::audio(&config);
        encoder.start().unwrap();

        encoder.stall_input();
        assert_eq!(
            encoder.dequeue_input_buffer(Duration::from_millis(5)).unwrap(),
            None
        );
        encoder.resume_input();
        assert!(encoder.dequeue_input_buffer(Duration::ZERO).unwrap().is_some());
    }

    #[test]
    fn release_invalidates_surface_and_queues() {
        let encoder = LoopbackEncoder::video(&VideoEncoderConfig::avc(2, 2));
        let surface = encoder.create_input_surface().unwrap();
        encoder.release();
        encoder.release();

        assert!(surface.is_released());
        assert!(encoder.is_released());
        assert_eq!(encoder.start(), Err(CodecError::Released));
        assert_eq!(
            encoder.dequeue_output_buffer(&mut BufferInfo::default(), Duration::ZERO),
            Err(CodecError::Released)
        );
    }

    #[test]
    fn undrained_output_refuses_surface_frames() {
        let encoder = LoopbackEncoder::video(&VideoEncoderConfig::avc(2, 2));
        let surface = encoder.create_input_surface().unwrap();
        encoder.start().unwrap();

        let pixels: &[u8] = &[0u8; 16];
        let frame = |ts| SurfaceFrame {
            width: 2,
            height: 2,
            stride: 8,
            data: pixels,
            timestamp_us: ts,
        };
        for ts in 0..DEFAULT_OUTPUT_CAPACITY as i64 {
            surface.queue_frame(frame(ts)).unwrap();
        }
        for ts in 0..4 {
            assert!(matches!(
                surface.queue_frame(frame(1000 + ts)),
                Err(CodecError::OutputFull(_))
            ));
        }
        assert_eq!(encoder.frames_received(), DEFAULT_OUTPUT_CAPACITY as u64);

        let mut info = BufferInfo::default();
        encoder.dequeue_output_buffer(&mut info, Duration::ZERO).unwrap();
        drain_one(&encoder, &mut info);
        surface.queue_frame(frame(2000)).unwrap();
        assert_eq!(encoder.frames_received(), DEFAULT_OUTPUT_CAPACITY as u64 + 1);
    }

    #[test]
    fn undrained_output_rejects_audio_and_returns_slot() {
        let config = AudioEncoderConfig::aac(AudioFormat::new(44_100, 2, 16, 8));
        let encoder = LoopbackEncoder::audio(&config);
        encoder.start().unwrap();

        for pts in 0..DEFAULT_OUTPUT_CAPACITY as i64 {
            let slot = encoder.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
            encoder
                .queue_input_buffer(slot, &[0; 4], pts, BufferFlags::NONE)
                .unwrap();
        }
        let slot = encoder.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        assert!(matches!(
            encoder.queue_input_buffer(slot, &[0; 4], 99, BufferFlags::NONE),
            Err(CodecError::OutputFull(_))
        ));
        assert_eq!(encoder.inner.slots.available(), LOOPBACK_INPUT_SLOTS);
        assert_eq!(encoder.input_timestamps().len(), DEFAULT_OUTPUT_CAPACITY);
    }

    #[test]
    fn input_timestamps_keep_only_recent_chunks() {
        let config = AudioEncoderConfig::aac(AudioFormat::new(44_100, 2, 16, 8));
        let encoder = LoopbackEncoder::audio(&config);
        encoder.start().unwrap();

        let mut info = BufferInfo::default();
        let total = RECENT_INPUT_TIMESTAMPS as i64 + 10;
        for pts in 0..total {
            let slot = encoder.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
            encoder
                .queue_input_buffer(slot, &[0; 4], pts, BufferFlags::NONE)
                .unwrap();
            loop {
                match encoder.dequeue_output_buffer(&mut info, Duration::ZERO).unwrap() {
                    OutputStatus::Buffer(index) => encoder.release_output_buffer(index).unwrap(),
                    OutputStatus::FormatChanged => continue,
                    OutputStatus::TryAgainLater => break,
                }
            }
        }

        let kept = encoder.input_timestamps();
        assert_eq!(kept.len(), RECENT_INPUT_TIMESTAMPS);
        assert_eq!(kept.first(), Some(&10));
        assert_eq!(kept.last(), Some(&(total - 1)));
    }

    #[test]
    fn plain_factory_keeps_nothing() {
        let factory = LoopbackFactory::new();
        let encoder = factory
            .create_video_encoder(&VideoEncoderConfig::avc(2, 2))
            .unwrap();
        assert!(factory.video_encoders().is_empty());
        assert_eq!(Arc::strong_count(&encoder), 1);
    }

    #[test]
    fn factory_records_and_fails_on_request() {
        let factory = LoopbackFactory::recording();
        factory
            .create_video_encoder(&VideoEncoderConfig::avc(2, 2))
            .unwrap();
        assert_eq!(factory.video_encoders().len(), 1);

        factory.fail_creation(MediaKind::Audio, true);
        let config = AudioEncoderConfig::aac(AudioFormat::new(44_100, 2, 16, 8));
        assert!(factory.create_audio_encoder(&config).is_err());
        assert!(factory.audio_encoders().is_empty());
    }
}
