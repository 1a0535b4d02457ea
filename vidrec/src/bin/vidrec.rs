use std::f32::consts::TAU;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use codec_encode::aac;
use codec_encode::loopback::LoopbackFactory;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vidrec::{
    ConfigurationBlobs, CpuContext, EncodedSink, EncodedUnit, EncoderFactory, RecorderConfig,
    RecorderError, RecorderResult, RenderWindow, Renderer, RendererProvider, VideoRecorder, mime,
    time,
};

/// Length of one pushed PCM chunk.
const CHUNK_MILLIS: u32 = 20;

/**
    Record an animated test pattern and a sine tone into elementary streams.
*/
#[derive(Parser)]
#[command(name = "vidrec")]
struct Cli {
    /// Directory the streams are written to.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Encoder backend.
    #[arg(short, long, value_enum, default_value = "loopback")]
    backend: Backend,

    /// Video codec mime type.
    #[arg(long, default_value = mime::VIDEO_AVC)]
    mime: String,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Recording length in seconds.
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,

    /// Render rate cap.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    channels: u16,

    /// Record video only.
    #[arg(long)]
    no_audio: bool,

    /// JSON recorder configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Loopback,
    Ffmpeg,
}

impl Backend {
    fn factory(self) -> Result<Arc<dyn EncoderFactory>> {
        match self {
            Self::Loopback => Ok(Arc::new(LoopbackFactory::new())),
            #[cfg(feature = "ffmpeg")]
            Self::Ffmpeg => Ok(Arc::new(codec_encode::ffmpeg::FfmpegFactory::new())),
            #[cfg(not(feature = "ffmpeg"))]
            Self::Ffmpeg => bail!("built without the `ffmpeg` feature"),
        }
    }

    fn audio_extension(self) -> &'static str {
        match self {
            Self::Loopback => "pcm",
            Self::Ffmpeg => "aac",
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RecorderConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RecorderConfig::default(),
    };
    if cli.width == 0 || cli.height == 0 {
        bail!("invalid video size {}x{}", cli.width, cli.height);
    }
    fs::create_dir_all(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;

    let audio_path = cli
        .output
        .join(format!("audio.{}", cli.backend.audio_extension()));
    let sink = Arc::new(FileSink::new(
        (!cli.no_audio).then_some(audio_path.as_path()),
        (cli.backend == Backend::Ffmpeg).then_some((cli.sample_rate, cli.channels)),
    )?);

    let recorder = VideoRecorder::new(cli.backend.factory()?, test_pattern(), config)?;
    recorder.set_sink(Some(sink.clone()));
    recorder.set_render_fps(cli.fps);

    let chunk_bytes = (cli.sample_rate * u32::from(cli.channels) * 2 * CHUNK_MILLIS / 1000) as usize;
    if !cli.no_audio {
        recorder.set_audio_params(cli.sample_rate, cli.channels, 16, chunk_bytes);
    }

    recorder.start(Some(Arc::new(CpuContext::new())), &cli.mime, cli.width, cli.height)?;

    let running = Arc::new(AtomicBool::new(true));
    let recorder = Arc::new(recorder);
    let tone = (!cli.no_audio)
        .then(|| {
            let recorder = Arc::clone(&recorder);
            let running = Arc::clone(&running);
            let (rate, channels) = (cli.sample_rate, cli.channels);
            thread::Builder::new()
                .name("tone".into())
                .spawn(move || push_tone(&recorder, &running, rate, channels, chunk_bytes))
        })
        .transpose()?;

    let deadline = Instant::now() + Duration::from_secs(cli.seconds);
    let mut blobs = None;
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(500));
        if blobs.is_none() {
            blobs = recorder.configuration_blobs();
        }
        info!(
            "recording {} video, {} audio",
            time::format_hms(recorder.encode_time_millis()),
            time::format_hms(recorder.audio_time_us() / 1000)
        );
    }

    running.store(false, Ordering::Release);
    if let Some(tone) = tone {
        let _ = tone.join();
    }
    recorder.stop();
    recorder.sync();
    recorder.release();
    recorder.sync();

    if let Some(error) = sink.first_error() {
        warn!("recording reported errors, first: {error}");
    }
    let video_path = cli.output.join(match cli.mime.as_str() {
        mime::VIDEO_HEVC => "video.h265",
        _ => "video.h264",
    });
    let written = sink.finish(&video_path, blobs.as_ref())?;
    info!("wrote {} bytes to {}", written, video_path.display());
    Ok(())
}

/**
    Collects encoded units. Video is kept in memory so the parameter sets,
    which arrive out of band, can lead the file.
*/
struct FileSink {
    video: Mutex<Vec<u8>>,
    audio: Option<Mutex<BufWriter<File>>>,
    adts: Option<(u32, u16)>,
    errors: Mutex<Vec<String>>,
}

impl FileSink {
    fn new(audio_path: Option<&Path>, adts: Option<(u32, u16)>) -> Result<Self> {
        let audio = audio_path
            .map(|path| {
                File::create(path)
                    .map(|file| Mutex::new(BufWriter::new(file)))
                    .with_context(|| format!("failed to create {}", path.display()))
            })
            .transpose()?;
        Ok(Self {
            video: Mutex::new(Vec::new()),
            audio,
            adts,
            errors: Mutex::new(Vec::new()),
        })
    }

    fn write_audio(&self, unit: &EncodedUnit<'_>) -> RecorderResult<()> {
        let Some(audio) = &self.audio else {
            return Ok(());
        };
        let mut audio = audio.lock();
        if let Some((rate, channels)) = self.adts {
            let header = aac::adts_header(rate, channels, unit.size()).ok_or_else(|| {
                RecorderError::invalid_config(format!("no ADTS header for {rate}Hz x{channels}"))
            })?;
            audio.write_all(&header)?;
        }
        audio.write_all(unit.data)?;
        Ok(())
    }

    fn first_error(&self) -> Option<String> {
        self.errors.lock().first().cloned()
    }

    fn finish(&self, video_path: &Path, blobs: Option<&ConfigurationBlobs>) -> Result<usize> {
        if let Some(audio) = &self.audio {
            audio.lock().flush().context("failed to flush audio")?;
        }
        let mut file = BufWriter::new(
            File::create(video_path)
                .with_context(|| format!("failed to create {}", video_path.display()))?,
        );
        let mut written = 0;
        if let Some(blobs) = blobs {
            for blob in [&blobs.csd0, &blobs.csd1] {
                file.write_all(blob)?;
                written += blob.len();
            }
        } else {
            warn!("no parameter sets were announced, stream may not be decodable");
        }
        let video = self.video.lock();
        file.write_all(&video)?;
        file.flush()?;
        Ok(written + video.len())
    }
}

impl EncodedSink for FileSink {
    fn on_video_data(&self, unit: EncodedUnit<'_>) {
        // Parameter sets are written once from the configuration blobs.
        if !unit.is_codec_config {
            self.video.lock().extend_from_slice(unit.data);
        }
    }

    fn on_audio_data(&self, unit: EncodedUnit<'_>) {
        if unit.is_codec_config {
            return;
        }
        if let Err(e) = self.write_audio(&unit) {
            self.on_error(&e);
        }
    }

    fn on_error(&self, error: &RecorderError) {
        warn!("sink error: {error}");
        self.errors.lock().push(error.to_string());
    }
}

/// Scrolling colour bars.
struct TestPattern {
    frame: u32,
    width: u32,
}

impl Renderer for TestPattern {
    fn on_surface_changed(&mut self, width: u32, _height: u32) {
        self.width = width.max(1);
    }

    fn on_draw_frame(&mut self, window: &mut dyn RenderWindow) -> RecorderResult<()> {
        const BARS: [[u8; 4]; 7] = [
            [235, 235, 235, 255],
            [235, 235, 16, 255],
            [16, 235, 235, 255],
            [16, 235, 16, 255],
            [235, 16, 235, 255],
            [235, 16, 16, 255],
            [16, 16, 235, 255],
        ];
        let width = self.width as usize;
        let shift = self.frame as usize * 4;
        let pixels = window
            .pixels_mut()
            .ok_or_else(|| RecorderError::render("window has no pixel buffer"))?;
        for (i, pixel) in pixels.chunks_exact_mut(4).enumerate() {
            let x = (i % width + shift) % width;
            pixel.copy_from_slice(&BARS[x * BARS.len() / width]);
        }
        self.frame = self.frame.wrapping_add(1);
        Ok(())
    }
}

fn test_pattern() -> RendererProvider {
    Arc::new(|| Some(Box::new(TestPattern { frame: 0, width: 1 }) as Box<dyn Renderer>))
}

/// Push a 440 Hz tone in real time until `running` clears.
fn push_tone(
    recorder: &VideoRecorder,
    running: &AtomicBool,
    sample_rate: u32,
    channels: u16,
    chunk_bytes: usize,
) {
    let frames = chunk_bytes / (usize::from(channels) * 2);
    let step = TAU * 440.0 / sample_rate as f32;
    let mut phase = 0.0f32;
    let mut chunk = Vec::with_capacity(chunk_bytes);
    let period = Duration::from_millis(u64::from(CHUNK_MILLIS));
    let mut next = Instant::now();

    while running.load(Ordering::Acquire) {
        chunk.clear();
        for _ in 0..frames {
            let sample = ((phase.sin() * 0.25) * f32::from(i16::MAX)) as i16;
            for _ in 0..channels {
                chunk.extend_from_slice(&sample.to_le_bytes());
            }
            phase = (phase + step) % TAU;
        }
        recorder.on_audio_pcm(&chunk);

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
    }
}
