/*!
    Surface-fed video encoder.
*/

use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::{
    Dictionary, Rational as FFmpegRational,
    codec::{self, encoder::Video as VideoEncoderFFmpeg},
    ffi,
    format::Pixel,
    software::scaling::{context::Context as ScalerContext, flag::Flags as ScalerFlags},
    util::frame::video::Video as VideoFrameFFmpeg,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use codec_types::{
    BufferFlags, BufferInfo, CodecError, MediaKind, OutputFormat, OutputStatus, Result, mime,
};

use super::{codec_id_for_mime, extradata, ffmpeg_error};
use crate::config::VideoEncoderConfig;
use crate::encoder::MediaEncoder;
use crate::nal;
use crate::queue::{DEFAULT_OUTPUT_CAPACITY, EncodedPacket, OutputQueue, SURFACE_FULL_WAIT};
use crate::surface::{InputSurface, SurfaceConsumer, SurfaceFrame};

/// Microsecond time base shared by surface timestamps and packets.
const TIME_BASE_US: i32 = 1_000_000;

struct Scaler {
    context: ScalerContext,
    width: u32,
    height: u32,
}

struct VideoState {
    encoder: VideoEncoderFFmpeg,
    scaler: Option<Scaler>,
    last_pts: Option<i64>,
    surface: Option<InputSurface>,
    released: bool,
}

// The codec and scaler contexts are only touched with the state mutex held.
unsafe impl Send for VideoState {}

struct VideoShared {
    width: u32,
    height: u32,
    state: Mutex<VideoState>,
    output: OutputQueue,
}

impl VideoShared {
    fn encode(&self, frame: SurfaceFrame<'_>) -> Result<()> {
        self.output.wait_for_space(SURFACE_FULL_WAIT)?;
        let mut state = self.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }

        let stale = state
            .scaler
            .as_ref()
            .is_none_or(|s| s.width != frame.width || s.height != frame.height);
        if stale {
            debug!(
                "video scaler {}x{} -> {}x{}",
                frame.width, frame.height, self.width, self.height
            );
            let context = ScalerContext::get(
                Pixel::RGBA,
                frame.width,
                frame.height,
                Pixel::YUV420P,
                self.width,
                self.height,
                ScalerFlags::BILINEAR,
            )
            .map_err(|e| CodecError::codec(format!("failed to create scaler: {e}")))?;
            state.scaler = Some(Scaler {
                context,
                width: frame.width,
                height: frame.height,
            });
        }

        let mut src = VideoFrameFFmpeg::new(Pixel::RGBA, frame.width, frame.height);
        copy_rgba_rows(&mut src, &frame);

        let mut dst = VideoFrameFFmpeg::new(Pixel::YUV420P, self.width, self.height);
        if let Some(scaler) = state.scaler.as_mut() {
            scaler
                .context
                .run(&src, &mut dst)
                .map_err(|e| CodecError::codec(format!("scaling failed: {e}")))?;
        }

        // x264 rejects non-increasing timestamps.
        let pts = match state.last_pts {
            Some(last) if frame.timestamp_us <= last => last + 1,
            _ => frame.timestamp_us,
        };
        state.last_pts = Some(pts);
        dst.set_pts(Some(pts));

        state.encoder.send_frame(&dst).map_err(ffmpeg_error)?;
        receive_packets(&mut state.encoder, &self.output)
    }
}

impl SurfaceConsumer for VideoShared {
    fn on_frame(&self, frame: SurfaceFrame<'_>) -> Result<()> {
        self.encode(frame)
    }
}

/**
    H.264/H.265 encoder fed through an [`InputSurface`].

    Surface frames are RGBA; they are scaled to the configured size and
    converted to YUV420P before encoding. B-frames are disabled so output
    order equals presentation order.
*/
pub struct FfmpegVideoEncoder {
    name: String,
    shared: Arc<VideoShared>,
}

impl FfmpegVideoEncoder {
    pub fn new(config: &VideoEncoderConfig, preset: &str) -> Result<Self> {
        let codec_id = codec_id_for_mime(&config.format.mime)?;
        let codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            CodecError::unsupported_format(format!("codec {} not found", config.format.mime))
        })?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(ffmpeg_error)?;

        encoder.set_width(config.format.width);
        encoder.set_height(config.format.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_frame_rate(Some(FFmpegRational::new(config.frame_rate as i32, 1)));
        encoder.set_time_base(FFmpegRational::new(1, TIME_BASE_US));
        encoder.set_gop(config.gop_frames());
        encoder.set_max_b_frames(0);
        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_flags(codec::flag::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        opts.set("preset", preset);

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| CodecError::codec(format!("failed to open encoder: {e}")))?;

        // SAFETY: the encoder was just opened and is alive.
        let csd = match unsafe { extradata(encoder.as_ptr()) } {
            Some(data) if config.format.mime == mime::VIDEO_AVC => {
                nal::h264_parameter_sets(&data).map(Vec::from).unwrap_or_else(|| {
                    warn!("encoder extradata has no SPS/PPS pair");
                    vec![data]
                })
            }
            Some(data) => vec![data],
            None => Vec::new(),
        };

        let output = OutputQueue::new(DEFAULT_OUTPUT_CAPACITY);
        output.set_format(OutputFormat::new(config.format.mime.clone(), csd));

        Ok(Self {
            name: format!("ffmpeg-{}", codec.name()),
            shared: Arc::new(VideoShared {
                width: config.format.width,
                height: config.format.height,
                state: Mutex::new(VideoState {
                    encoder,
                    scaler: None,
                    last_pts: None,
                    surface: None,
                    released: false,
                }),
                output,
            }),
        })
    }
}

impl MediaEncoder for FfmpegVideoEncoder {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        if self.shared.state.lock().released {
            return Err(CodecError::Released);
        }
        Ok(())
    }

    fn create_input_surface(&self) -> Result<InputSurface> {
        let mut state = self.shared.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        let consumer: Arc<dyn SurfaceConsumer> = self.shared.clone();
        let surface = InputSurface::new(consumer, self.shared.width, self.shared.height);
        state.surface = Some(surface.clone());
        Ok(surface)
    }

    fn dequeue_input_buffer(&self, _timeout: Duration) -> Result<Option<usize>> {
        Err(CodecError::invalid_state("video encoder is fed through its surface"))
    }

    fn queue_input_buffer(&self, _: usize, _: &[u8], _: i64, _: BufferFlags) -> Result<()> {
        Err(CodecError::invalid_state("video encoder is fed through its surface"))
    }

    fn dequeue_output_buffer(&self, info: &mut BufferInfo, timeout: Duration) -> Result<OutputStatus> {
        self.shared.output.dequeue(info, timeout)
    }

    fn read_output_buffer(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.shared.output.read(index, dst)
    }

    fn release_output_buffer(&self, index: usize) -> Result<()> {
        self.shared.output.release(index)
    }

    fn output_format(&self) -> Result<OutputFormat> {
        self.shared
            .output
            .format()
            .ok_or_else(|| CodecError::invalid_state("output format not yet known"))
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.released {
            return Err(CodecError::Released);
        }
        state.encoder.send_eof().map_err(ffmpeg_error)?;
        receive_packets(&mut state.encoder, &self.shared.output)
    }

    fn release(&self) {
        let surface = {
            let mut state = self.shared.state.lock();
            if state.released {
                return;
            }
            state.released = true;
            state.scaler = None;
            state.surface.take()
        };
        if let Some(surface) = surface {
            surface.release();
        }
        self.shared.output.close();
    }
}

fn receive_packets(encoder: &mut VideoEncoderFFmpeg, output: &OutputQueue) -> Result<()> {
    let mut packet = ffmpeg_next::Packet::empty();
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let data = packet.data().map(|d| d.to_vec()).unwrap_or_default();
                output.push(EncodedPacket {
                    data,
                    presentation_time_us: packet.pts().unwrap_or_default(),
                    flags: if packet.is_key() {
                        BufferFlags::KEY_FRAME
                    } else {
                        BufferFlags::NONE
                    },
                });
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::AVERROR(ffi::EAGAIN) => {
                return Ok(());
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(e) => return Err(ffmpeg_error(e)),
        }
    }
}

/**
    Copy packed RGBA rows honoring both strides.
*/
fn copy_rgba_rows(dst: &mut VideoFrameFFmpeg, src: &SurfaceFrame<'_>) {
    let row_bytes = src.width as usize * 4;
    let dst_stride = dst.stride(0);
    let dst_data = dst.data_mut(0);

    for y in 0..src.height as usize {
        let src_start = y * src.stride;
        let dst_start = y * dst_stride;
        dst_data[dst_start..dst_start + row_bytes]
            .copy_from_slice(&src.data[src_start..src_start + row_bytes]);
    }
}
