/*!
    Capture and encode pipeline for rendered video and pushed PCM audio.

    A [`VideoRecorder`] owns one recording session at a time. Starting a
    session creates a video encoder with an input surface, an optional audio
    encoder, and three workers:

    - a render driver that draws frames into a window bound to the surface,
    - a video drain that forwards encoded units to the [`EncodedSink`],
    - an audio drain that does the same for audio, fed by
      [`VideoRecorder::on_audio_pcm`].

    Lifecycle calls are serialized on a command thread. Stopping asks every
    worker to exit, waits for them with a bounded poll, and only then
    releases the window, the surface and the encoders.
*/

mod command;
mod config;
mod drain;
mod error;
mod recorder;
pub mod render;
mod session;
mod sink;
pub mod time;
mod track;
mod worker;

#[cfg(test)]
mod testing;

pub use codec_encode::{AudioFormat, EncoderFactory, MediaKind, mime};

pub use config::RecorderConfig;
pub use error::{RecorderError, RecorderResult};
pub use recorder::VideoRecorder;
pub use render::{CpuContext, RenderContext, RenderMode, RenderWindow, Renderer, RendererProvider};
pub use session::SessionState;
pub use sink::{EncodedSink, EncodedUnit};
pub use track::ConfigurationBlobs;
pub use worker::WorkerKind;
