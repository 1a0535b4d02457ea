/*!
    Recorder error type.
*/

use std::time::Duration;

use codec_types::{CodecError, MediaKind};
use thiserror::Error;

use crate::worker::WorkerKind;

/**
    Errors produced by the recorder.

    Only [`VideoRecorder::start`](crate::VideoRecorder::start) returns these
    to the caller. Faults raised on worker threads are logged and handed to
    [`EncodedSink::on_error`](crate::EncodedSink::on_error).
*/
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("recorder has been released")]
    Released,

    #[error("renderer provider returned no renderer")]
    MissingRenderer,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Fault inside a running drain loop that was not caused by shutdown.
    #[error("{kind} drain failed: {source}")]
    Drain {
        kind: MediaKind,
        #[source]
        source: CodecError,
    },

    #[error("render error: {0}")]
    Render(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{worker} worker did not exit within {waited:?}")]
    StuckWorker { worker: WorkerKind, waited: Duration },

    #[error("invalid recorder config: {0}")]
    Config(#[from] serde_json::Error),
}

impl RecorderError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_error_names_track_and_cause() {
        let err = RecorderError::Drain {
            kind: MediaKind::Audio,
            source: CodecError::codec("boom"),
        };
        assert_eq!(err.to_string(), "audio drain failed: codec error: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn stuck_worker_mentions_worker() {
        let err = RecorderError::StuckWorker {
            worker: WorkerKind::VideoDrain,
            waited: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "video-drain worker did not exit within 50ms");
    }
}
