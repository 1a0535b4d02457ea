/*!
    Recorder configuration.
*/

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use codec_encode::{AudioEncoderConfig, AudioFormat, VideoEncoderConfig};
use serde::{Deserialize, Serialize};

use crate::error::RecorderResult;

/**
    Tunables for a [`VideoRecorder`](crate::VideoRecorder).

    Every field has a default, so a JSON file only needs the keys it changes.
*/
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Tag recorded on every worker's log span.
    pub log_tag: String,
    /// Bounded wait for a free audio input slot before a chunk is dropped.
    pub audio_input_timeout_ms: u64,
    /// Output poll timeout of the drain loops. Zero polls without blocking.
    pub drain_poll_timeout_ms: u64,
    /// How often shutdown re-checks its workers.
    pub shutdown_poll_interval_ms: u64,
    /// Upper bound on waiting for workers to exit; `None` waits forever.
    pub shutdown_timeout_ms: Option<u64>,
    pub video_frame_rate: u32,
    pub keyframe_interval_secs: u32,
    /// Video bitrate is `width * height * video_bits_per_pixel`.
    pub video_bits_per_pixel: u64,
    pub audio_bitrate: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_tag: "vidrec".to_string(),
            audio_input_timeout_ms: 10,
            drain_poll_timeout_ms: 0,
            shutdown_poll_interval_ms: 10,
            shutdown_timeout_ms: Some(5000),
            video_frame_rate: codec_encode::config::DEFAULT_FRAME_RATE,
            keyframe_interval_secs: codec_encode::config::DEFAULT_KEYFRAME_INTERVAL_SECS,
            video_bits_per_pixel: codec_encode::config::DEFAULT_BITS_PER_PIXEL,
            audio_bitrate: codec_encode::config::DEFAULT_AUDIO_BITRATE,
        }
    }
}

impl RecorderConfig {
    pub fn from_json(json: &str) -> RecorderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> RecorderResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_log_tag(mut self, tag: impl Into<String>) -> Self {
        self.log_tag = tag.into();
        self
    }

    pub fn audio_input_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_input_timeout_ms)
    }

    pub fn drain_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_poll_timeout_ms)
    }

    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    /**
        Encoder configuration for a session of the given codec and size.
    */
    pub fn video_encoder_config(&self, mime: &str, width: u32, height: u32) -> VideoEncoderConfig {
        VideoEncoderConfig::new(mime, width, height)
            .with_frame_rate(self.video_frame_rate)
            .with_keyframe_interval(self.keyframe_interval_secs)
            .with_bits_per_pixel(self.video_bits_per_pixel)
    }

    pub fn audio_encoder_config(&self, format: AudioFormat) -> AudioEncoderConfig {
        AudioEncoderConfig::aac(format).with_bitrate(self.audio_bitrate)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RecorderConfig::from_json(r#"{"log_tag":"cam","shutdown_timeout_ms":null}"#)
            .unwrap();
        assert_eq!(config.log_tag, "cam");
        assert_eq!(config.shutdown_timeout(), None);
        assert_eq!(config.audio_input_timeout(), Duration::from_millis(10));
        assert_eq!(config.shutdown_poll_interval(), Duration::from_millis(10));
        assert_eq!(config.audio_bitrate, 96_000);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RecorderConfig::from_json("{").unwrap_err();
        assert!(matches!(err, crate::RecorderError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"video_frame_rate": 24, "video_bits_per_pixel": 2}}"#).unwrap();

        let config = RecorderConfig::load(file.path()).unwrap();
        let video = config.video_encoder_config(codec_encode::mime::VIDEO_AVC, 640, 480);
        assert_eq!(video.frame_rate, 24);
        assert_eq!(video.bitrate, 640 * 480 * 2);
        assert_eq!(video.gop_frames(), 24);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RecorderConfig::load(Path::new("/nonexistent/vidrec.json")).unwrap_err();
        assert!(matches!(err, crate::RecorderError::Io(_)));
    }
}
