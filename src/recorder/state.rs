//! Recorder state types
//!
//! Lifecycle phases, the configuration surface accepted before `start`, the
//! listener event vocabulary, and per-run session records.

use crate::utils::{RecorderError, RecorderResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of the recorder state machine.
///
/// Configuration is accepted only in `Initialized`/`Configured`. `Error` is
/// entered on asynchronous runtime failures (camera loss, audio device death)
/// and left only through `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Initialized,
    Configured,
    Recording,
    Paused,
    Stopped,
    Error,
}

impl Default for LifecyclePhase {
    fn default() -> Self {
        Self::Initialized
    }
}

/// Who owns the lifetime of a bound camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraOwnership {
    /// Supplied externally, already running. Returned to the caller still
    /// running; the recorder only stops frame delivery.
    Hot,
    /// Acquired for this recording. The recorder stops and disconnects it.
    Cold,
}

/// Audio capture source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceKind {
    Mic,
    Camcorder,
}

/// Audio encoder kind requested of the downstream encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoderKind {
    AmrNb,
    AmrWb,
    Aac,
}

/// Video capture source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSourceKind {
    Default,
    Camera,
}

/// Video encoder kind requested of the downstream encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoEncoderKind {
    H263,
    H264,
    Mpeg4,
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    ThreeGpp,
    Mpeg4,
}

/// Default output size cap: just under 2 GiB, respecting 32-bit container
/// offset limits.
pub const MAX_FILE_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024 - 64 * 1024;

/// Full configuration surface accepted before `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderConfig {
    // Audio
    pub audio_source: AudioSourceKind,
    pub audio_encoder: AudioEncoderKind,
    pub sample_rate: u32,
    pub channels: u32,
    pub audio_bit_rate: u32,

    // Video
    pub video_source: VideoSourceKind,
    pub video_encoder: VideoEncoderKind,
    pub camera_id: i32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub video_bit_rate: u32,
    /// Clockwise rotation; one of 0, 90, 180, 270.
    pub rotation_degrees: u32,

    // Output
    pub output_format: OutputFormat,
    /// 0 means unlimited.
    pub max_duration_us: i64,
    pub max_file_size_bytes: u64,
    /// File descriptor of the opened output, owned by the caller.
    pub output_fd: Option<i32>,

    // Time-lapse
    pub time_lapse_enabled: bool,
    /// Real time between two admitted captures when time-lapse is enabled.
    pub time_between_capture_us: i64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            audio_source: AudioSourceKind::Camcorder,
            audio_encoder: AudioEncoderKind::Aac,
            sample_rate: 44_100,
            channels: 1,
            audio_bit_rate: 96_000,
            video_source: VideoSourceKind::Camera,
            video_encoder: VideoEncoderKind::H264,
            camera_id: 0,
            width: 0,
            height: 0,
            frame_rate: 0,
            video_bit_rate: 0,
            rotation_degrees: 0,
            output_format: OutputFormat::Mpeg4,
            max_duration_us: 0,
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
            output_fd: None,
            time_lapse_enabled: false,
            time_between_capture_us: 0,
        }
    }
}

impl RecorderConfig {
    /// Fail-fast validation run at `prepare`.
    pub fn validate(&self) -> RecorderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RecorderError::Configuration(format!(
                "invalid video size {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(RecorderError::Configuration(
                "video frame rate is not set".into(),
            ));
        }
        if self.video_bit_rate == 0 || self.audio_bit_rate == 0 {
            return Err(RecorderError::Configuration("bit rate is not set".into()));
        }
        if self.sample_rate == 0 {
            return Err(RecorderError::Configuration(
                "audio sample rate is not set".into(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(RecorderError::Configuration(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if !matches!(self.rotation_degrees, 0 | 90 | 180 | 270) {
            return Err(RecorderError::Configuration(format!(
                "unsupported rotation {} degrees",
                self.rotation_degrees
            )));
        }
        if self.max_file_size_bytes == 0 {
            return Err(RecorderError::Configuration(
                "max file size must be positive".into(),
            ));
        }
        if self.max_duration_us < 0 {
            return Err(RecorderError::Configuration(
                "max duration must not be negative".into(),
            ));
        }
        if self.time_lapse_enabled && self.time_between_capture_us <= 0 {
            return Err(RecorderError::Configuration(
                "time-lapse capture interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Output frame spacing derived from the configured frame rate. Fixed for
    /// the session; revalidated only at `prepare`.
    pub fn time_between_frames_us(&self) -> i64 {
        1_000_000 / self.frame_rate as i64
    }
}

/// Events delivered to listeners via [`Recorder::subscribe`](crate::recorder::Recorder::subscribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum RecorderEvent {
    Started,
    Paused,
    Resumed,
    Stopped,
    /// The configured duration cap was reached; recording stopped normally.
    MaxDurationReached,
    /// The configured size cap was reached; recording stopped normally.
    MaxFileSizeReached,
    /// The camera producer died; the recorder is in the Error phase.
    CameraLost,
    /// An asynchronous runtime failure; the recorder is in the Error phase.
    Error(String),
}

/// One uninterrupted recording span between start/resume and pause/stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Session index (0, 1, 2, ...)
    pub index: usize,

    /// Duration of this session in microseconds.
    pub duration_us: i64,

    /// Unix timestamp when the session started, in milliseconds.
    pub unix_start_ms: u64,

    /// Unix timestamp when the session ended.
    pub unix_end_ms: u64,
}

impl RecordingSession {
    /// Create a new session starting now.
    pub fn begin(index: usize) -> Self {
        let now = Utc::now().timestamp_millis() as u64;
        Self {
            index,
            duration_us: 0,
            unix_start_ms: now,
            unix_end_ms: now,
        }
    }

    /// Close the session with its measured duration.
    pub fn end(&mut self, duration_us: i64) {
        self.duration_us = duration_us;
        self.unix_end_ms = Utc::now().timestamp_millis() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RecorderConfig {
        RecorderConfig {
            width: 1280,
            height: 720,
            frame_rate: 30,
            video_bit_rate: 4_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_rotation() {
        let mut config = valid_config();
        config.rotation_degrees = 45;
        assert!(matches!(
            config.validate(),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_missing_size_and_rate() {
        let mut config = valid_config();
        config.width = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.frame_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_time_lapse_needs_interval() {
        let mut config = valid_config();
        config.time_lapse_enabled = true;
        config.time_between_capture_us = 0;
        assert!(config.validate().is_err());

        config.time_between_capture_us = 1_000_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frame_spacing_from_frame_rate() {
        let mut config = valid_config();
        config.frame_rate = 25;
        assert_eq!(config.time_between_frames_us(), 40_000);
    }

    #[test]
    fn test_default_size_cap_under_two_gib() {
        let config = RecorderConfig::default();
        assert_eq!(config.max_file_size_bytes, 2_147_418_112);
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_string(&RecorderEvent::MaxFileSizeReached).unwrap();
        assert!(json.contains("maxFileSizeReached"));
    }
}
