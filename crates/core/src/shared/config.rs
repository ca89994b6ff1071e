use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::session_config::SessionConfig;
use crate::shared::constants::{
    APP_DIR_NAME, DEFAULT_CONFIDENCE, DEFAULT_DETECTION_TIMEOUT, DEFAULT_FPS,
    DEFAULT_LIVENESS_CHECK_INTERVAL, DEFAULT_LIVENESS_TIMEOUT, DEFAULT_MIN_FREE_SPACE_BYTES,
    DEFAULT_NO_FACE_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_STATUS_BUFFER,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide recorder settings, loaded from a JSON file.
///
/// Every field has a default so a partial file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub recordings_dir: PathBuf,
    pub fps: f64,
    pub no_face_timeout_secs: f64,
    /// Explicit stop threshold; overrides `no_face_timeout_secs * fps`.
    pub no_face_frames: Option<u32>,
    pub queue_capacity: usize,
    pub liveness_timeout_secs: f64,
    pub liveness_check_interval_ms: u64,
    pub detection_timeout_ms: Option<u64>,
    pub status_buffer: usize,
    pub min_free_space_bytes: u64,
    pub confidence: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            fps: DEFAULT_FPS,
            no_face_timeout_secs: DEFAULT_NO_FACE_TIMEOUT.as_secs_f64(),
            no_face_frames: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            liveness_timeout_secs: DEFAULT_LIVENESS_TIMEOUT.as_secs_f64(),
            liveness_check_interval_ms: DEFAULT_LIVENESS_CHECK_INTERVAL.as_millis() as u64,
            detection_timeout_ms: Some(DEFAULT_DETECTION_TIMEOUT.as_millis() as u64),
            status_buffer: DEFAULT_STATUS_BUFFER,
            min_free_space_bytes: DEFAULT_MIN_FREE_SPACE_BYTES,
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

impl RecorderConfig {
    /// Loads configuration.
    ///
    /// An explicit path must exist and parse. Without one, the per-user
    /// config file is used when present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if self.no_face_timeout_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "no_face_timeout_secs must be non-negative, got {}",
                self.no_face_timeout_secs
            )));
        }
        checked_secs("no_face_timeout_secs", self.no_face_timeout_secs)?;
        checked_secs("frame interval (1 / fps)", 1.0 / self.fps)?;
        if self.no_face_frames == Some(0) {
            return Err(ConfigError::Invalid("no_face_frames must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.status_buffer == 0 {
            return Err(ConfigError::Invalid("status_buffer must be at least 1".into()));
        }
        if checked_secs("liveness_timeout_secs", self.liveness_timeout_secs)?.is_zero() {
            return Err(ConfigError::Invalid(
                "liveness_timeout_secs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::Invalid(format!(
                "confidence must be between 0.0 and 1.0, got {}",
                self.confidence
            )));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            fps: self.fps,
            no_face_timeout: saturating_secs(self.no_face_timeout_secs),
            no_face_frames: self.no_face_frames,
            queue_capacity: self.queue_capacity,
            liveness_timeout: saturating_secs(self.liveness_timeout_secs),
        }
    }

    pub fn detection_timeout(&self) -> Option<Duration> {
        self.detection_timeout_ms.map(Duration::from_millis)
    }

    /// Time between frames at the nominal rate.
    pub fn frame_interval(&self) -> Duration {
        saturating_secs(1.0 / self.fps)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms.max(1))
    }
}

fn checked_secs(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::Invalid(format!("{field} is not a representable duration: {secs}"))
    })
}

/// Values outside `Duration`'s range clamp instead of panicking; `validate`
/// rejects them up front.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

fn default_recordings_dir() -> PathBuf {
    dirs::video_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("recordings"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_threshold_is_five_seconds_at_fifteen_fps() {
        let config = RecorderConfig::default();
        assert_eq!(config.fps, 15.0);
        assert_eq!(config.session_config().stop_threshold(), 75);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"fps": 30.0, "no_face_frames": 12}"#).unwrap();

        let config = RecorderConfig::load(Some(&path)).unwrap();

        assert_eq!(config.fps, 30.0);
        assert_eq!(config.no_face_frames, Some(12));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.session_config().stop_threshold(), 12);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecorderConfig::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = RecorderConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[rstest]
    #[case::zero_fps(r#"{"fps": 0.0}"#)]
    #[case::zero_queue(r#"{"queue_capacity": 0}"#)]
    #[case::zero_threshold(r#"{"no_face_frames": 0}"#)]
    #[case::confidence_too_high(r#"{"confidence": 1.5}"#)]
    #[case::zero_status_buffer(r#"{"status_buffer": 0}"#)]
    #[case::huge_no_face_timeout(r#"{"no_face_timeout_secs": 1e20}"#)]
    #[case::huge_liveness_timeout(r#"{"liveness_timeout_secs": 1e20}"#)]
    #[case::zero_liveness_timeout(r#"{"liveness_timeout_secs": 0.0}"#)]
    #[case::negative_no_face_timeout(r#"{"no_face_timeout_secs": -1.0}"#)]
    #[case::tiny_fps(r#"{"fps": 1e-300}"#)]
    fn test_invalid_values_rejected(#[case] json: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, json).unwrap();
        let err = RecorderConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_out_of_range_durations_never_panic() {
        let config = RecorderConfig {
            no_face_timeout_secs: 1e20,
            liveness_timeout_secs: f64::NAN,
            fps: 1e-300,
            ..RecorderConfig::default()
        };

        assert!(config.validate().is_err());
        let session = config.session_config();
        assert_eq!(session.no_face_timeout, Duration::MAX);
        assert_eq!(session.liveness_timeout, Duration::ZERO);
        assert_eq!(config.frame_interval(), Duration::MAX);
    }

    #[test]
    fn test_frame_interval_at_default_rate() {
        let interval = RecorderConfig::default().frame_interval();
        assert_eq!(interval, Duration::from_secs_f64(1.0 / 15.0));
    }

    #[test]
    fn test_detection_timeout_optional() {
        let config = RecorderConfig {
            detection_timeout_ms: None,
            ..RecorderConfig::default()
        };
        assert!(config.detection_timeout().is_none());
        assert_eq!(
            RecorderConfig::default().detection_timeout(),
            Some(Duration::from_millis(2000))
        );
    }
}
