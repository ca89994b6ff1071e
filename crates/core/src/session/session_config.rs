use std::time::Duration;

use crate::shared::constants::{
    DEFAULT_FPS, DEFAULT_LIVENESS_TIMEOUT, DEFAULT_NO_FACE_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
};

/// Per-session tuning, derived from `RecorderConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Nominal frame rate of the incoming stream.
    pub fps: f64,
    pub no_face_timeout: Duration,
    /// Explicit stop threshold in frames. Wins over `no_face_timeout`.
    pub no_face_frames: Option<u32>,
    pub queue_capacity: usize,
    pub liveness_timeout: Duration,
}

impl SessionConfig {
    /// Consecutive no-face frames that end an automatic recording.
    pub fn stop_threshold(&self) -> u32 {
        self.no_face_frames.unwrap_or_else(|| {
            let frames = (self.no_face_timeout.as_secs_f64() * self.fps).ceil();
            (frames as u32).max(1)
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            no_face_timeout: DEFAULT_NO_FACE_TIMEOUT,
            no_face_frames: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(15.0, 5.0, None, 75)]
    #[case(30.0, 5.0, None, 150)]
    #[case(10.0, 0.25, None, 3)]
    #[case(15.0, 0.0, None, 1)]
    #[case(15.0, 5.0, Some(3), 3)]
    fn test_stop_threshold(
        #[case] fps: f64,
        #[case] timeout_secs: f64,
        #[case] frames: Option<u32>,
        #[case] expected: u32,
    ) {
        let config = SessionConfig {
            fps,
            no_face_timeout: Duration::from_secs_f64(timeout_secs),
            no_face_frames: frames,
            ..SessionConfig::default()
        };
        assert_eq!(config.stop_threshold(), expected);
    }
}
