use std::time::Duration;

use thiserror::Error;

/// Why a frame could not be classified. Always absorbed by the session:
/// the frame is treated as "no face".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("detection exceeded {0:?}")]
    Timeout(Duration),
    #[error("detector is still busy with an abandoned frame")]
    Busy,
    #[error("detector worker is gone")]
    WorkerGone,
    #[error("detector failed: {0}")]
    Failed(String),
}

impl From<Box<dyn std::error::Error>> for DetectionError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        match err.downcast::<DetectionError>() {
            Ok(inner) => *inner,
            Err(other) => DetectionError::Failed(other.to_string()),
        }
    }
}
