use thiserror::Error;

use crate::recording::domain::storage_error::StorageError;

/// Request-level failure of a session control operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// Caller error, e.g. submitting frames to a session that was never started.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ControlError {
    pub fn not_started(key: &str) -> Self {
        ControlError::InvalidState(format!("session {key} is not started"))
    }
}
