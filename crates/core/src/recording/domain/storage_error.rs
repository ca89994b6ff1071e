use std::path::PathBuf;

use thiserror::Error;

use crate::recording::domain::recording_writer_status::WriterStatus;

/// Disk-side failure while creating, appending to or finalizing an artifact.
///
/// `Clone` so a writer can hand the same failure back on repeated finalize.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("recordings directory {path} is not writable: {reason}")]
    NotWritable { path: PathBuf, reason: String },
    #[error("not enough disk space: {available} bytes free, {required} required")]
    InsufficientSpace { available: u64, required: u64 },
    #[error("{context}: {message}")]
    Io { context: String, message: String },
    #[error("writer is {0:?}, not open")]
    NotOpen(WriterStatus),
    #[error("recording {0} has no frames")]
    EmptyRecording(String),
}

impl StorageError {
    pub fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }
}
