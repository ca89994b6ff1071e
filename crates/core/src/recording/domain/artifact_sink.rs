use crate::recording::domain::storage_error::StorageError;

/// Byte-level destination for one recording artifact.
///
/// Abstracts storage so the writer can be exercised without a disk and so
/// other backends can be plugged in.
pub trait ArtifactSink: Send {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Flushes and publishes the artifact. Returns its final size in bytes.
    fn commit(&mut self) -> Result<u64, StorageError>;

    /// Throws away whatever was written. Must be safe to call after a failure.
    fn discard(&mut self);
}

/// Creates sinks for newly opened recordings.
pub trait ArtifactStore: Send + Sync {
    fn create(&self, filename: &str) -> Result<Box<dyn ArtifactSink>, StorageError>;
}
