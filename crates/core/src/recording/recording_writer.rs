use chrono::{DateTime, Utc};

use crate::recording::domain::artifact_sink::{ArtifactSink, ArtifactStore};
use crate::recording::domain::recording_entry::RecordingEntry;
use crate::recording::domain::recording_writer_status::WriterStatus;
use crate::recording::domain::storage_error::StorageError;

/// Owns one in-progress recording artifact.
///
/// Frames are appended exactly in call order. `finalize` is idempotent: the
/// first call decides the outcome and later calls return the cached result.
pub struct RecordingWriter {
    filename: String,
    created_at: DateTime<Utc>,
    fps: f64,
    sink: Option<Box<dyn ArtifactSink>>,
    frame_count: u64,
    byte_size: u64,
    status: WriterStatus,
    outcome: Option<Result<RecordingEntry, StorageError>>,
}

impl RecordingWriter {
    pub fn open(
        store: &dyn ArtifactStore,
        filename: impl Into<String>,
        created_at: DateTime<Utc>,
        fps: f64,
    ) -> Result<Self, StorageError> {
        let filename = filename.into();
        let sink = store.create(&filename)?;
        log::debug!("Opened recording {filename}");
        Ok(Self {
            filename,
            created_at,
            fps,
            sink: Some(sink),
            frame_count: 0,
            byte_size: 0,
            status: WriterStatus::Open,
            outcome: None,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn status(&self) -> WriterStatus {
        self.status
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn is_open(&self) -> bool {
        self.status == WriterStatus::Open
    }

    /// Appends one encoded frame. A write error fails the whole recording.
    pub fn append_frame(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if self.status != WriterStatus::Open {
            return Err(StorageError::NotOpen(self.status));
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or(StorageError::NotOpen(self.status))?;
        if let Err(e) = sink.append(bytes) {
            self.fail(e.clone());
            return Err(e);
        }
        self.frame_count += 1;
        self.byte_size += bytes.len() as u64;
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<RecordingEntry, StorageError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        self.status = WriterStatus::Finalizing;
        let Some(mut sink) = self.sink.take() else {
            // Only reachable if a previous failure already recorded an outcome.
            return Err(StorageError::NotOpen(self.status));
        };

        if self.frame_count == 0 {
            sink.discard();
            let err = StorageError::EmptyRecording(self.filename.clone());
            self.status = WriterStatus::Failed;
            self.outcome = Some(Err(err.clone()));
            return Err(err);
        }

        let outcome = match sink.commit() {
            Ok(size_bytes) => {
                self.status = WriterStatus::Closed;
                Ok(RecordingEntry {
                    filename: self.filename.clone(),
                    size_bytes,
                    created_at: self.created_at,
                    duration_seconds: RecordingEntry::duration_for(self.frame_count, self.fps),
                })
            }
            Err(e) => {
                sink.discard();
                self.status = WriterStatus::Failed;
                Err(e)
            }
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn fail(&mut self, err: StorageError) {
        if let Some(mut sink) = self.sink.take() {
            sink.discard();
        }
        self.status = WriterStatus::Failed;
        self.outcome = Some(Err(err));
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        // A writer dropped while open never produces an entry.
        if let Some(mut sink) = self.sink.take() {
            log::warn!("Recording {} dropped without finalize", self.filename);
            sink.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Record {
        bytes: Vec<u8>,
        commits: usize,
        discarded: bool,
    }

    struct MemorySink {
        record: Arc<Mutex<Record>>,
        fail_append_after: Option<usize>,
        fail_commit: bool,
        appends: usize,
    }

    impl ArtifactSink for MemorySink {
        fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
            if self.fail_append_after.is_some_and(|n| self.appends >= n) {
                return Err(StorageError::Io {
                    context: "append".into(),
                    message: "disk full".into(),
                });
            }
            self.appends += 1;
            self.record.lock().unwrap().bytes.extend_from_slice(bytes);
            Ok(())
        }

        fn commit(&mut self) -> Result<u64, StorageError> {
            let mut record = self.record.lock().unwrap();
            record.commits += 1;
            if self.fail_commit {
                return Err(StorageError::Io {
                    context: "flush".into(),
                    message: "device gone".into(),
                });
            }
            Ok(record.bytes.len() as u64)
        }

        fn discard(&mut self) {
            self.record.lock().unwrap().discarded = true;
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        record: Arc<Mutex<Record>>,
        fail_append_after: Option<usize>,
        fail_commit: bool,
        fail_create: bool,
    }

    impl ArtifactStore for MemoryStore {
        fn create(&self, _filename: &str) -> Result<Box<dyn ArtifactSink>, StorageError> {
            if self.fail_create {
                return Err(StorageError::InsufficientSpace {
                    available: 1,
                    required: 2,
                });
            }
            Ok(Box::new(MemorySink {
                record: self.record.clone(),
                fail_append_after: self.fail_append_after,
                fail_commit: self.fail_commit,
                appends: 0,
            }))
        }
    }

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    fn open(store: &MemoryStore) -> RecordingWriter {
        RecordingWriter::open(store, "a.mjpeg", created(), 15.0).unwrap()
    }

    #[test]
    fn test_append_in_arrival_order() {
        let store = MemoryStore::default();
        let mut writer = open(&store);

        writer.append_frame(b"one").unwrap();
        writer.append_frame(b"two").unwrap();
        writer.append_frame(b"one").unwrap();

        assert_eq!(store.record.lock().unwrap().bytes, b"onetwoone");
        assert_eq!(writer.frame_count(), 3);
        assert_eq!(writer.byte_size(), 9);
        assert!(writer.is_open());
    }

    #[test]
    fn test_finalize_builds_entry() {
        let store = MemoryStore::default();
        let mut writer = open(&store);
        for _ in 0..30 {
            writer.append_frame(b"xx").unwrap();
        }

        let entry = writer.finalize().unwrap();

        assert_eq!(entry.filename, "a.mjpeg");
        assert_eq!(entry.size_bytes, 60);
        assert_eq!(entry.created_at, created());
        assert_relative_eq!(entry.duration_seconds, 2.0);
        assert_eq!(writer.status(), WriterStatus::Closed);
    }

    #[test]
    fn test_finalize_twice_returns_cached_entry() {
        let store = MemoryStore::default();
        let mut writer = open(&store);
        writer.append_frame(b"frame").unwrap();

        let first = writer.finalize().unwrap();
        let second = writer.finalize().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.record.lock().unwrap().commits, 1);
    }

    #[test]
    fn test_append_after_finalize_rejected() {
        let store = MemoryStore::default();
        let mut writer = open(&store);
        writer.append_frame(b"frame").unwrap();
        writer.finalize().unwrap();

        let err = writer.append_frame(b"late").unwrap_err();

        assert_eq!(err, StorageError::NotOpen(WriterStatus::Closed));
    }

    #[test]
    fn test_commit_failure_marks_failed_and_caches_error() {
        let store = MemoryStore {
            fail_commit: true,
            ..MemoryStore::default()
        };
        let mut writer = open(&store);
        writer.append_frame(b"frame").unwrap();

        let first = writer.finalize().unwrap_err();
        let second = writer.finalize().unwrap_err();

        assert_eq!(first, second);
        assert_eq!(writer.status(), WriterStatus::Failed);
        let record = store.record.lock().unwrap();
        assert_eq!(record.commits, 1);
        assert!(record.discarded);
    }

    #[test]
    fn test_append_failure_fails_recording() {
        let store = MemoryStore {
            fail_append_after: Some(1),
            ..MemoryStore::default()
        };
        let mut writer = open(&store);
        writer.append_frame(b"ok").unwrap();

        assert!(writer.append_frame(b"boom").is_err());
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert!(writer.finalize().is_err());
        assert!(store.record.lock().unwrap().discarded);
    }

    #[test]
    fn test_empty_recording_is_not_an_entry() {
        let store = MemoryStore::default();
        let mut writer = open(&store);

        let err = writer.finalize().unwrap_err();

        assert_eq!(err, StorageError::EmptyRecording("a.mjpeg".into()));
        assert!(store.record.lock().unwrap().discarded);
    }

    #[test]
    fn test_open_propagates_store_error() {
        let store = MemoryStore {
            fail_create: true,
            ..MemoryStore::default()
        };
        let result = RecordingWriter::open(&store, "a.mjpeg", created(), 15.0);
        assert!(matches!(
            result,
            Err(StorageError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn test_drop_while_open_discards() {
        let store = MemoryStore::default();
        {
            let mut writer = open(&store);
            writer.append_frame(b"frame").unwrap();
        }
        assert!(store.record.lock().unwrap().discarded);
    }
}
