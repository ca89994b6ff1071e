use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::recording::domain::artifact_sink::{ArtifactSink, ArtifactStore};
use crate::recording::domain::recording_entry::RecordingEntry;
use crate::recording::domain::storage_error::StorageError;
use crate::recording::infrastructure::file_artifact_sink::FileArtifactSink;
use crate::recording::infrastructure::mjpeg;
use crate::recording::recording_namer::{is_artifact_name, parse_created_at, RecordingNamer};
use crate::recording::recording_writer::RecordingWriter;
use crate::shared::constants::PARTIAL_EXTENSION;
use crate::shared::size_format::human_size;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("recording not found: {0}")]
    NotFound(String),
    #[error("not a valid recording: {0}")]
    InvalidArtifact(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Snapshot of the storage area, newest recording first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingListing {
    pub entries: Vec<RecordingEntry>,
    pub total_size_bytes: u64,
}

impl RecordingListing {
    pub fn total_count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_size_human(&self) -> String {
        human_size(self.total_size_bytes)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.iter().any(|e| e.filename == filename)
    }
}

#[derive(Clone, Copy)]
struct ScanKey {
    len: u64,
    modified: Option<SystemTime>,
}

struct CachedScan {
    key: ScanKey,
    frames: u64,
}

/// View over the flat directory of finished artifacts.
///
/// The directory is the source of truth: every listing re-reads it, so files
/// dropped in or deleted by hand are reflected. Only per-file frame counts
/// are cached, keyed by size and mtime.
///
/// Publishing (rename into place) and deletion take the write side of
/// `visibility`; directory listing and reads take the read side. Frame
/// counting for durations happens after the read side is released.
pub struct RecordingCatalog {
    dir: PathBuf,
    fps: f64,
    min_free_space_bytes: u64,
    visibility: Arc<RwLock<()>>,
    scans: Mutex<HashMap<String, CachedScan>>,
}

impl RecordingCatalog {
    /// Opens (creating if needed) the storage area and recovers any partial
    /// artifacts left behind by a crash.
    pub fn open(
        dir: impl Into<PathBuf>,
        fps: f64,
        min_free_space_bytes: u64,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::NotWritable {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        let catalog = Self {
            dir,
            fps,
            min_free_space_bytes,
            visibility: Arc::new(RwLock::new(())),
            scans: Mutex::new(HashMap::new()),
        };
        catalog.recover_partials()?;
        log::info!("Recordings directory: {}", catalog.dir.display());
        Ok(catalog)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Result<RecordingListing, CatalogError> {
        let files = self.stat_artifacts()?;

        let mut entries = Vec::with_capacity(files.len());
        for (filename, key) in files {
            let Some(frames) = self.frame_count(&filename, key) else {
                // Deleted since the directory was read.
                continue;
            };
            let created_at = parse_created_at(&filename)
                .or_else(|| key.modified.map(DateTime::<Utc>::from))
                .unwrap_or_default();
            entries.push(RecordingEntry {
                filename,
                size_bytes: key.len,
                created_at,
                duration_seconds: RecordingEntry::duration_for(frames, self.fps),
            });
        }

        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        let total_size_bytes = entries.iter().map(|e| e.size_bytes).sum();
        Ok(RecordingListing {
            entries,
            total_size_bytes,
        })
    }

    /// Stores an uploaded MJPEG stream as a new recording.
    ///
    /// The payload must consist of complete JPEG frames only; it goes
    /// through the same partial-then-publish path as live recordings.
    pub fn import(&self, namer: &RecordingNamer, data: &[u8]) -> Result<RecordingEntry, CatalogError> {
        let frames = mjpeg::split_frames(data);
        let complete_len: usize = frames.iter().map(|frame| frame.len()).sum();
        if frames.is_empty() {
            return Err(CatalogError::InvalidArtifact(
                "no complete JPEG frame in upload".into(),
            ));
        }
        if complete_len != data.len() {
            return Err(CatalogError::InvalidArtifact(format!(
                "{} trailing bytes after the last complete frame",
                data.len() - complete_len
            )));
        }

        let created_at = Utc::now();
        let mut writer = RecordingWriter::open(self, namer.next_name(created_at), created_at, self.fps)?;
        for frame in frames {
            writer.append_frame(frame)?;
        }
        let entry = writer.finalize()?;
        log::info!(
            "Imported recording {} ({} frames, {})",
            entry.filename,
            writer.frame_count(),
            human_size(entry.size_bytes)
        );
        Ok(entry)
    }

    pub fn get(&self, filename: &str) -> Result<Vec<u8>, CatalogError> {
        if !is_artifact_name(filename) {
            return Err(CatalogError::NotFound(filename.to_string()));
        }
        let _guard = self
            .visibility
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::read(self.dir.join(filename)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CatalogError::NotFound(filename.to_string()),
            _ => StorageError::io(format!("read {filename}"), &e).into(),
        })
    }

    pub fn delete(&self, filename: &str) -> Result<(), CatalogError> {
        if !is_artifact_name(filename) {
            return Err(CatalogError::NotFound(filename.to_string()));
        }
        let _guard = self
            .visibility
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::remove_file(self.dir.join(filename)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CatalogError::NotFound(filename.to_string()),
            _ => StorageError::io(format!("delete {filename}"), &e).into(),
        })?;
        self.scans().remove(filename);
        log::info!("Deleted recording {filename}");
        Ok(())
    }

    pub fn total_size(&self) -> Result<u64, CatalogError> {
        Ok(self.list()?.total_size_bytes)
    }

    /// Names and stats of the published artifacts, taken under the read
    /// side of `visibility`.
    fn stat_artifacts(&self) -> Result<Vec<(String, ScanKey)>, CatalogError> {
        let _guard = self
            .visibility
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let read_dir = fs::read_dir(&self.dir)
            .map_err(|e| StorageError::io(format!("list {}", self.dir.display()), &e))?;

        let mut files = Vec::new();
        for dir_entry in read_dir.flatten() {
            let Some(filename) = dir_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_artifact_name(&filename) {
                continue;
            }
            let metadata = match dir_entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                // Deleted between readdir and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::io(format!("stat {filename}"), &e).into());
                }
            };
            let key = ScanKey {
                len: metadata.len(),
                modified: metadata.modified().ok(),
            };
            files.push((filename, key));
        }
        Ok(files)
    }

    /// Frame count from the cache, or a streaming scan of the file. `None`
    /// when the file disappeared.
    fn frame_count(&self, filename: &str, key: ScanKey) -> Option<u64> {
        if let Some(cached) = self.scans().get(filename) {
            if cached.key.len == key.len && cached.key.modified == key.modified {
                return Some(cached.frames);
            }
        }

        let scanned = File::open(self.dir.join(filename)).and_then(mjpeg::scan_reader);
        let frames = match scanned {
            Ok(scan) => scan.frames,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.scans().remove(filename);
                return None;
            }
            Err(e) => {
                log::warn!("Could not scan {filename}: {e}");
                return Some(0);
            }
        };
        self.scans()
            .insert(filename.to_string(), CachedScan { key, frames });
        Some(frames)
    }

    fn scans(&self) -> MutexGuard<'_, HashMap<String, CachedScan>> {
        self.scans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_free_space(&self) -> Result<(), StorageError> {
        if self.min_free_space_bytes == 0 {
            return Ok(());
        }
        match fs2::statvfs(&self.dir) {
            Ok(stats) if stats.available_space() < self.min_free_space_bytes => {
                Err(StorageError::InsufficientSpace {
                    available: stats.available_space(),
                    required: self.min_free_space_bytes,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                log::debug!("Free space check skipped for {}: {e}", self.dir.display());
                Ok(())
            }
        }
    }

    /// Truncates each leftover `.part` file to its last complete frame and
    /// publishes it. Partials without a single complete frame are removed.
    fn recover_partials(&self) -> Result<(), StorageError> {
        let suffix = format!(".{PARTIAL_EXTENSION}");
        let read_dir = fs::read_dir(&self.dir).map_err(|e| StorageError::NotWritable {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;

        for dir_entry in read_dir.flatten() {
            let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(final_name) = name.strip_suffix(&suffix) else {
                continue;
            };
            if !is_artifact_name(final_name) {
                continue;
            }
            let part_path = dir_entry.path();
            let final_path = self.dir.join(final_name);
            if let Err(e) = recover_one(&part_path, &final_path) {
                log::warn!("Could not recover {name}: {e}");
            }
        }
        Ok(())
    }
}

fn recover_one(part_path: &Path, final_path: &Path) -> Result<(), StorageError> {
    let context = |what: &str| format!("{what} {}", part_path.display());
    let file = File::open(part_path).map_err(|e| StorageError::io(context("open"), &e))?;
    let total_len = file
        .metadata()
        .map_err(|e| StorageError::io(context("stat"), &e))?
        .len();
    let scan = mjpeg::scan_reader(file).map_err(|e| StorageError::io(context("read"), &e))?;

    if scan.frames == 0 || final_path.exists() {
        fs::remove_file(part_path).map_err(|e| StorageError::io(context("remove"), &e))?;
        log::info!("Removed unrecoverable partial {}", part_path.display());
        return Ok(());
    }

    if scan.is_truncated(total_len) {
        let file = OpenOptions::new()
            .write(true)
            .open(part_path)
            .map_err(|e| StorageError::io(context("open"), &e))?;
        file.set_len(scan.complete_len)
            .map_err(|e| StorageError::io(context("truncate"), &e))?;
        file.sync_all()
            .map_err(|e| StorageError::io(context("sync"), &e))?;
    }
    fs::rename(part_path, final_path).map_err(|e| StorageError::io(context("publish"), &e))?;
    log::info!(
        "Recovered {} ({} frames) from an interrupted recording",
        final_path.display(),
        scan.frames
    );
    Ok(())
}

impl ArtifactStore for RecordingCatalog {
    fn create(&self, filename: &str) -> Result<Box<dyn ArtifactSink>, StorageError> {
        if !is_artifact_name(filename) {
            return Err(StorageError::NotWritable {
                path: self.dir.join(filename),
                reason: "not a valid artifact name".into(),
            });
        }
        self.check_free_space()?;
        let sink = FileArtifactSink::create(&self.dir, filename, self.visibility.clone())?;
        Ok(Box::new(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use image::{ImageBuffer, Rgb};
    use rstest::rstest;
    use std::io::Cursor;

    const FPS: f64 = 10.0;

    fn jpeg(seed: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(16, 16, |x, y| Rgb([(x as u8).wrapping_mul(seed), y as u8, seed]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, secs).unwrap()
    }

    fn name(secs: u32) -> String {
        format!("recording_20261018_1200{secs:02}_000_0000.mjpeg")
    }

    fn record(catalog: &RecordingCatalog, filename: &str, frames: u8) -> RecordingEntry {
        let mut writer = RecordingWriter::open(catalog, filename, at(0), FPS).unwrap();
        for i in 0..frames {
            writer.append_frame(&jpeg(i + 1)).unwrap();
        }
        writer.finalize().unwrap()
    }

    fn open(dir: &Path) -> RecordingCatalog {
        RecordingCatalog::open(dir, FPS, 0).unwrap()
    }

    #[test]
    fn test_round_trip_bytes_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        let mut writer = RecordingWriter::open(&catalog, name(1), at(1), FPS).unwrap();
        let mut expected: Vec<u8> = Vec::new();
        for i in 0..5 {
            let frame = jpeg(i + 1);
            expected.extend(&frame);
            writer.append_frame(&frame).unwrap();
        }
        let entry = writer.finalize().unwrap();

        let bytes = catalog.get(&name(1)).unwrap();
        let listing = catalog.list().unwrap();

        assert_eq!(bytes, expected);
        assert_eq!(entry.size_bytes, expected.len() as u64);
        assert_eq!(listing.entries, vec![entry]);
        assert_eq!(listing.total_size_bytes, expected.len() as u64);
    }

    #[test]
    fn test_listing_rebuilds_duration_and_time_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        record(&catalog, &name(7), 25);

        let fresh = open(dir.path());
        let listing = fresh.list().unwrap();

        assert_eq!(listing.total_count(), 1);
        assert_eq!(listing.entries[0].created_at, at(7));
        assert_relative_eq!(listing.entries[0].duration_seconds, 2.5);
    }

    #[test]
    fn test_list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        for secs in [3, 9, 1, 5] {
            record(&catalog, &name(secs), 1);
        }

        let names: Vec<String> = catalog
            .list()
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.filename)
            .collect();

        assert_eq!(names, vec![name(9), name(5), name(3), name(1)]);
    }

    #[test]
    fn test_delete_then_list_excludes_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        record(&catalog, &name(1), 2);
        record(&catalog, &name(2), 2);

        catalog.delete(&name(1)).unwrap();
        let listing = catalog.list().unwrap();

        assert!(!listing.contains(&name(1)));
        assert!(listing.contains(&name(2)));
        assert!(matches!(catalog.get(&name(1)), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        record(&catalog, &name(1), 1);

        catalog.delete(&name(1)).unwrap();
        let second = catalog.delete(&name(1));

        assert!(matches!(second, Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_external_changes_are_visible() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        record(&catalog, &name(1), 1);

        let mut external = jpeg(1);
        external.extend(jpeg(2));
        fs::write(dir.path().join("dropped_in.mjpeg"), &external).unwrap();
        fs::remove_file(dir.path().join(name(1))).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let listing = catalog.list().unwrap();

        assert_eq!(listing.total_count(), 1);
        assert_eq!(listing.entries[0].filename, "dropped_in.mjpeg");
        assert_eq!(listing.total_size_bytes, external.len() as u64);
        assert_relative_eq!(listing.entries[0].duration_seconds, 0.2);
    }

    #[test]
    fn test_partial_file_is_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        let mut writer = RecordingWriter::open(&catalog, name(1), at(1), FPS).unwrap();
        writer.append_frame(&jpeg(1)).unwrap();

        assert_eq!(catalog.list().unwrap().total_count(), 0);

        writer.finalize().unwrap();
        assert_eq!(catalog.list().unwrap().total_count(), 1);
    }

    #[test]
    fn test_recovers_truncated_partial_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let first = jpeg(1);
        let second = jpeg(2);
        let mut partial = first.clone();
        partial.extend(&second);
        partial.extend(&jpeg(3)[..40]);
        fs::write(dir.path().join(format!("{}.part", name(4))), &partial).unwrap();
        fs::write(dir.path().join(format!("{}.part", name(5))), b"\xFF\xD8junk").unwrap();

        let catalog = open(dir.path());
        let listing = catalog.list().unwrap();

        assert_eq!(listing.total_count(), 1);
        assert_eq!(listing.entries[0].filename, name(4));
        assert_eq!(
            listing.entries[0].size_bytes,
            (first.len() + second.len()) as u64
        );
        assert_relative_eq!(listing.entries[0].duration_seconds, 0.2);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".part")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_import_publishes_complete_stream() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        let mut upload = Vec::new();
        for i in 0..15u8 {
            upload.extend(jpeg(i + 1));
        }

        let entry = catalog.import(&RecordingNamer::new(), &upload).unwrap();

        assert!(is_artifact_name(&entry.filename));
        assert_eq!(entry.size_bytes, upload.len() as u64);
        assert_relative_eq!(entry.duration_seconds, 1.5);
        assert_eq!(catalog.get(&entry.filename).unwrap(), upload);
        assert_eq!(catalog.list().unwrap().entries, vec![entry]);
    }

    #[rstest]
    #[case::empty(Vec::new())]
    #[case::not_jpeg(b"definitely not a recording".to_vec())]
    #[case::truncated_tail({
        let mut data = jpeg(1);
        data.extend(&jpeg(2)[..40]);
        data
    })]
    fn test_import_rejects_incomplete_streams(#[case] upload: Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());

        let err = catalog.import(&RecordingNamer::new(), &upload).unwrap_err();

        assert!(matches!(err, CatalogError::InvalidArtifact(_)));
        assert_eq!(catalog.list().unwrap().total_count(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_vanished_file_is_skipped_by_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        record(&catalog, &name(2), 3);
        let (filename, key) = catalog.stat_artifacts().unwrap().remove(0);
        assert_eq!(catalog.frame_count(&filename, key), Some(3));

        fs::remove_file(dir.path().join(&filename)).unwrap();
        let moved = ScanKey {
            len: key.len + 1,
            ..key
        };

        assert_eq!(catalog.frame_count(&filename, moved), None);
        assert!(catalog.scans().is_empty());
    }

    #[test]
    fn test_listing_does_not_hold_visibility_while_counting() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        record(&catalog, &name(4), 2);
        let files = catalog.stat_artifacts().unwrap();

        // Counting must work with the write side held, as during a publish.
        let _publishing = catalog.visibility.write().unwrap();
        let (filename, key) = &files[0];
        assert_eq!(catalog.frame_count(filename, *key), Some(2));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path().join("inner").as_path());
        fs::write(dir.path().join("secret.mjpeg"), b"x").unwrap();

        assert!(matches!(
            catalog.get("../secret.mjpeg"),
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            catalog.delete("../secret.mjpeg"),
            Err(CatalogError::NotFound(_))
        ));
        assert!(dir.path().join("secret.mjpeg").exists());
    }

    #[test]
    fn test_insufficient_space_refuses_open() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RecordingCatalog::open(dir.path(), FPS, u64::MAX).unwrap();

        let result = RecordingWriter::open(&catalog, name(1), at(1), FPS);

        assert!(matches!(
            result,
            Err(StorageError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn test_total_size_tracks_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = open(dir.path());
        let a = record(&catalog, &name(1), 3);
        let b = record(&catalog, &name(2), 1);

        assert_eq!(catalog.total_size().unwrap(), a.size_bytes + b.size_bytes);
        catalog.delete(&a.filename).unwrap();
        assert_eq!(catalog.total_size().unwrap(), b.size_bytes);
    }

    #[test]
    fn test_concurrent_list_never_sees_partial_entry() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(open(dir.path()));
        let frame = jpeg(9);

        let reader = {
            let catalog = catalog.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    for entry in catalog.list().unwrap().entries {
                        // Every visible entry is fully written and scannable.
                        assert!(entry.size_bytes > 0);
                        assert!(entry.duration_seconds > 0.0);
                    }
                }
            })
        };
        for secs in 0..20 {
            let mut writer =
                RecordingWriter::open(&*catalog, name(secs), at(secs), FPS).unwrap();
            writer.append_frame(&frame).unwrap();
            writer.append_frame(&frame).unwrap();
            writer.finalize().unwrap();
            if secs % 3 == 0 {
                catalog.delete(&name(secs)).unwrap();
            }
        }
        reader.join().unwrap();
    }
}
