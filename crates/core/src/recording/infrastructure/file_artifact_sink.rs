use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::recording::domain::artifact_sink::ArtifactSink;
use crate::recording::domain::storage_error::StorageError;
use crate::shared::constants::PARTIAL_EXTENSION;

/// Writes one artifact to `<name>.part` and renames it into place on commit.
///
/// The rename happens under the catalog's write lock, so listings never see
/// a half-written artifact.
pub struct FileArtifactSink {
    final_path: PathBuf,
    part_path: PathBuf,
    writer: Option<BufWriter<File>>,
    visibility: Arc<RwLock<()>>,
}

impl FileArtifactSink {
    pub fn create(
        dir: &Path,
        filename: &str,
        visibility: Arc<RwLock<()>>,
    ) -> Result<Self, StorageError> {
        let final_path = dir.join(filename);
        let part_path = partial_path(&final_path);
        if final_path.exists() {
            return Err(StorageError::Io {
                context: format!("create {filename}"),
                message: "artifact already exists".into(),
            });
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .map_err(|e| StorageError::io(format!("create {}", part_path.display()), &e))?;
        Ok(Self {
            final_path,
            part_path,
            writer: Some(BufWriter::new(file)),
            visibility,
        })
    }
}

pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    PathBuf::from(name)
}

impl ArtifactSink for FileArtifactSink {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StorageError::Io {
                context: format!("append to {}", self.part_path.display()),
                message: "sink already closed".into(),
            })?;
        writer
            .write_all(bytes)
            .map_err(|e| StorageError::io(format!("append to {}", self.part_path.display()), &e))
    }

    fn commit(&mut self) -> Result<u64, StorageError> {
        let writer = self.writer.take().ok_or_else(|| StorageError::Io {
            context: format!("commit {}", self.part_path.display()),
            message: "sink already closed".into(),
        })?;
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::io(format!("flush {}", self.part_path.display()), e.error()))?;
        file.sync_all()
            .map_err(|e| StorageError::io(format!("sync {}", self.part_path.display()), &e))?;
        let size = file
            .metadata()
            .map_err(|e| StorageError::io(format!("stat {}", self.part_path.display()), &e))?
            .len();
        drop(file);

        let _guard = self
            .visibility
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::rename(&self.part_path, &self.final_path).map_err(|e| {
            StorageError::io(format!("publish {}", self.final_path.display()), &e)
        })?;
        Ok(size)
    }

    fn discard(&mut self) {
        self.writer = None;
        if let Err(e) = fs::remove_file(&self.part_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove {}: {e}", self.part_path.display());
            }
        }
    }
}

impl Drop for FileArtifactSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.discard();
        }
    }
}
