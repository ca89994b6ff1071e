use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    Missing(PathBuf),
    #[error("model {name} is not cached and no download URL was given")]
    NotCached { name: String },
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

const DOWNLOAD_CHUNK: usize = 1024 * 1024;

/// Progress callback: `(bytes_downloaded, total_bytes)`; total is 0 when unknown.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Where the face model should come from.
pub struct ModelSource<'a> {
    /// A user-supplied path wins over everything else.
    pub explicit: Option<&'a Path>,
    pub name: &'a str,
    pub url: Option<&'a str>,
}

/// Resolves the model against the per-user cache directory.
pub fn resolve(
    source: &ModelSource<'_>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    resolve_in(&model_cache_dir()?, source, progress)
}

/// Order: explicit path, then `cache_dir/name`, then download into the cache.
pub fn resolve_in(
    cache_dir: &Path,
    source: &ModelSource<'_>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = source.explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ModelResolveError::Missing(path.to_path_buf()))
        };
    }

    let cached = cache_dir.join(source.name);
    if cached.is_file() {
        return Ok(cached);
    }

    let url = source.url.ok_or_else(|| ModelResolveError::NotCached {
        name: source.name.to_string(),
    })?;
    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading face model {} from {url}", source.name);
    download(url, &cached, progress)?;
    Ok(cached)
}

pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR_NAME).join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;
    let total = response.content_length().unwrap_or(0);

    // Stage next to the destination so the final rename is atomic.
    let temp_path = dest.with_extension("part");
    let result = stream_to(&mut response, &temp_path, total, progress.as_ref());
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    fs::rename(&temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })
}

/// Copies `reader` into `path` chunk by chunk, reporting progress as bytes
/// land on disk.
fn stream_to(
    reader: &mut impl Read,
    path: &Path,
    total: u64,
    progress: Option<&ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |e: std::io::Error| ModelResolveError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = fs::File::create(path).map_err(write_err)?;
    let mut buf = vec![0u8; DOWNLOAD_CHUNK];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        written += n as u64;
        if let Some(cb) = progress {
            cb(written, total);
        }
    }
    file.sync_all().map_err(write_err)
}
