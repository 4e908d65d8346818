//! Native filesystem implementation using tokio::fs.
//!
//! Rooted at one share-base. Symlinks to files count as files; symlinks to
//! directories and broken symlinks are reported as `Other` so a scan never
//! follows a link cycle.

use async_trait::async_trait;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use subscription_core::fs::{EntryKind, FileEntry, FileStat, FileSystem, FsError, Result};
use subscription_core::Millis;
use tokio::fs;

/// Native filesystem implementation for the daemon
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve `path` below the base, refusing anything that climbs out of it.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FsError::NotFound(format!("{} (outside share-base)", path)));
        }
        Ok(self.base_path.join(relative))
    }
}

fn map_io(e: io::Error, path: &Path) -> FsError {
    let shown = path.display().to_string();
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(shown),
        io::ErrorKind::NotADirectory => FsError::NotDirectory(shown),
        _ => FsError::Io(format!("{}: {}", shown, e)),
    }
}

fn mtime_millis(metadata: &Metadata) -> Millis {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| Millis::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Classify without following directory symlinks.
async fn classify(path: &Path, metadata: Metadata) -> (EntryKind, Metadata) {
    if metadata.is_dir() {
        return (EntryKind::Directory, metadata);
    }
    if metadata.is_file() {
        return (EntryKind::File, metadata);
    }
    if metadata.file_type().is_symlink() {
        if let Ok(target) = fs::metadata(path).await {
            if target.is_file() {
                return (EntryKind::File, target);
            }
        }
    }
    (EntryKind::Other, metadata)
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let full_path = self.full_path(path)?;
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| map_io(e, &full_path))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| map_io(e, &full_path))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = match entry.metadata().await {
                Ok(metadata) => classify(&entry.path(), metadata).await.0,
                Err(_) => EntryKind::Other,
            };
            entries.push(FileEntry { name, kind });
        }

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full_path = self.full_path(path)?;

        // The share-base itself may be a link; entries below it are not followed.
        let metadata = if full_path == self.base_path {
            fs::metadata(&full_path).await
        } else {
            fs::symlink_metadata(&full_path).await
        }
        .map_err(|e| map_io(e, &full_path))?;

        let (kind, metadata) = classify(&full_path, metadata).await;
        Ok(FileStat {
            mtime_millis: mtime_millis(&metadata),
            kind,
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = match self.full_path(path) {
            Ok(full_path) => full_path,
            Err(_) => return Ok(false),
        };
        fs::try_exists(&full_path)
            .await
            .map_err(|e| map_io(e, &full_path))
    }
}
