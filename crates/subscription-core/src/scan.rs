//! Change scanner: which files under a folder are newer than a watermark.
//!
//! The new watermark is the newest modification time seen among qualifying
//! files *and* every visited directory. Folding in directory times means a
//! rename or delete inside the folder still moves the watermark forward. It
//! also means a file that appears later with an mtime older than an already
//! counted directory bump is never reported; "newest wins" cannot see it.

use crate::fs::{join_path, normalize_path, EntryKind, FileSystem, FsError};
use crate::subscription::Millis;
use tracing::{debug, warn};

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Newest modification time seen, never older than the `since` bound.
    pub max_modified: Millis,
    /// Changed files, relative to the scan root, sorted.
    pub changed: Vec<String>,
}

/// Scan `root` on `fs` for regular files modified strictly after `since`.
///
/// Fails only if `root` itself cannot be examined; problems below the root
/// (vanished entries, unreadable directories, special files) are logged and
/// skipped. Read-only and deterministic for an unchanged tree.
pub async fn scan<F: FileSystem + ?Sized>(
    fs: &F,
    root: &str,
    since: Millis,
) -> Result<ScanResult, FsError> {
    let root = normalize_path(root);
    let root_stat = fs.stat(&root).await?;
    let mut result = ScanResult {
        max_modified: since,
        changed: Vec::new(),
    };

    match root_stat.kind {
        EntryKind::File => {
            if root_stat.mtime_millis > since {
                let name = root.rsplit('/').next().unwrap_or(&root).to_string();
                result.changed.push(name);
            }
            result.max_modified = result.max_modified.max(root_stat.mtime_millis);
            return Ok(result);
        }
        EntryKind::Other => {
            warn!("Scan root '{}' is neither a file nor a directory, ignoring", root);
            return Ok(result);
        }
        EntryKind::Directory => {
            result.max_modified = result.max_modified.max(root_stat.mtime_millis);
        }
    }

    // (path on fs, path relative to root)
    let mut pending = vec![(root.clone(), String::new())];
    while let Some((dir, relative_dir)) = pending.pop() {
        let mut entries = match fs.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                warn!("Skipping unreadable directory '{}': {}", dir, e);
                continue;
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Scanning '{}' ({} entries)", dir, entries.len());

        for entry in entries {
            let path = join_path(&dir, &entry.name);
            let relative = join_path(&relative_dir, &entry.name);

            match entry.kind {
                EntryKind::Other => {
                    warn!("Skipping '{}': neither a file nor a directory", path);
                    continue;
                }
                EntryKind::Directory | EntryKind::File => {}
            }

            let stat = match fs.stat(&path).await {
                Ok(stat) => stat,
                Err(e) => {
                    warn!("Skipping '{}': {}", path, e);
                    continue;
                }
            };

            match entry.kind {
                EntryKind::Directory => {
                    result.max_modified = result.max_modified.max(stat.mtime_millis);
                    pending.push((path, relative));
                }
                EntryKind::File if stat.mtime_millis > since => {
                    debug!("'{}' changed at {}", relative, stat.mtime_millis);
                    result.max_modified = result.max_modified.max(stat.mtime_millis);
                    result.changed.push(relative);
                }
                _ => {}
            }
        }
    }

    result.changed.sort();
    Ok(result)
}
