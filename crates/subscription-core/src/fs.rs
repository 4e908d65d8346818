//! FileSystem trait abstraction for the read-only operations a change scan needs.
//!
//! Implementations:
//! - `InMemoryFs` - For testing, with explicit modification times
//! - `NativeFs` (in subscription-daemon) - Uses tokio::fs, rooted at a share-base
//!
//! Paths are `/`-separated and relative to the filesystem root; `""` is the root.

use crate::subscription::Millis;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// What an entry is, as far as scanning cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Devices, sockets, broken or directory symlinks: never scanned.
    Other,
}

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Modification time in milliseconds since epoch
    pub mtime_millis: Millis,
    pub kind: EntryKind,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    pub kind: EntryKind,
}

/// Read-only filesystem view rooted at a share-base.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Join a directory path and a child name with `/`.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

pub(crate) fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[derive(Debug, Clone, Copy)]
struct Node {
    kind: EntryKind,
    mtime: Millis,
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    nodes: RwLock<HashMap<String, Node>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            String::new(),
            Node {
                kind: EntryKind::Directory,
                mtime: 0,
            },
        );
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Add a regular file, creating missing parent directories with mtime 0.
    pub fn add_file(&self, path: &str, mtime: Millis) {
        self.insert(path, EntryKind::File, mtime);
    }

    /// Add a directory, creating missing parents with mtime 0.
    pub fn add_dir(&self, path: &str, mtime: Millis) {
        self.insert(path, EntryKind::Directory, mtime);
    }

    /// Add an entry that is neither a file nor a directory.
    pub fn add_special(&self, path: &str) {
        self.insert(path, EntryKind::Other, 0);
    }

    /// Set the modification time of an existing entry.
    pub fn set_mtime(&self, path: &str, mtime: Millis) {
        let path = normalize_path(path);
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = nodes.get_mut(&path) {
            node.mtime = mtime;
        }
    }

    /// Remove an entry and everything below it.
    pub fn remove(&self, path: &str) {
        let path = normalize_path(path);
        let prefix = format!("{}/", path);
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.retain(|p, _| *p != path && !p.starts_with(&prefix));
    }

    fn insert(&self, path: &str, kind: EntryKind, mtime: Millis) {
        let path = normalize_path(path);
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());

        let mut parent = parent_path(&path);
        while let Some(dir) = parent {
            nodes.entry(dir.clone()).or_insert(Node {
                kind: EntryKind::Directory,
                mtime: 0,
            });
            parent = parent_path(&dir);
        }
        nodes.insert(path, Node { kind, mtime });
    }
}

fn parent_path(path: &str) -> Option<String> {
    if path.is_empty() {
        None
    } else {
        match path.rfind('/') {
            Some(pos) => Some(path[..pos].to_string()),
            None => Some(String::new()),
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = normalize_path(path);
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        match nodes.get(&path) {
            None => return Err(FsError::NotFound(path)),
            Some(node) if node.kind != EntryKind::Directory => {
                return Err(FsError::NotDirectory(path))
            }
            Some(_) => {}
        }

        let entries = nodes
            .iter()
            .filter(|(p, _)| !p.is_empty() && parent_path(p).as_deref() == Some(path.as_str()))
            .map(|(p, node)| FileEntry {
                name: p.rsplit('/').next().unwrap_or(p).to_string(),
                kind: node.kind,
            })
            .collect();
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = normalize_path(path);
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes
            .get(&path)
            .map(|node| FileStat {
                mtime_millis: node.mtime,
                kind: node.kind,
            })
            .ok_or(FsError::NotFound(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        Ok(nodes.contains_key(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a.txt"), "a.txt");
        assert_eq!(join_path("docs", "a.txt"), "docs/a.txt");
        assert_eq!(join_path("docs/", "a.txt"), "docs/a.txt");
    }

    #[tokio::test]
    async fn test_inmemory_fs_creates_parents() {
        let fs = InMemoryFs::new();
        fs.add_file("a/b/c.txt", 10);

        assert!(fs.exists("a").await.unwrap());
        assert!(fs.exists("/a/b/").await.unwrap());
        assert_eq!(fs.stat("a/b").await.unwrap().kind, EntryKind::Directory);

        let entries = fs.list("a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b");
        assert_eq!(entries[0].kind, EntryKind::Directory);

        let entries = fs.list("a/b").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "c.txt");
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[tokio::test]
    async fn test_inmemory_fs_root_listing() {
        let fs = InMemoryFs::new();
        fs.add_file("top.txt", 1);
        fs.add_dir("dir", 2);
        fs.add_special("fifo");

        let mut names: Vec<_> = fs.list("").await.unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["dir", "fifo", "top.txt"]);
    }

    #[tokio::test]
    async fn test_inmemory_fs_errors() {
        let fs = InMemoryFs::new();
        fs.add_file("file.txt", 1);

        assert!(matches!(fs.list("missing").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.list("file.txt").await, Err(FsError::NotDirectory(_))));
        assert!(matches!(fs.stat("missing").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inmemory_fs_set_mtime_and_remove() {
        let fs = InMemoryFs::new();
        fs.add_file("d/x", 1);
        fs.set_mtime("d", 99);
        assert_eq!(fs.stat("d").await.unwrap().mtime_millis, 99);

        fs.remove("d");
        assert!(!fs.exists("d").await.unwrap());
        assert!(!fs.exists("d/x").await.unwrap());
        assert!(fs.exists("").await.unwrap());
    }
}
