//! Download scheduling.
//!
//! File transfer itself belongs to the host application. The daemon records
//! what would be fetched so operators can see it (and act on it) from the
//! console and the logs.

use std::collections::VecDeque;
use std::sync::Mutex;
use subscription_core::{Downloads, PeerId};
use tracing::{info, warn};

/// Entries kept for the console before the oldest are dropped.
pub const MAX_QUEUED_DOWNLOADS: usize = 10_000;

/// One file queued for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDownload {
    pub peer: PeerId,
    pub destination: String,
    pub remote_path: String,
}

/// Logs and queues downloads in memory, keeping at most `limit` entries.
pub struct LoggedDownloads {
    queue: Mutex<VecDeque<PendingDownload>>,
    limit: usize,
}

impl Default for LoggedDownloads {
    fn default() -> Self {
        Self::with_limit(MAX_QUEUED_DOWNLOADS)
    }
}

impl LoggedDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<PendingDownload> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Downloads for LoggedDownloads {
    fn schedule(&self, peer: PeerId, destination: &str, remote_path: &str) {
        info!(
            "Download '{}' from peer {} into '{}'",
            remote_path, peer, destination
        );
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.limit {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "Download queue full, dropping '{}' from peer {}",
                    dropped.remote_path, dropped.peer
                );
            }
        }
        queue.push_back(PendingDownload {
            peer,
            destination: destination.to_string(),
            remote_path: remote_path.to_string(),
        });
    }
}
