//! Whole-snapshot watermark store.
//!
//! The entire subscription list lives in memory and is written to a single
//! JSON file when the store is closed (or dropped). Updates made after the
//! last write are lost if the process dies without closing; that is the
//! trade-off of this backend.
//!
//! Remove the file to erase every subscription; it is recreated empty.

use super::{Result, StoreError, WatermarkStore};
use crate::subscription::{Millis, Subscription, SubscriptionKey};
use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Current snapshot file format.
const SNAPSHOT_VERSION: u32 = 1;

/// On-disk representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    subscriptions: Vec<Subscription>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            subscriptions: Vec::new(),
        }
    }
}

struct State {
    snapshot: Snapshot,
    closed: bool,
}

pub struct SnapshotStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl SnapshotStore {
    /// Load the snapshot at `path`, or start empty if the file is absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&contents).map_err(|e| {
                StoreError::Persistence(format!("malformed snapshot {}: {}", path.display(), e))
            })?;
            if snapshot.version != SNAPSHOT_VERSION {
                warn!(
                    "Snapshot {} has version {}, expected {}",
                    path.display(),
                    snapshot.version,
                    SNAPSHOT_VERSION
                );
            }
            info!(
                "Loaded {} subscription(s) from {}",
                snapshot.subscriptions.len(),
                path.display()
            );
            snapshot
        } else {
            debug!("No snapshot at {}, starting empty", path.display());
            Snapshot::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(State {
                snapshot,
                closed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state now instead of waiting for `close`.
    pub fn flush(&self) -> Result<()> {
        let state = self.lock_open()?;
        self.save(&state.snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.closed {
            return Err(StoreError::Persistence(format!(
                "snapshot store {} is closed",
                self.path.display()
            )));
        }
        Ok(state)
    }

    /// Replace the file atomically: write a sibling temp file, then rename.
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            "Saved {} subscription(s) to {}",
            snapshot.subscriptions.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl WatermarkStore for SnapshotStore {
    fn create(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.lock_open()?;
        let key = subscription.key();
        if state.snapshot.subscriptions.iter().any(|s| key.matches(s)) {
            return Err(StoreError::DuplicateKey(key));
        }
        state.snapshot.subscriptions.push(subscription.clone());
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Subscription>> {
        Ok(self.lock_open()?.snapshot.subscriptions.clone())
    }

    fn list_for_peer(&self, peer_id: PeerId) -> Result<Vec<Subscription>> {
        Ok(self
            .lock_open()?
            .snapshot
            .subscriptions
            .iter()
            .filter(|s| s.peer_id == peer_id)
            .cloned()
            .collect())
    }

    fn find(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        let state = self.lock_open()?;
        let mut matching = state.snapshot.subscriptions.iter().filter(|s| key.matches(s));
        let first = matching.next().cloned();
        if first.is_some() && matching.next().is_some() {
            warn!("Multiple subscriptions stored for {}; using the first", key);
        }
        Ok(first)
    }

    fn advance_watermark(&self, key: &SubscriptionKey, watermark: Millis) -> Result<()> {
        let mut state = self.lock_open()?;
        let mut found = false;
        for subscription in state.snapshot.subscriptions.iter_mut().filter(|s| key.matches(s)) {
            subscription.watermark = watermark;
            found = true;
        }
        if !found {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        self.save(&state.snapshot)?;
        state.closed = true;
        Ok(())
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(
                "Could not save subscriptions to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
