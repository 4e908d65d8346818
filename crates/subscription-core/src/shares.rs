//! Per-peer share-base index snapshots.
//!
//! Only share indexes travel on the wire, so a peer's full local paths are
//! never exposed. Each connected peer reports its ordered share-base names
//! once; the position of a name in that list is its index for the lifetime
//! of the connection.

use crate::PeerId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct ShareIndexRegistry {
    snapshots: RwLock<HashMap<PeerId, Arc<[String]>>>,
}

impl ShareIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the peer's snapshot wholesale.
    pub fn record(&self, peer_id: PeerId, names: Vec<String>) {
        let names: Arc<[String]> = names.into();
        self.snapshots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer_id, names);
    }

    /// Drop the peer's snapshot (its connection closed).
    pub fn forget(&self, peer_id: PeerId) {
        self.snapshots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&peer_id);
    }

    /// Current snapshot for the peer, if one was recorded.
    pub fn names(&self, peer_id: PeerId) -> Option<Arc<[String]>> {
        self.snapshots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&peer_id)
            .cloned()
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.snapshots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&peer_id)
    }

    /// Index of `share_base` in the peer's snapshot.
    pub fn index_of(&self, peer_id: PeerId, share_base: &str) -> Option<u32> {
        let names = self.names(peer_id)?;
        names
            .iter()
            .position(|name| name == share_base)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Name at `index` in the peer's snapshot, `None` if out of range.
    pub fn name_at(&self, peer_id: PeerId, index: u32) -> Option<String> {
        let names = self.names(peer_id)?;
        names.get(usize::try_from(index).ok()?).cloned()
    }
}
