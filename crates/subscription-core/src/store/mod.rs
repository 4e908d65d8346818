//! Watermark store: durable subscriptions and their last-known-modified times.
//!
//! Two interchangeable backends implement [`WatermarkStore`]:
//! - [`SqliteStore`] - one row per subscription in a SQLite table
//! - [`SnapshotStore`] - whole-state JSON file, loaded at open and rewritten on close
//!
//! Both serialize their operations behind a single mutex, so a create or an
//! advance is never observed half-applied and the one-record-per-key invariant
//! holds across concurrently running exchange handlers.

mod snapshot;
mod sqlite;

pub use snapshot::SnapshotStore;
pub use sqlite::SqliteStore;

use crate::subscription::{Millis, Subscription, SubscriptionKey};
use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Subscription already exists: {0}")]
    DuplicateKey(SubscriptionKey),

    #[error("Subscription not found: {0}")]
    NotFound(SubscriptionKey),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage contract shared by every backend.
pub trait WatermarkStore: Send + Sync {
    /// Persist a new subscription. Fails with `DuplicateKey` if its key exists.
    fn create(&self, subscription: &Subscription) -> Result<()>;

    /// All subscriptions, in no particular order.
    fn list_all(&self) -> Result<Vec<Subscription>>;

    /// All subscriptions on the given peer.
    fn list_for_peer(&self, peer_id: PeerId) -> Result<Vec<Subscription>>;

    /// Look up one subscription.
    ///
    /// Legacy data may hold duplicates for a key; the first one wins and a
    /// warning is logged.
    fn find(&self, key: &SubscriptionKey) -> Result<Option<Subscription>>;

    /// Replace the watermark of an existing subscription, leaving the other
    /// fields untouched. Fails with `NotFound` if the key is unknown.
    fn advance_watermark(&self, key: &SubscriptionKey, watermark: Millis) -> Result<()>;

    /// Release resources (and, for snapshot stores, write the state out).
    /// Calling it again is a no-op.
    fn close(&self) -> Result<()>;
}

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Snapshot,
}

/// Open the store at `path` with the chosen backend.
///
/// A missing file is created empty, so deleting it resets every subscription.
pub fn open_store(backend: StoreBackend, path: &Path) -> Result<Box<dyn WatermarkStore>> {
    match backend {
        StoreBackend::Sqlite => Ok(Box::new(SqliteStore::open(path)?)),
        StoreBackend::Snapshot => Ok(Box::new(SnapshotStore::open(path)?)),
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every backend must share, run against each in its own tests.

    use super::*;
    use crate::subscription::TargetKind;

    pub fn sample() -> Subscription {
        Subscription::new(PeerId::from(1643718002), "shareX", "docs/", "/home/me/in", 1000)
    }

    pub fn create_then_find(store: &dyn WatermarkStore) {
        let sub = sample();
        store.create(&sub).unwrap();
        assert_eq!(store.find(&sub.key()).unwrap(), Some(sub));
    }

    pub fn duplicate_rejected(store: &dyn WatermarkStore) {
        let sub = sample();
        store.create(&sub).unwrap();

        let mut again = sample();
        again.local_destination = "/elsewhere".into();
        match store.create(&again) {
            Err(StoreError::DuplicateKey(key)) => assert_eq!(key, sub.key()),
            other => panic!("expected DuplicateKey, got {:?}", other),
        }
        assert_eq!(store.list_all().unwrap().len(), 1);
        assert_eq!(store.find(&sub.key()).unwrap().unwrap().local_destination, "/home/me/in");
    }

    pub fn advance_keeps_other_fields(store: &dyn WatermarkStore) {
        let sub = sample();
        store.create(&sub).unwrap();
        store.advance_watermark(&sub.key(), 2000).unwrap();

        let found = store.find(&sub.key()).unwrap().unwrap();
        assert_eq!(found.watermark, 2000);
        assert_eq!(found.local_destination, sub.local_destination);
        assert_eq!(found.key(), sub.key());
    }

    pub fn advance_missing_is_not_found(store: &dyn WatermarkStore) {
        let key = SubscriptionKey::new(PeerId::from(1), "nope", "");
        assert!(matches!(
            store.advance_watermark(&key, 5),
            Err(StoreError::NotFound(_))
        ));
    }

    pub fn list_by_peer(store: &dyn WatermarkStore) {
        store.create(&sample()).unwrap();
        store
            .create(&Subscription::new(PeerId::from(1643718002), "shareX", "photos/", "/p", 0))
            .unwrap();
        store
            .create(&Subscription::new(PeerId::from(99), "other", "", "/o", 0))
            .unwrap();

        assert_eq!(store.list_all().unwrap().len(), 3);
        let mine = store.list_for_peer(PeerId::from(1643718002)).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|s| s.peer_id == PeerId::from(1643718002)));
        assert!(store.list_for_peer(PeerId::from(5)).unwrap().is_empty());
    }

    pub fn file_target_kept(store: &dyn WatermarkStore) {
        let file = Subscription::new(PeerId::from(3), "shareX", "docs/report.pdf", "/in", 0)
            .with_target(TargetKind::File);
        store.create(&file).unwrap();
        store.advance_watermark(&file.key(), 10).unwrap();
        assert_eq!(store.find(&file.key()).unwrap().unwrap().target, TargetKind::File);
    }

    /// Racing creates of one key leave exactly one record.
    pub fn concurrent_create(store: &dyn WatermarkStore) {
        const THREADS: usize = 16;
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    scope.spawn(move || {
                        let mut sub = sample();
                        sub.local_destination = format!("/in/{}", i);
                        store.create(&sub)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(StoreError::DuplicateKey(_)))));
        assert_eq!(store.list_all().unwrap().len(), 1);

        // Advances racing with reads never expose a missing or torn record.
        let key = sample().key();
        std::thread::scope(|scope| {
            for i in 0..THREADS as Millis {
                let key = key.clone();
                scope.spawn(move || store.advance_watermark(&key, 2000 + i).unwrap());
                let key = sample().key();
                scope.spawn(move || {
                    let found = store.find(&key).unwrap().unwrap();
                    assert_eq!(found.key(), key);
                });
            }
        });
        let found = store.find(&key).unwrap().unwrap();
        assert!((2000..2000 + THREADS as Millis).contains(&found.watermark));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    pub fn close_is_idempotent(store: &dyn WatermarkStore) {
        store.create(&sample()).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.list_all(), Err(StoreError::Persistence(_))));
    }
}
