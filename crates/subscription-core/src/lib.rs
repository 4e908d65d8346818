//! subscription-core: change detection for friend subscriptions between peers.
//!
//! A subscription says "keep this local folder up to date with that folder
//! on that peer". This crate provides:
//! - Durable subscriptions with per-subscription watermarks (SQLite or JSON snapshot)
//! - Per-connection share-base index translation
//! - A change scanner over a FileSystem abstraction
//! - The query/reply wire codec
//! - The Exchange that ties them together behind host traits

pub mod exchange;
pub mod fs;
pub mod host;
pub mod peer_id;
pub mod protocol;
pub mod scan;
pub mod shares;
pub mod store;
pub mod subscription;

pub use exchange::{Exchange, ExchangeError, MessageOutcome, PeerPhase, QueryBatch, ReplyOutcome};
pub use fs::{EntryKind, FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use host::{Downloads, PeerLink, ShareBases, TransportError};
pub use peer_id::{PeerId, PeerIdError};
pub use protocol::{ChangeMessage, ChangesQuery, ChangesReply, DecodeError};
pub use scan::{scan, ScanResult};
pub use shares::ShareIndexRegistry;
pub use store::{open_store, SnapshotStore, SqliteStore, StoreBackend, StoreError, WatermarkStore};
pub use subscription::{Millis, Subscription, SubscriptionKey, TargetKind};
