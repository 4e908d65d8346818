//! Seams to the host application the exchange runs inside.
//!
//! The host owns connections, share-base configuration and file transfer.
//! The exchange only talks to it through these traits:
//! - `PeerLink` - Send frames and issue host-level requests to a peer
//! - `ShareBases` - This node's own share-bases, by index
//! - `Downloads` - Fire-and-forget file transfer

use crate::fs::FileSystem;
use crate::PeerId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer not connected: {0}")]
    PeerNotConnected(PeerId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Outgoing side of the host's peer connections.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Deliver an opaque plug-in frame to the peer.
    async fn send(&self, peer: PeerId, data: Vec<u8>) -> Result<()>;

    /// Ask the peer for its ordered share-base names.
    ///
    /// The answer arrives later through `Exchange::on_share_list`.
    async fn request_share_bases(&self, peer: PeerId) -> Result<()>;

    /// Ask the peer for block hashes of a file, ahead of downloading it.
    async fn request_hashes(&self, peer: PeerId, share_index: u32, path: &str) -> Result<()>;
}

/// This node's share-bases, in the order they are advertised to peers.
pub trait ShareBases: Send + Sync {
    /// Filesystem rooted at the share-base with this index.
    fn resolve(&self, index: u32) -> Option<Arc<dyn FileSystem>>;

    /// Names of all share-bases; a name's position is its index.
    fn names(&self) -> Vec<String>;
}

/// File transfer, outside the exchange's concern.
pub trait Downloads: Send + Sync {
    /// Queue `remote_path` from `peer` for download into `destination`.
    fn schedule(&self, peer: PeerId, destination: &str, remote_path: &str);
}
