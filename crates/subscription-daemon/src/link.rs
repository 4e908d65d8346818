//! `PeerLink` over the daemon's WebSocket connections.

use crate::message::HostMessage;
use crate::server::PeerDirectory;
use async_trait::async_trait;
use subscription_core::host::{PeerLink, Result};
use subscription_core::{PeerId, TransportError};
use tracing::debug;

pub struct WsPeerLink {
    peers: PeerDirectory,
}

impl WsPeerLink {
    pub fn new(peers: PeerDirectory) -> Self {
        Self { peers }
    }

    fn deliver(&self, peer: PeerId, message: HostMessage) -> Result<()> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let handle = peers
            .get(&peer)
            .ok_or(TransportError::PeerNotConnected(peer))?;
        if !handle.send(message) {
            return Err(TransportError::SendFailed(format!(
                "connection to peer {} is closing",
                peer
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for WsPeerLink {
    async fn send(&self, peer: PeerId, data: Vec<u8>) -> Result<()> {
        debug!("Plugin frame to peer {}: {} bytes", peer, data.len());
        self.deliver(peer, HostMessage::plugin(&data))
    }

    async fn request_share_bases(&self, peer: PeerId) -> Result<()> {
        self.deliver(peer, HostMessage::ShareListRequest)
    }

    async fn request_hashes(&self, peer: PeerId, share_index: u32, path: &str) -> Result<()> {
        self.deliver(
            peer,
            HostMessage::HashRequest {
                share_index,
                path: path.to_string(),
            },
        )
    }
}
