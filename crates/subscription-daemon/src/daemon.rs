//! Daemon state: routes peer events and console lines to the exchange.

use crate::console;
use crate::downloads::LoggedDownloads;
use crate::link::WsPeerLink;
use crate::message::HostMessage;
use crate::server::{ServerEvent, WebSocketServer};
use crate::shares::ConfiguredShares;
use std::sync::Arc;
use subscription_core::{Exchange, PeerId, ShareBases, WatermarkStore};
use tracing::{debug, error, info, warn};

/// Daemon state holding all components.
pub struct Daemon {
    exchange: Exchange,
    server: WebSocketServer,
    shares: Arc<ConfiguredShares>,
    downloads: Arc<LoggedDownloads>,
    /// Addresses to keep dialing
    connect: Vec<String>,
}

impl Daemon {
    pub fn new(
        peer_id: PeerId,
        store: Arc<dyn WatermarkStore>,
        shares: Arc<ConfiguredShares>,
        connect: Vec<String>,
    ) -> Self {
        let server = WebSocketServer::new(peer_id);
        let downloads = Arc::new(LoggedDownloads::new());
        let exchange = Exchange::new(
            store,
            Arc::new(WsPeerLink::new(server.directory())),
            shares.clone(),
            downloads.clone(),
        );
        Self {
            exchange,
            server,
            shares,
            downloads,
            connect,
        }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn server_mut(&mut self) -> &mut WebSocketServer {
        &mut self.server
    }

    pub fn downloads(&self) -> &LoggedDownloads {
        &self.downloads
    }

    /// Handle a server event (connects, messages, disconnects).
    pub async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::PeerConnected { peer_id } => {
                if let Err(e) = self.exchange.on_peer_connected(peer_id).await {
                    debug!("Share-base request to {} failed: {}", peer_id, e);
                }
            }
            ServerEvent::Message { peer_id, message } => {
                self.on_host_message(peer_id, message).await;
            }
            ServerEvent::PeerDisconnected { peer_id } => {
                self.exchange.on_peer_disconnected(peer_id);
            }
        }
    }

    /// Handle a host message from an identified peer.
    async fn on_host_message(&mut self, peer_id: PeerId, message: HostMessage) {
        match message {
            HostMessage::ShareListRequest => {
                let names = self.shares.names();
                debug!("Sending {} share-base name(s) to {}", names.len(), peer_id);
                if let Err(e) = self.server.send(peer_id, HostMessage::ShareList { names }) {
                    error!("Failed to send share list to {}: {}", peer_id, e);
                }
            }
            HostMessage::ShareList { names } => {
                // Failures are logged by the exchange.
                let _ = self.exchange.on_share_list(peer_id, names).await;
            }
            HostMessage::Plugin { data } => {
                match self.exchange.on_message(peer_id, data.as_bytes()).await {
                    Ok(outcome) => debug!("Frame from {}: {:?}", peer_id, outcome),
                    Err(e) => debug!("Frame from {} not applied: {}", peer_id, e),
                }
            }
            HostMessage::HashRequest { share_index, path } => {
                // Block hashing belongs to the file-transfer layer.
                info!(
                    "Peer {} requested hashes for share {} '{}'",
                    peer_id, share_index, path
                );
            }
            HostMessage::Handshake { .. } => {
                debug!("Ignoring repeated handshake from {}", peer_id);
            }
        }
    }

    /// Run one operator command and return what to print.
    pub async fn on_console_line(&self, line: &str) -> Option<String> {
        match console::parse(line) {
            Ok(Some(command)) => {
                Some(console::execute(command, &self.exchange, &self.downloads).await)
            }
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    /// Dial every configured address that has no live connection.
    pub async fn redial(&mut self) {
        for address in self.connect.clone() {
            if self.server.is_connected_to(&address) {
                continue;
            }
            if let Err(e) = self.server.connect(&address).await {
                warn!("{:#}", e);
            }
        }
    }
}
