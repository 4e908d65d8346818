//! WebSocket endpoint for accepting and opening peer connections.
//!
//! Manages connection lifecycle, peer ID mapping, and message routing.
//! The handshake lifecycle is encapsulated: callers only see `ServerEvent`s
//! with resolved peer IDs via `poll_event()`.
//!
//! Two daemons that dial each other end up with two connections. Messages are
//! accepted on both; outgoing traffic uses whichever handshake finished first,
//! and the peer only counts as disconnected once its last connection closes.

use crate::connection::{ConnectionEvent, Outbox, PeerConnection};
use crate::message::HostMessage;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use subscription_core::PeerId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};

/// Event emitted by the server after the handshake lifecycle is resolved.
/// Callers only see peer IDs; connection IDs are an internal detail.
#[derive(Debug)]
pub enum ServerEvent {
    /// A peer completed handshake and is now connected.
    PeerConnected { peer_id: PeerId },
    /// A message from an identified peer.
    Message {
        peer_id: PeerId,
        message: HostMessage,
    },
    /// A previously-connected peer disconnected.
    PeerDisconnected { peer_id: PeerId },
}

/// Route to a connected peer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn_id: String,
    outbox: Outbox,
}

impl PeerHandle {
    pub fn send(&self, message: HostMessage) -> bool {
        self.outbox.send(message).is_ok()
    }
}

/// Connected peers, shared with everything that sends to them.
pub type PeerDirectory = Arc<RwLock<HashMap<PeerId, PeerHandle>>>;

/// WebSocket endpoint managing peer connections.
pub struct WebSocketServer {
    /// Our peer ID
    peer_id: PeerId,
    /// Live connections indexed by conn_id, before and after handshake
    connections: HashMap<String, PeerConnection>,
    /// Map from conn_id to peer ID (for resolving messages/closes)
    conn_id_to_peer: HashMap<String, PeerId>,
    /// Post-handshake routes indexed by peer ID
    peers: PeerDirectory,
    /// Addresses of connections we opened, by conn_id
    outgoing: HashMap<String, String>,
    /// Counter for generating connection IDs
    next_conn_id: u64,
    /// Channel sender for connection events (messages, handshakes, closes)
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    /// Channel receiver for connection events
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl WebSocketServer {
    /// Create a new WebSocket server.
    pub fn new(peer_id: PeerId) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            peer_id,
            connections: HashMap::new(),
            conn_id_to_peer: HashMap::new(),
            peers: Arc::new(RwLock::new(HashMap::new())),
            outgoing: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen_addr))?;
        info!("WebSocket server listening on {}", listen_addr);
        Ok(listener)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Shared view of connected peers.
    pub fn directory(&self) -> PeerDirectory {
        self.peers.clone()
    }

    fn next_conn_id(&mut self) -> String {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;
        conn_id
    }

    /// Handle a new incoming TCP connection.
    ///
    /// Upgrades to WebSocket and sends our handshake. The connection stays
    /// unidentified until the remote peer's handshake arrives.
    pub async fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks (like `nc -z`) connect and immediately close without
                // completing the WebSocket handshake. Log these as debug, not error.
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before handshake from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        let conn_id = self.next_conn_id();
        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = PeerConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());
        conn.send_handshake(self.peer_id);
        self.connections.insert(conn_id, conn);
    }

    /// Open a connection to `address` (`host:port` or a `ws://` URL).
    pub async fn connect(&mut self, address: &str) -> Result<()> {
        let url = if address.starts_with("ws://") || address.starts_with("wss://") {
            address.to_string()
        } else {
            format!("ws://{}", address)
        };
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        let conn_id = self.next_conn_id();
        info!("Connected to {} (conn_id: {})", url, conn_id);

        let conn = PeerConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());
        conn.send_handshake(self.peer_id);
        self.outgoing.insert(conn_id.clone(), address.to_string());
        self.connections.insert(conn_id, conn);
        Ok(())
    }

    /// Whether a connection we opened to `address` is still alive.
    pub fn is_connected_to(&self, address: &str) -> bool {
        self.outgoing.values().any(|a| a == address)
    }

    /// Wait for the next server event, encapsulating the handshake lifecycle.
    ///
    /// Callers only see:
    /// - `PeerConnected` when a peer's first handshake completes
    /// - `Message` with the resolved peer ID
    /// - `PeerDisconnected` when a peer's last connection closes
    ///
    /// Connections that close before handshake are silently cleaned up.
    pub async fn poll_event(&mut self) -> Option<ServerEvent> {
        loop {
            let event = self.event_rx.recv().await?;

            match event {
                ConnectionEvent::Handshake { conn_id, peer_id } => {
                    if let Some(event) = self.on_handshake(conn_id, peer_id) {
                        return Some(event);
                    }
                }
                ConnectionEvent::Message { conn_id, message } => {
                    match self.conn_id_to_peer.get(&conn_id) {
                        Some(&peer_id) => return Some(ServerEvent::Message { peer_id, message }),
                        None => warn!("Message on {} before handshake, dropping", conn_id),
                    }
                }
                ConnectionEvent::Closed { conn_id } => {
                    if let Some(event) = self.on_closed(conn_id) {
                        return Some(event);
                    }
                }
            }
        }
    }

    fn on_handshake(&mut self, conn_id: String, peer_id: PeerId) -> Option<ServerEvent> {
        if peer_id == self.peer_id {
            warn!("Connection {} is to ourselves, closing", conn_id);
            self.connections.remove(&conn_id);
            self.outgoing.remove(&conn_id);
            return None;
        }
        let Some(conn) = self.connections.get(&conn_id) else {
            return None;
        };
        if self.conn_id_to_peer.contains_key(&conn_id) {
            debug!("Repeated handshake on {}, ignoring", conn_id);
            return None;
        }

        debug!("Handshake complete: {} is peer {}", conn_id, peer_id);
        self.conn_id_to_peer.insert(conn_id.clone(), peer_id);

        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if peers.contains_key(&peer_id) {
            debug!("Peer {} already connected, keeping {} as a spare", peer_id, conn_id);
            return None;
        }
        peers.insert(
            peer_id,
            PeerHandle {
                conn_id,
                outbox: conn.outbox(),
            },
        );
        info!("Peer {} connected", peer_id);
        Some(ServerEvent::PeerConnected { peer_id })
    }

    fn on_closed(&mut self, conn_id: String) -> Option<ServerEvent> {
        self.connections.remove(&conn_id);
        self.outgoing.remove(&conn_id);

        let Some(peer_id) = self.conn_id_to_peer.remove(&conn_id) else {
            debug!("Connection closed before handshake: {}", conn_id);
            return None;
        };

        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        let was_route = peers
            .get(&peer_id)
            .is_some_and(|handle| handle.conn_id == conn_id);
        if !was_route {
            return None;
        }

        let spare = self
            .conn_id_to_peer
            .iter()
            .find(|(_, p)| **p == peer_id)
            .and_then(|(id, _)| self.connections.get(id));
        match spare {
            Some(spare) => {
                debug!("Peer {} continues on {}", peer_id, spare.conn_id);
                peers.insert(
                    peer_id,
                    PeerHandle {
                        conn_id: spare.conn_id.clone(),
                        outbox: spare.outbox(),
                    },
                );
                None
            }
            None => {
                peers.remove(&peer_id);
                info!("Peer {} disconnected", peer_id);
                Some(ServerEvent::PeerDisconnected { peer_id })
            }
        }
    }

    /// Send a message to a specific peer.
    pub fn send(&self, peer_id: PeerId, message: HostMessage) -> Result<()> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        let handle = peers
            .get(&peer_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown peer: {}", peer_id))?;
        if !handle.send(message) {
            anyhow::bail!("Connection to peer {} is closing", peer_id);
        }
        Ok(())
    }

    /// Get the number of connected peers (with completed handshake).
    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Get list of connected peer IDs.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}
