//! Individual peer connection management.
//!
//! Each peer connection wraps a WebSocket stream, split into a read task that
//! forwards parsed host messages as events and a write task fed by a channel,
//! so any part of the daemon can queue a message without holding the socket.

use crate::message::{HostMessage, MAX_MESSAGE_SIZE};
use futures::{SinkExt, StreamExt};
use subscription_core::PeerId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, warn};

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Peer sent its handshake, revealing its peer ID
    Handshake { conn_id: String, peer_id: PeerId },
    /// Received a host message from the peer
    Message {
        conn_id: String,
        message: HostMessage,
    },
    /// Connection was closed
    Closed { conn_id: String },
}

/// Queue side of a connection's write task.
pub type Outbox = mpsc::UnboundedSender<HostMessage>;

/// A single WebSocket connection to a peer.
pub struct PeerConnection {
    /// Connection ID assigned by the server (e.g., "conn-1")
    pub conn_id: String,
    outbox: Outbox,
    read_task: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Create a new peer connection from a WebSocket stream.
    ///
    /// Spawns a read task that forwards messages to the event channel and a
    /// write task that drains the outbox. The write task ends once every
    /// outbox handle is gone, after flushing what is queued.
    pub fn new<S>(
        conn_id: String,
        ws_stream: WebSocketStream<S>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, read) = ws_stream.split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<HostMessage>();

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, event_tx).await;
        });

        let write_conn_id = conn_id.clone();
        tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(e) = write.send(Message::Binary(message.to_binary().into())).await {
                    warn!("Failed to send to {}: {}", write_conn_id, e);
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        Self {
            conn_id,
            outbox,
            read_task: Some(read_task),
        }
    }

    /// Read loop that forwards messages to the event channel.
    async fn read_loop<S>(
        conn_id: String,
        mut read: futures::stream::SplitStream<WebSocketStream<S>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data,
                        Message::Text(text) => text.into_bytes(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    // Check message size
                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    let Some(message) = HostMessage::from_binary(&data) else {
                        warn!("Unrecognised {}-byte message from {}, dropping", data.len(), conn_id);
                        continue;
                    };

                    let event = match message {
                        HostMessage::Handshake { peer_id } => {
                            debug!("Received handshake from {} (peer_id: {})", conn_id, peer_id);
                            ConnectionEvent::Handshake {
                                conn_id: conn_id.clone(),
                                peer_id,
                            }
                        }
                        message => ConnectionEvent::Message {
                            conn_id: conn_id.clone(),
                            message,
                        },
                    };
                    let _ = event_tx.send(event);
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        // Notify that connection is closed
        let _ = event_tx.send(ConnectionEvent::Closed {
            conn_id: conn_id.clone(),
        });
    }

    /// Queue a message for the peer.
    pub fn send(&self, message: HostMessage) -> bool {
        self.outbox.send(message).is_ok()
    }

    /// Handle for queueing messages from elsewhere.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Send our handshake.
    pub fn send_handshake(&self, peer_id: PeerId) -> bool {
        self.send(HostMessage::handshake(peer_id))
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
