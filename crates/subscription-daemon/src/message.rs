//! Host protocol messages.
//!
//! Every WebSocket frame between two daemons is one UTF-8 JSON object with a
//! `type` field. Change-detection frames travel opaquely inside `plugin`.

use serde::{Deserialize, Serialize};
use subscription_core::PeerId;

/// Maximum message size (50MB) to prevent memory exhaustion from malicious peers.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// A message exchanged between hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// First frame on every connection, in both directions.
    #[serde(rename_all = "camelCase")]
    Handshake { peer_id: PeerId },

    /// "Which share-bases do you export?"
    ShareListRequest,

    /// Ordered share-base names; a name's position is its index.
    ShareList { names: Vec<String> },

    /// Opaque plug-in frame (text, since plug-in frames are UTF-8).
    Plugin { data: String },

    /// Ask for block hashes of a file before downloading it.
    #[serde(rename_all = "camelCase")]
    HashRequest { share_index: u32, path: String },
}

impl HostMessage {
    pub fn handshake(peer_id: PeerId) -> Self {
        Self::Handshake { peer_id }
    }

    /// Wrap a plug-in frame. Invalid UTF-8 is replaced, never dropped.
    pub fn plugin(data: &[u8]) -> Self {
        Self::Plugin {
            data: String::from_utf8_lossy(data).into_owned(),
        }
    }

    /// Serialize to UTF-8 JSON bytes for sending as a WebSocket frame.
    pub fn to_binary(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HostMessage serialization should not fail")
    }

    /// Try to parse a host message.
    ///
    /// Returns None if the data is not valid UTF-8 JSON or not a known message.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}
