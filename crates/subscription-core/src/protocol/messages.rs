//! Query and reply bodies, and the frame codec around them.
//!
//! Bodies are JSON objects with camelCase keys in a fixed order. Paths are
//! ordinary JSON strings, so names containing commas, quotes or `=` survive
//! intact.

use super::envelope::{MessageKind, TAG_SEPARATOR};
use crate::subscription::Millis;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Asks a peer which files under one of its folders changed.
///
/// Wire format: `{"shareIndex":1,"subPath":"docs/","sinceTimestamp":1000}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesQuery {
    /// Index of the share-base in the *receiver's* share list.
    pub share_index: u32,
    /// Folder (or single file) inside the share-base.
    pub sub_path: String,
    /// Only files modified strictly after this time are reported.
    pub since_timestamp: Millis,
}

impl ChangesQuery {
    pub fn new(share_index: u32, sub_path: impl Into<String>, since_timestamp: Millis) -> Self {
        Self {
            share_index,
            sub_path: sub_path.into(),
            since_timestamp,
        }
    }
}

/// Answer to a [`ChangesQuery`], echoing its share index and sub-path.
///
/// Wire format:
/// `{"shareIndex":1,"subPath":"docs/","newWatermark":2000,"changedFiles":["a.txt"]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesReply {
    pub share_index: u32,
    pub sub_path: String,
    /// Watermark the querying side should store next.
    pub new_watermark: Millis,
    /// Changed files, relative to the sub-path.
    pub changed_files: Vec<String>,
}

impl ChangesReply {
    pub fn new(
        share_index: u32,
        sub_path: impl Into<String>,
        new_watermark: Millis,
        changed_files: Vec<String>,
    ) -> Self {
        Self {
            share_index,
            sub_path: sub_path.into(),
            new_watermark,
            changed_files,
        }
    }
}

/// Errors decoding a frame that carries one of our tags.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("frame has no '=' between tag and body")]
    MissingSeparator,

    #[error("invalid {kind:?} body: {source}")]
    InvalidBody {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded change-detection message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeMessage {
    Query(ChangesQuery),
    Reply(ChangesReply),
}

impl ChangeMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Query(_) => MessageKind::Query,
            Self::Reply(_) => MessageKind::Reply,
        }
    }

    /// Render as `<tag>=<json body>`.
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Self::Query(query) => serde_json::to_string(query),
            Self::Reply(reply) => serde_json::to_string(reply),
        }
        .expect("ChangeMessage serialization should not fail");

        format!("{}{}{}", self.kind().tag(), TAG_SEPARATOR, body).into_bytes()
    }

    /// Parse a frame.
    ///
    /// Returns `Ok(None)` for frames whose tag is not ours (other message
    /// families, other protocol versions) so callers can ignore them quietly.
    /// A frame with one of our tags but a bad body is an error.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, DecodeError> {
        let Some(tag_len) = data.iter().position(|&b| b == TAG_SEPARATOR as u8) else {
            let frame = std::str::from_utf8(data)?;
            return match MessageKind::from_tag(frame.trim_end()) {
                Some(_) => Err(DecodeError::MissingSeparator),
                None => Ok(None),
            };
        };

        let tag = std::str::from_utf8(&data[..tag_len])?;
        let Some(kind) = MessageKind::from_tag(tag) else {
            return Ok(None);
        };
        let body = std::str::from_utf8(&data[tag_len + 1..])?;

        let message = match kind {
            MessageKind::Query => serde_json::from_str(body).map(Self::Query),
            MessageKind::Reply => serde_json::from_str(body).map(Self::Reply),
        }
        .map_err(|source| DecodeError::InvalidBody { kind, source })?;

        Ok(Some(message))
    }
}

impl From<ChangesQuery> for ChangeMessage {
    fn from(query: ChangesQuery) -> Self {
        Self::Query(query)
    }
}

impl From<ChangesReply> for ChangeMessage {
    fn from(reply: ChangesReply) -> Self {
        Self::Reply(reply)
    }
}
