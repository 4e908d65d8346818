//! Subscription records: one watched sub-path of a friend's share-base.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Milliseconds since the Unix epoch, the unit of every modification time
/// and watermark in this crate.
pub type Millis = i64;

/// Unique key of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKey {
    pub peer_id: PeerId,
    /// Name of the remote share-base (never sent on the wire).
    pub share_base: String,
    /// Path below the share-base, e.g. `docs/`.
    pub sub_path: String,
}

impl SubscriptionKey {
    pub fn new(peer_id: PeerId, share_base: impl Into<String>, sub_path: impl Into<String>) -> Self {
        Self {
            peer_id,
            share_base: share_base.into(),
            sub_path: sub_path.into(),
        }
    }

    /// Whether `subscription` is stored under this key.
    pub fn matches(&self, subscription: &Subscription) -> bool {
        subscription.peer_id == self.peer_id
            && subscription.share_base == self.share_base
            && subscription.sub_path == self.sub_path
    }
}

impl Display for SubscriptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peer {} share '{}' sub-path '{}'",
            self.peer_id, self.share_base, self.sub_path
        )
    }
}

/// What a subscription's sub-path names on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    #[default]
    Folder,
    /// A single file; replies list it by its own name.
    File,
}

/// A durable watch on a friend's folder (or single file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub peer_id: PeerId,
    pub share_base: String,
    pub sub_path: String,
    /// Local directory that receives the downloaded files.
    pub local_destination: String,
    /// Newest modification time already accounted for.
    pub watermark: Millis,
    #[serde(default)]
    pub target: TargetKind,
}

impl Subscription {
    /// A folder subscription.
    pub fn new(
        peer_id: PeerId,
        share_base: impl Into<String>,
        sub_path: impl Into<String>,
        local_destination: impl Into<String>,
        watermark: Millis,
    ) -> Self {
        Self {
            peer_id,
            share_base: share_base.into(),
            sub_path: sub_path.into(),
            local_destination: local_destination.into(),
            watermark,
            target: TargetKind::Folder,
        }
    }

    pub fn with_target(mut self, target: TargetKind) -> Self {
        self.target = target;
        self
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.peer_id, self.share_base.clone(), self.sub_path.clone())
    }

    /// Remote path of a file a reply reported for this subscription.
    ///
    /// For a folder, `docs/` + `a.txt` and `docs` + `a.txt` both give
    /// `docs/a.txt`. A file subscription always downloads its own sub-path.
    pub fn remote_path(&self, file: &str) -> String {
        let sub_path = self.sub_path.as_str();
        match self.target {
            TargetKind::File => sub_path.to_string(),
            TargetKind::Folder if sub_path.is_empty() || sub_path.ends_with('/') => {
                format!("{}{}", sub_path, file)
            }
            TargetKind::Folder => format!("{}/{}", sub_path, file),
        }
    }
}

impl Display for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            TargetKind::Folder => "sub-path",
            TargetKind::File => "file",
        };
        write!(
            f,
            "subscription for peer {} in share '{}' {} '{}' into '{}' since {}",
            self.peer_id, self.share_base, target, self.sub_path, self.local_destination, self.watermark
        )
    }
}
