//! PeerId: the host's numeric identifier for a friend peer.
//!
//! The host assigns every peer a signed integer guid. It is the only peer
//! identity this crate sees: subscriptions are keyed by it and the share-index
//! registry is partitioned by it.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerIdError {
    #[error("Invalid peer ID: {0}")]
    InvalidFormat(#[from] std::num::ParseIntError),
}

/// Numeric peer identifier.
///
/// Displays and parses as a plain decimal integer, and serializes as a JSON
/// number so snapshot files and host messages stay readable.
///
/// # Examples
/// ```
/// use subscription_core::PeerId;
///
/// let peer_id: PeerId = "1643718002".parse().unwrap();
/// assert_eq!(peer_id.as_i64(), 1643718002);
/// assert_eq!(peer_id.to_string(), "1643718002");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(i64);

impl PeerId {
    /// Generate a random positive peer ID.
    ///
    /// Used when a daemon is started without a configured identity.
    pub fn generate() -> Self {
        use rand::Rng;
        Self(rand::rng().random_range(1..=i64::from(i32::MAX)))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl From<i64> for PeerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<PeerId> for i64 {
    fn from(peer_id: PeerId) -> i64 {
        peer_id.0
    }
}

impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        i64::deserialize(d).map(Self)
    }
}
