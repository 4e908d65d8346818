//! Exchange: drives the change-detection protocol between peers.
//!
//! The protocol works as follows:
//!
//! 1. When peer B connects, A asks B for its ordered share-base names
//! 2. When the names arrive, A sends B one `ChangesQuery` per subscription it
//!    holds for B, naming the share-base by its index in B's list
//! 3. B resolves the index to one of its own share-bases, scans the sub-path
//!    and answers with a `ChangesReply`
//! 4. A schedules a download for every reported file, then advances the
//!    subscription's watermark to the reply's `newWatermark`
//!
//! Every node plays both roles. Failures are logged and confined to the one
//! subscription, query or file they concern; nothing here ends a connection.

use crate::fs::FsError;
use crate::host::{Downloads, PeerLink, ShareBases, TransportError};
use crate::protocol::{ChangeMessage, ChangesQuery, ChangesReply, DecodeError};
use crate::scan::scan;
use crate::shares::ShareIndexRegistry;
use crate::store::{StoreError, WatermarkStore};
use crate::subscription::{Millis, SubscriptionKey};
use crate::PeerId;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Cannot translate share for peer {peer}: {detail}")]
    TranslationFailure { peer: PeerId, detail: String },

    #[error("Scan target '{path}' missing in share {share_index}")]
    ScanTargetMissing { share_index: u32, path: String },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Scan error: {0}")]
    Scan(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Where a peer connection stands in the share-list handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerPhase {
    /// Nothing asked yet (or the peer disconnected).
    #[default]
    Unknown,
    /// Share-base list requested, not yet received.
    SharesRequested,
    /// Share-base list recorded; queries have been sent.
    SharesKnown,
}

/// Queries sent after a share list arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBatch {
    pub sent: usize,
    /// Subscriptions whose share-base the peer no longer exports.
    pub untranslatable: usize,
    /// Queries the link failed to deliver.
    pub failed: usize,
}

/// What applying a reply did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub downloads_scheduled: usize,
    pub watermark: Millis,
}

/// Result of handling one inbound plug-in frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Not a change-detection frame (another plug-in or protocol version).
    Ignored,
    /// A query was answered with this many changed files.
    Answered { changed: usize },
    /// A reply was applied.
    Applied(ReplyOutcome),
}

/// Per-node protocol state and its collaborators.
pub struct Exchange {
    store: Arc<dyn WatermarkStore>,
    registry: ShareIndexRegistry,
    phases: Mutex<HashMap<PeerId, PeerPhase>>,
    link: Arc<dyn PeerLink>,
    share_bases: Arc<dyn ShareBases>,
    downloads: Arc<dyn Downloads>,
}

impl Exchange {
    pub fn new(
        store: Arc<dyn WatermarkStore>,
        link: Arc<dyn PeerLink>,
        share_bases: Arc<dyn ShareBases>,
        downloads: Arc<dyn Downloads>,
    ) -> Self {
        Self {
            store,
            registry: ShareIndexRegistry::new(),
            phases: Mutex::new(HashMap::new()),
            link,
            share_bases,
            downloads,
        }
    }

    pub fn store(&self) -> &Arc<dyn WatermarkStore> {
        &self.store
    }

    pub fn registry(&self) -> &ShareIndexRegistry {
        &self.registry
    }

    pub fn phase(&self, peer: PeerId) -> PeerPhase {
        self.lock_phases().get(&peer).copied().unwrap_or_default()
    }

    fn lock_phases(&self) -> MutexGuard<'_, HashMap<PeerId, PeerPhase>> {
        self.phases.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, peer: PeerId, phase: PeerPhase) {
        self.lock_phases().insert(peer, phase);
    }

    // ==================== Connection lifecycle ====================

    /// A peer connected: ask for its share-base list unless already asked.
    ///
    /// Returns the phase the peer is in afterwards.
    pub async fn on_peer_connected(&self, peer: PeerId) -> Result<PeerPhase> {
        let phase = self.phase(peer);
        if phase != PeerPhase::Unknown {
            debug!("Peer {} already in phase {:?}", peer, phase);
            return Ok(phase);
        }

        self.set_phase(peer, PeerPhase::SharesRequested);
        if let Err(e) = self.link.request_share_bases(peer).await {
            warn!("Could not request share-bases from peer {}: {}", peer, e);
            self.set_phase(peer, PeerPhase::Unknown);
            return Err(e.into());
        }
        debug!("Requested share-bases from peer {}", peer);
        Ok(PeerPhase::SharesRequested)
    }

    /// The peer's share-base list arrived: record it and query every
    /// subscription held for that peer.
    pub async fn on_share_list(&self, peer: PeerId, names: Vec<String>) -> Result<QueryBatch> {
        debug!("Peer {} exports {} share-base(s)", peer, names.len());
        self.registry.record(peer, names);
        self.set_phase(peer, PeerPhase::SharesKnown);

        let subscriptions = self.store.list_for_peer(peer).map_err(|e| {
            warn!("Could not list subscriptions for peer {}: {}", peer, e);
            e
        })?;

        let mut batch = QueryBatch::default();
        for subscription in subscriptions {
            let Some(share_index) = self.registry.index_of(peer, &subscription.share_base) else {
                let error = ExchangeError::TranslationFailure {
                    peer,
                    detail: format!("no share-base named '{}'", subscription.share_base),
                };
                warn!("Skipping {}: {}", subscription, error);
                batch.untranslatable += 1;
                continue;
            };

            match self
                .send_query(peer, share_index, &subscription.sub_path, subscription.watermark)
                .await
            {
                Ok(()) => batch.sent += 1,
                Err(_) => batch.failed += 1,
            }
        }

        info!(
            "Sent {} quer{} to peer {} ({} untranslatable, {} failed)",
            batch.sent,
            if batch.sent == 1 { "y" } else { "ies" },
            peer,
            batch.untranslatable,
            batch.failed
        );
        Ok(batch)
    }

    /// The connection closed: forget its share list so a reconnect starts over.
    pub fn on_peer_disconnected(&self, peer: PeerId) {
        self.lock_phases().remove(&peer);
        self.registry.forget(peer);
        debug!("Forgot share-bases of peer {}", peer);
    }

    /// Send one query now, bypassing the share-list handshake.
    pub async fn send_query(
        &self,
        peer: PeerId,
        share_index: u32,
        sub_path: &str,
        since: Millis,
    ) -> Result<()> {
        let query = ChangesQuery::new(share_index, sub_path, since);
        debug!("Sending {:?} to peer {}", query, peer);
        self.link
            .send(peer, ChangeMessage::from(query).encode())
            .await
            .map_err(|e| {
                warn!("Could not send query for '{}' to peer {}: {}", sub_path, peer, e);
                ExchangeError::from(e)
            })
    }

    // ==================== Inbound frames ====================

    /// Handle a plug-in frame from `peer`.
    ///
    /// Frames of other plug-ins are ignored. Failures are logged here; the
    /// returned error is for callers that want to observe them.
    pub async fn on_message(&self, peer: PeerId, data: &[u8]) -> Result<MessageOutcome> {
        let message = match ChangeMessage::decode(data) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(MessageOutcome::Ignored),
            Err(e) => {
                warn!("Dropping malformed frame from peer {}: {}", peer, e);
                return Err(e.into());
            }
        };

        let outcome = match message {
            ChangeMessage::Query(query) => self
                .answer_query(peer, query)
                .await
                .map(|changed| MessageOutcome::Answered { changed }),
            ChangeMessage::Reply(reply) => {
                self.apply_reply(peer, reply).await.map(MessageOutcome::Applied)
            }
        };
        match &outcome {
            Err(e @ ExchangeError::Store(StoreError::Persistence(_))) => {
                error!("Exchange with peer {} failed: {}", peer, e);
            }
            Err(e) => warn!("Exchange with peer {} failed: {}", peer, e),
            Ok(_) => {}
        }
        outcome
    }

    async fn answer_query(&self, peer: PeerId, query: ChangesQuery) -> Result<usize> {
        let fs = self.share_bases.resolve(query.share_index).ok_or_else(|| {
            ExchangeError::TranslationFailure {
                peer,
                detail: format!("no local share-base at index {}", query.share_index),
            }
        })?;

        // No reply for a missing target; the requester sees "unchanged".
        let missing = || ExchangeError::ScanTargetMissing {
            share_index: query.share_index,
            path: query.sub_path.clone(),
        };
        if !fs.exists(&query.sub_path).await? {
            return Err(missing());
        }
        let result = match scan(fs.as_ref(), &query.sub_path, query.since_timestamp).await {
            Ok(result) => result,
            Err(FsError::NotFound(_)) => return Err(missing()),
            Err(e) => return Err(e.into()),
        };

        let changed = result.changed.len();
        info!(
            "Peer {} asked for share {} '{}' since {}: {} changed, watermark {}",
            peer, query.share_index, query.sub_path, query.since_timestamp, changed, result.max_modified
        );
        let reply = ChangesReply::new(
            query.share_index,
            query.sub_path,
            result.max_modified,
            result.changed,
        );
        self.link.send(peer, ChangeMessage::from(reply).encode()).await?;
        Ok(changed)
    }

    async fn apply_reply(&self, peer: PeerId, reply: ChangesReply) -> Result<ReplyOutcome> {
        let share_base = self.registry.name_at(peer, reply.share_index).ok_or_else(|| {
            ExchangeError::TranslationFailure {
                peer,
                detail: format!("share index {} out of range", reply.share_index),
            }
        })?;
        let key = SubscriptionKey::new(peer, share_base, reply.sub_path.clone());
        let subscription = self.store.find(&key)?;

        let mut outcome = ReplyOutcome {
            downloads_scheduled: 0,
            watermark: reply.new_watermark,
        };
        for file in &reply.changed_files {
            let Some(subscription) = &subscription else {
                warn!("No subscription for {}; skipping '{}'", key, file);
                continue;
            };
            let path = subscription.remote_path(file);
            self.downloads.schedule(peer, &subscription.local_destination, &path);
            if let Err(e) = self.link.request_hashes(peer, reply.share_index, &path).await {
                warn!("Could not request hashes for '{}' from peer {}: {}", path, peer, e);
            }
            outcome.downloads_scheduled += 1;
        }

        self.store.advance_watermark(&key, reply.new_watermark)?;
        info!(
            "{}: {} download(s) scheduled, watermark now {}",
            key, outcome.downloads_scheduled, reply.new_watermark
        );
        Ok(outcome)
    }
}
