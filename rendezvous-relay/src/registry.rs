//! Room and peer registry for the relay server.
//!
//! Holds every connected peer's [`PeerHandle`] and the member set of every
//! live room. Rooms are created by the first join that names them and are
//! dropped as soon as their last member disconnects.
//!
//! All membership changes happen under a single write lock, so concurrent
//! joins never lose a member and a disconnected peer can never be re-added
//! to a room. A joiner's acknowledgment goes through a queue slot reserved
//! before locking; every other notification is sent after the lock is
//! released.

use std::collections::{BTreeSet, HashMap};

use axum::extract::ws::Message;
use rendezvous_proto::codec::{self, CodecError};
use rendezvous_proto::envelope::ServerMessage;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::fanout::{self, FanoutReport, PeerHandle};

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A peer with the same connection identifier is already registered.
    #[error("peer {0} is already registered")]
    DuplicatePeer(String),
    /// The operation names a peer that is not connected.
    #[error("peer {0} is not registered")]
    UnknownPeer(String),
    /// Failed to encode an outbound envelope.
    #[error("encoding failed: {0}")]
    EncodingFailed(#[from] CodecError),
}

/// Point-in-time counts of registry contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of connected peers.
    pub peers: usize,
    /// Number of non-empty rooms.
    pub rooms: usize,
}

#[derive(Default)]
struct Directory {
    peers: HashMap<String, PeerHandle>,
    rooms: HashMap<String, BTreeSet<String>>,
}

/// In-memory directory of connected peers and room membership.
pub struct RoomRegistry {
    inner: RwLock<Directory>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Directory::default()),
        }
    }

    /// Records a newly connected peer.
    ///
    /// A duplicate identifier is rejected and the existing registration is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicatePeer`] if the identifier is taken.
    pub async fn register_peer(&self, handle: PeerHandle) -> Result<(), RegistryError> {
        let mut dir = self.inner.write().await;
        if dir.peers.contains_key(handle.peer_id()) {
            return Err(RegistryError::DuplicatePeer(handle.peer_id().to_string()));
        }
        dir.peers.insert(handle.peer_id().to_string(), handle);
        Ok(())
    }

    /// Adds `peer_id` to `room`, creating the room if needed.
    ///
    /// The joiner always receives one `existing-peer` listing the members
    /// present before it arrived. Each of those members then receives a
    /// `new-peer` naming the joiner. Re-joining a room the peer is already
    /// in only repeats the `existing-peer` acknowledgment.
    ///
    /// A slot in the joiner's queue is reserved before the lock is taken and
    /// the acknowledgment is queued before the joiner becomes visible to
    /// others, so it is always the joiner's first message about the room.
    /// A joiner whose queue is closed or stalled is still added.
    ///
    /// Returns the outcome of the `new-peer` broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPeer`] if `peer_id` is not connected.
    pub async fn handle_join(&self, peer_id: &str, room: &str) -> Result<FanoutReport, RegistryError> {
        let notice = codec::encode(&ServerMessage::NewPeer {
            id: peer_id.to_string(),
        })?;

        let Some(joiner) = self.inner.read().await.peers.get(peer_id).cloned() else {
            return Err(RegistryError::UnknownPeer(peer_id.to_string()));
        };
        let permit = match joiner.reserve().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "cannot acknowledge join");
                None
            }
        };

        let (existing, recipients) = {
            let mut guard = self.inner.write().await;
            let dir = &mut *guard;
            // The peer may have disconnected while the slot was reserved.
            if !dir.peers.contains_key(peer_id) {
                return Err(RegistryError::UnknownPeer(peer_id.to_string()));
            }

            let existing: Vec<String> = dir
                .rooms
                .get(room)
                .map(|members| members.iter().filter(|id| id.as_str() != peer_id).cloned().collect())
                .unwrap_or_default();
            let ack = codec::encode(&ServerMessage::ExistingPeer {
                peers: existing.clone(),
            })?;
            if let Some(permit) = permit {
                permit.send(Message::Text(ack.into()));
            }
            let newly_added = dir.rooms.entry(room.to_string()).or_default().insert(peer_id.to_string());

            let recipients: Vec<PeerHandle> = if newly_added {
                existing.iter().filter_map(|id| dir.peers.get(id).cloned()).collect()
            } else {
                Vec::new()
            };
            (existing, recipients)
        };

        tracing::debug!(
            peer_id = %peer_id,
            room = %room,
            existing = existing.len(),
            "peer added to room"
        );

        Ok(fanout::broadcast(&recipients, &notice).await)
    }

    /// Relays `data` from `from` to the connected peer `to`.
    ///
    /// Room membership of either side is not checked. A missing target is a
    /// silent no-op. Returns whether the signal was queued for the target.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EncodingFailed`] if the envelope cannot be
    /// encoded.
    pub async fn handle_signal(&self, from: &str, to: &str, data: Value) -> Result<bool, RegistryError> {
        // Looked up among all connected peers rather than room members, so a
        // target that has not joined any room is still reachable.
        let target = self.inner.read().await.peers.get(to).cloned();
        let Some(target) = target else {
            tracing::debug!(from = %from, to = %to, "signal target not connected, dropping");
            return Ok(false);
        };

        let text = codec::encode(&ServerMessage::Signal {
            from: from.to_string(),
            data,
        })?;
        Ok(fanout::deliver(&target, text).await)
    }

    /// Removes a disconnected peer from the directory and from every room.
    ///
    /// Remaining members of each room the peer was in receive a `peer-left`;
    /// rooms left empty are dropped. Unknown identifiers are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EncodingFailed`] if the envelope cannot be
    /// encoded. The registry is left unchanged in that case.
    pub async fn deregister_peer(&self, peer_id: &str) -> Result<FanoutReport, RegistryError> {
        let notice = codec::encode(&ServerMessage::PeerLeft {
            id: peer_id.to_string(),
        })?;

        let recipients = {
            let mut guard = self.inner.write().await;
            let dir = &mut *guard;
            dir.peers.remove(peer_id);

            let mut recipients = Vec::new();
            for (room, members) in &mut dir.rooms {
                if members.remove(peer_id) {
                    tracing::debug!(peer_id = %peer_id, room = %room, remaining = members.len(), "peer removed from room");
                    recipients.extend(members.iter().filter_map(|id| dir.peers.get(id).cloned()));
                }
            }
            dir.rooms.retain(|_, members| !members.is_empty());
            recipients
        };

        Ok(fanout::broadcast(&recipients, &notice).await)
    }

    /// Returns the members of `room`, or `None` if the room does not exist.
    pub async fn members(&self, room: &str) -> Option<Vec<String>> {
        let dir = self.inner.read().await;
        dir.rooms.get(room).map(|m| m.iter().cloned().collect())
    }

    /// Returns `true` if `peer_id` is currently registered.
    pub async fn is_connected(&self, peer_id: &str) -> bool {
        self.inner.read().await.peers.contains_key(peer_id)
    }

    /// Returns the identifiers of all connected peers.
    pub async fn peer_ids(&self) -> Vec<String> {
        self.inner.read().await.peers.keys().cloned().collect()
    }

    /// Returns the send handles of all connected peers.
    pub async fn handles(&self) -> Vec<PeerHandle> {
        self.inner.read().await.peers.values().cloned().collect()
    }

    /// Returns the current number of peers and rooms.
    pub async fn stats(&self) -> RegistryStats {
        let dir = self.inner.read().await;
        RegistryStats {
            peers: dir.peers.len(),
            rooms: dir.rooms.len(),
        }
    }
}
