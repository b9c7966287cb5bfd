//! Envelope types exchanged between peers and the relay.
//!
//! Every envelope is a JSON object with a case-sensitive `type` discriminator.
//! Clients send [`ClientMessage`]s; the relay answers with [`ServerMessage`]s.
//! The `data` carried by a signal is opaque to the relay and is passed
//! through as an untyped [`serde_json::Value`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a peer sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask to be added to a room, creating it if necessary.
    Join {
        /// Caller-chosen room key.
        room: String,
    },

    /// Ask the relay to forward `data` to another peer.
    Signal {
        /// Connection identifier of the recipient.
        to: String,
        /// Opaque signaling payload (SDP, ICE candidate, ...).
        data: Value,
    },
}

impl ClientMessage {
    /// Wire name of this message's `type` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Signal { .. } => "signal",
        }
    }
}

/// Messages the relay sends to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent to a peer that just joined: who was already in the room.
    ///
    /// Always sent, with an empty list when the room was empty, so the
    /// joiner gets an acknowledgment.
    ExistingPeer {
        /// Identifiers of the peers present before the join.
        peers: Vec<String>,
    },

    /// Sent to existing room members when someone joins.
    NewPeer {
        /// Identifier of the joining peer.
        id: String,
    },

    /// A relayed signaling payload.
    Signal {
        /// Identifier of the sending peer, filled in by the relay.
        from: String,
        /// Payload exactly as the sender supplied it.
        data: Value,
    },

    /// Sent to remaining room members when a peer disconnects.
    PeerLeft {
        /// Identifier of the departed peer.
        id: String,
    },
}

/// Message types a client may legitimately send.
pub const CLIENT_KINDS: [&str; 2] = ["join", "signal"];
