//! Per-recipient delivery with isolated failures.
//!
//! Each connected peer is reachable through a [`PeerHandle`], the sending half
//! of the bounded queue drained by that connection's WebSocket writer task.
//! [`broadcast`] issues one independent, time-bounded send per recipient and
//! polls them concurrently, so a closed or stalled peer never holds back
//! delivery to the others.

use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Default time a single send may wait for room in a peer's outbound queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a message could not be handed to a peer's writer task.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The peer's writer task has shut down.
    #[error("peer connection is closed")]
    Closed,
    /// The peer's outbound queue stayed full for the whole send timeout.
    #[error("peer outbound queue still full after {0:?}")]
    Timeout(Duration),
}

/// Send capability for one connected peer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer_id: String,
    sender: mpsc::Sender<Message>,
    send_timeout: Duration,
}

impl PeerHandle {
    /// Wraps the outbound queue of the connection identified by `peer_id`.
    #[must_use]
    pub fn new(peer_id: impl Into<String>, sender: mpsc::Sender<Message>, send_timeout: Duration) -> Self {
        Self {
            peer_id: peer_id.into(),
            sender,
            send_timeout,
        }
    }

    /// Connection identifier of this peer.
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Queues a text frame for this peer.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is gone, or
    /// [`SendError::Timeout`] if the queue stayed full for the send timeout.
    pub async fn send_text(&self, text: String) -> Result<(), SendError> {
        self.sender
            .send_timeout(Message::Text(text.into()), self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Closed(_) => SendError::Closed,
                SendTimeoutError::Timeout(_) => SendError::Timeout(self.send_timeout),
            })
    }

    /// Reserves one slot in this peer's outbound queue.
    ///
    /// Sending through the returned permit never waits, so it can be done
    /// while a lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is gone, or
    /// [`SendError::Timeout`] if no slot freed up within the send timeout.
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, Message>, SendError> {
        match tokio::time::timeout(self.send_timeout, self.sender.reserve()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout(self.send_timeout)),
        }
    }

    /// Asks the writer task to send a close frame, without waiting for room.
    pub fn close(&self) {
        if self.sender.try_send(Message::Close(None)).is_err() {
            tracing::debug!(peer_id = %self.peer_id, "close frame not queued");
        }
    }
}

/// Outcome of a [`broadcast`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Number of recipients the message was queued for.
    pub delivered: usize,
    /// Identifiers of recipients whose send failed.
    pub failed: Vec<String>,
}

/// Sends `text` to a single peer, logging and swallowing any failure.
///
/// Returns `true` if the message was queued.
pub async fn deliver(peer: &PeerHandle, text: String) -> bool {
    match peer.send_text(text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(peer_id = %peer.peer_id(), error = %e, "failed to deliver message");
            false
        }
    }
}

/// Sends `text` to every recipient independently and concurrently.
///
/// A failed or slow recipient is logged and skipped; it never prevents or
/// delays delivery to the rest.
pub async fn broadcast(recipients: &[PeerHandle], text: &str) -> FanoutReport {
    let attempts = recipients.iter().map(|peer| async move {
        let result = peer.send_text(text.to_owned()).await;
        (peer.peer_id(), result)
    });

    let mut report = FanoutReport::default();
    for (peer_id, result) in join_all(attempts).await {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "broadcast to peer failed, skipping");
                report.failed.push(peer_id.to_string());
            }
        }
    }
    report
}
