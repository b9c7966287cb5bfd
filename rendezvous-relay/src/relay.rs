//! Relay server core: shared state, WebSocket handler, and message dispatch.
//!
//! Every accepted WebSocket connection is assigned a fresh UUID v7 peer id
//! and registered in the [`RoomRegistry`]. Text frames are decoded into
//! envelopes and routed; anything malformed or unrecognised is dropped
//! without a reply. When the connection ends the peer is deregistered and
//! its rooms are told it left.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::codec::{self, Decoded};
use rendezvous_proto::envelope::ClientMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::fanout::{DEFAULT_SEND_TIMEOUT, PeerHandle};
use crate::registry::RoomRegistry;

/// Default maximum accepted inbound text message size in bytes (64 KB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default number of outbound messages buffered per peer.
const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Shared relay server state: the registry plus per-connection settings.
///
/// Owned by the running server and handed to each connection handler.
pub struct RelayState {
    /// Rooms and connected peers.
    pub registry: RoomRegistry,
    /// Largest inbound text message accepted, in bytes.
    max_message_size: usize,
    /// Capacity of each peer's outbound queue.
    outbound_queue_size: usize,
    /// How long a send may wait on a full peer queue.
    send_timeout: Duration,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Creates a new relay state using the limits from a resolved config.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            registry: RoomRegistry::new(),
            max_message_size: config.max_message_size,
            outbound_queue_size: config.outbound_queue_size.max(1),
            send_timeout: config.send_timeout,
        }
    }

    /// Send a WebSocket Close frame to all connected peers.
    ///
    /// Each writer task forwards the frame and the client closes its side,
    /// which ends the connection and deregisters the peer.
    pub async fn close_all_connections(&self) {
        for peer in self.registry.handles().await {
            tracing::info!(peer_id = %peer.peer_id(), "sending close frame to peer");
            peer.close();
        }
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// The connection lifecycle:
/// 1. Assign a peer id and register the peer.
/// 2. Spawn a writer task draining the peer's outbound queue.
/// 3. Read text frames and dispatch them until the socket closes.
/// 4. Deregister the peer, notifying its rooms.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let peer_id = Uuid::now_v7().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create a bounded channel feeding this peer's WebSocket writer.
    let (tx, mut rx) = mpsc::channel::<Message>(state.outbound_queue_size);
    let handle = PeerHandle::new(peer_id.clone(), tx, state.send_timeout);

    if let Err(e) = state.registry.register_peer(handle).await {
        tracing::error!(peer_id = %peer_id, error = %e, "rejecting connection");
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    tracing::info!(peer_id = %peer_id, "websocket connection established");

    let writer_peer_id = peer_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(peer_id = %writer_peer_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_peer_id = peer_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(&reader_peer_id, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(peer_id = %reader_peer_id, "received close frame");
                    break;
                }
                Message::Binary(data) => {
                    tracing::debug!(peer_id = %reader_peer_id, len = data.len(), "ignoring binary frame");
                }
                _ => {
                    // Ping/pong are answered by the WebSocket layer.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    match state.registry.deregister_peer(&peer_id).await {
        Ok(report) => tracing::info!(
            peer_id = %peer_id,
            notified = report.delivered,
            failed = report.failed.len(),
            "websocket connection closed"
        ),
        Err(e) => tracing::error!(peer_id = %peer_id, error = %e, "failed to deregister peer"),
    }
    let stats = state.registry.stats().await;
    tracing::debug!(peers = stats.peers, rooms = stats.rooms, "remaining registry contents");
}

/// Decodes and routes a text frame from a registered peer.
async fn handle_text_message(peer_id: &str, text: &str, state: &RelayState) {
    if text.len() > state.max_message_size {
        tracing::warn!(
            peer_id = %peer_id,
            size = text.len(),
            max = state.max_message_size,
            "message exceeds size limit, dropping"
        );
        return;
    }

    let msg = match codec::decode(text) {
        Ok(Decoded::Message(m)) => m,
        Ok(Decoded::Unknown(kind)) => {
            tracing::debug!(peer_id = %peer_id, kind = %kind, "ignoring unknown message type");
            return;
        }
        Err(e) => {
            tracing::warn!(peer_id = %peer_id, error = %e, "dropping malformed message");
            return;
        }
    };
    tracing::debug!(peer_id = %peer_id, kind = msg.kind(), "dispatching message");

    match msg {
        ClientMessage::Join { room } => match state.registry.handle_join(peer_id, &room).await {
            Ok(report) => tracing::info!(
                peer_id = %peer_id,
                room = %room,
                notified = report.delivered,
                failed = report.failed.len(),
                "peer joined room"
            ),
            Err(e) => tracing::warn!(peer_id = %peer_id, room = %room, error = %e, "join failed"),
        },
        ClientMessage::Signal { to, data } => {
            // The sender is always the connection's own id; clients cannot spoof `from`.
            match state.registry.handle_signal(peer_id, &to, data).await {
                Ok(delivered) => {
                    tracing::debug!(from = %peer_id, to = %to, delivered, "routed signal");
                }
                Err(e) => tracing::warn!(from = %peer_id, to = %to, error = %e, "signal failed"),
            }
        }
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Keeping a clone of the `Arc` lets the caller inspect the registry or
/// close every connection on shutdown.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}
