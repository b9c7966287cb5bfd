//! End-to-end signaling tests over real WebSocket connections.
//!
//! Covers room discovery (`existing-peer` / `new-peer`), point-to-point
//! signal relay, departure notices, and room cleanup.
//!
//! Verification command: `cargo test --test signaling`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::codec;
use rendezvous_proto::envelope::{ClientMessage, ServerMessage};
use rendezvous_relay::relay::{RelayState, start_server_with_state};
use serde_json::json;
use tokio_tungstenite::tungstenite;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a relay on a random port, keeping a handle on its state.
async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

/// Connects a WebSocket client and returns it with its relay-assigned id.
async fn connect_peer(addr: std::net::SocketAddr, state: &RelayState) -> (WsStream, String) {
    let before = state.registry.peer_ids().await;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    for _ in 0..200 {
        let ids = state.registry.peer_ids().await;
        if let Some(id) = ids.into_iter().find(|id| !before.contains(id)) {
            return (ws, id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("relay never registered the connection");
}

/// Sends a client envelope.
async fn send(ws: &mut WsStream, msg: &ClientMessage) {
    let text = codec::encode_client(msg).unwrap();
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

async fn join(ws: &mut WsStream, room: &str) {
    send(
        ws,
        &ClientMessage::Join {
            room: room.to_string(),
        },
    )
    .await;
}

/// Receives and decodes the next server envelope.
async fn recv(ws: &mut WsStream) -> ServerMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    codec::decode_server(msg.to_text().unwrap()).unwrap()
}

/// Asserts that nothing arrives within a short window.
async fn assert_silent(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected message: {result:?}");
}

fn existing(peers: &[&String]) -> ServerMessage {
    ServerMessage::ExistingPeer {
        peers: peers.iter().map(|p| (*p).clone()).collect(),
    }
}

// =============================================================================
// Join
// =============================================================================

/// Joining an empty room yields one empty `existing-peer` and nothing else.
#[tokio::test]
async fn join_empty_room_acknowledges() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, _id_a) = connect_peer(addr, &state).await;
    let (mut ws_b, _id_b) = connect_peer(addr, &state).await;

    join(&mut ws_a, "lobby").await;

    assert_eq!(recv(&mut ws_a).await, existing(&[]));
    assert_silent(&mut ws_a).await;
    assert_silent(&mut ws_b).await;
}

/// Peer k sees peers 1..k-1; earlier peers each hear about every later one.
#[tokio::test]
async fn sequential_joins_build_views() {
    let (addr, state) = start_relay().await;
    let (mut ws_1, id_1) = connect_peer(addr, &state).await;
    let (mut ws_2, id_2) = connect_peer(addr, &state).await;
    let (mut ws_3, id_3) = connect_peer(addr, &state).await;

    join(&mut ws_1, "mesh").await;
    assert_eq!(recv(&mut ws_1).await, existing(&[]));

    join(&mut ws_2, "mesh").await;
    assert_eq!(recv(&mut ws_2).await, existing(&[&id_1]));
    assert_eq!(recv(&mut ws_1).await, ServerMessage::NewPeer { id: id_2.clone() });

    join(&mut ws_3, "mesh").await;
    match recv(&mut ws_3).await {
        ServerMessage::ExistingPeer { mut peers } => {
            peers.sort();
            let mut expected = vec![id_1.clone(), id_2.clone()];
            expected.sort();
            assert_eq!(peers, expected);
        }
        other => panic!("expected ExistingPeer, got {other:?}"),
    }
    assert_eq!(recv(&mut ws_1).await, ServerMessage::NewPeer { id: id_3.clone() });
    assert_eq!(recv(&mut ws_2).await, ServerMessage::NewPeer { id: id_3 });

    assert_silent(&mut ws_1).await;
    assert_silent(&mut ws_2).await;
    assert_silent(&mut ws_3).await;
}

/// Joins in one room are invisible to members of another.
#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, _id_a) = connect_peer(addr, &state).await;
    let (mut ws_b, _id_b) = connect_peer(addr, &state).await;

    join(&mut ws_a, "red").await;
    let _ = recv(&mut ws_a).await;
    join(&mut ws_b, "blue").await;

    assert_eq!(recv(&mut ws_b).await, existing(&[]));
    assert_silent(&mut ws_a).await;
}

/// Two peers joining an empty room at the same time end up seeing each other.
#[tokio::test]
async fn concurrent_joins_converge() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, id_a) = connect_peer(addr, &state).await;
    let (mut ws_b, id_b) = connect_peer(addr, &state).await;

    tokio::join!(join(&mut ws_a, "race"), join(&mut ws_b, "race"));

    // Each peer hears its acknowledgment first. Exactly one of them was first
    // into the room: it gets an empty list then a new-peer, the other gets a
    // one-element list.
    let a_first = recv(&mut ws_a).await;
    let b_first = recv(&mut ws_b).await;
    match (a_first, b_first) {
        (ServerMessage::ExistingPeer { peers: pa }, ServerMessage::ExistingPeer { peers: pb })
            if pa.is_empty() =>
        {
            assert_eq!(pb, vec![id_a.clone()]);
            assert_eq!(recv(&mut ws_a).await, ServerMessage::NewPeer { id: id_b.clone() });
        }
        (ServerMessage::ExistingPeer { peers: pa }, ServerMessage::ExistingPeer { peers: pb })
            if pb.is_empty() =>
        {
            assert_eq!(pa, vec![id_b.clone()]);
            assert_eq!(recv(&mut ws_b).await, ServerMessage::NewPeer { id: id_a.clone() });
        }
        other => panic!("inconsistent views: {other:?}"),
    }

    let mut members = state.registry.members("race").await.unwrap();
    members.sort();
    let mut expected = vec![id_a, id_b];
    expected.sort();
    assert_eq!(members, expected);
}

// =============================================================================
// Signal
// =============================================================================

/// A signal reaches exactly its target, with `from` set and `data` untouched.
#[tokio::test]
async fn signal_is_relayed_to_target_only() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, id_a) = connect_peer(addr, &state).await;
    let (mut ws_b, id_b) = connect_peer(addr, &state).await;
    let (mut ws_c, _id_c) = connect_peer(addr, &state).await;

    // Join one at a time, draining discovery traffic as it arrives.
    join(&mut ws_a, "call").await;
    let _ = recv(&mut ws_a).await;
    join(&mut ws_b, "call").await;
    let _ = recv(&mut ws_b).await;
    let _ = recv(&mut ws_a).await;
    join(&mut ws_c, "call").await;
    let _ = recv(&mut ws_c).await;
    let _ = recv(&mut ws_a).await;
    let _ = recv(&mut ws_b).await;

    let data = json!({
        "type": "offer",
        "sdp": "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n",
        "extra": [1, 2.5, null, {"deep": true}]
    });
    send(
        &mut ws_a,
        &ClientMessage::Signal {
            to: id_b.clone(),
            data: data.clone(),
        },
    )
    .await;

    assert_eq!(recv(&mut ws_b).await, ServerMessage::Signal { from: id_a, data });
    assert_silent(&mut ws_a).await;
    assert_silent(&mut ws_c).await;
}

/// Peers that never joined a room can still be signaled by id.
#[tokio::test]
async fn signal_reaches_peer_outside_any_room() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, id_a) = connect_peer(addr, &state).await;
    let (mut ws_b, id_b) = connect_peer(addr, &state).await;

    join(&mut ws_a, "somewhere").await;
    let _ = recv(&mut ws_a).await;

    send(
        &mut ws_a,
        &ClientMessage::Signal {
            to: id_b,
            data: json!("candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host"),
        },
    )
    .await;

    match recv(&mut ws_b).await {
        ServerMessage::Signal { from, data } => {
            assert_eq!(from, id_a);
            assert_eq!(data, json!("candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host"));
        }
        other => panic!("expected Signal, got {other:?}"),
    }
}

/// Signaling a missing peer is silent for everyone.
#[tokio::test]
async fn signal_to_unknown_target_is_silent() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, _id_a) = connect_peer(addr, &state).await;
    let (mut ws_b, _id_b) = connect_peer(addr, &state).await;

    send(
        &mut ws_a,
        &ClientMessage::Signal {
            to: "no-such-peer".to_string(),
            data: json!({}),
        },
    )
    .await;

    assert_silent(&mut ws_a).await;
    assert_silent(&mut ws_b).await;
}

// =============================================================================
// Disconnect
// =============================================================================

/// Remaining members each get one `peer-left`; the room survives.
#[tokio::test]
async fn disconnect_notifies_each_remaining_member_once() {
    let (addr, state) = start_relay().await;
    let (mut ws_p, id_p) = connect_peer(addr, &state).await;
    let (mut ws_q1, _id_q1) = connect_peer(addr, &state).await;
    let (mut ws_q2, _id_q2) = connect_peer(addr, &state).await;

    join(&mut ws_p, "room").await;
    let _ = recv(&mut ws_p).await;
    join(&mut ws_q1, "room").await;
    let _ = recv(&mut ws_q1).await;
    join(&mut ws_q2, "room").await;
    let _ = recv(&mut ws_q2).await;
    let _ = recv(&mut ws_q1).await; // new-peer q2

    ws_p.close(None).await.unwrap();

    assert_eq!(recv(&mut ws_q1).await, ServerMessage::PeerLeft { id: id_p.clone() });
    assert_eq!(recv(&mut ws_q2).await, ServerMessage::PeerLeft { id: id_p });
    assert_silent(&mut ws_q1).await;
    assert_silent(&mut ws_q2).await;
    assert_eq!(state.registry.members("room").await.map(|m| m.len()), Some(2));
}

/// Once the last member leaves, the room is gone and a new join starts fresh.
#[tokio::test]
async fn emptied_room_is_recreated_fresh() {
    let (addr, state) = start_relay().await;
    let (mut ws_a, id_a) = connect_peer(addr, &state).await;

    join(&mut ws_a, "ephemeral").await;
    let _ = recv(&mut ws_a).await;
    drop(ws_a);

    for _ in 0..200 {
        if !state.registry.is_connected(&id_a).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(state.registry.members("ephemeral").await.is_none());

    let (mut ws_b, _id_b) = connect_peer(addr, &state).await;
    join(&mut ws_b, "ephemeral").await;
    assert_eq!(recv(&mut ws_b).await, existing(&[]));
}
