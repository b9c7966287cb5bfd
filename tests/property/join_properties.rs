//! Property-based tests for room discovery views.
//!
//! For any number of peers joining a room in sequence, the k-th joiner is
//! told about exactly the k-1 earlier peers and every earlier peer is told
//! about each later one, in join order. After everyone disconnects, the
//! room no longer exists.

use std::time::Duration;

use axum::extract::ws::Message;
use proptest::prelude::*;
use rendezvous_proto::codec;
use rendezvous_proto::envelope::ServerMessage;
use rendezvous_relay::fanout::PeerHandle;
use rendezvous_relay::registry::RoomRegistry;
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(Message::Text(t)) = rx.try_recv() {
        out.push(codec::decode_server(t.as_str()).unwrap());
    }
    out
}

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequential_joins_produce_expected_views(
        ids in prop::collection::btree_set("[a-z]{1,6}", 1..10),
        room in "[a-z]{1,12}",
    ) {
        let ids: Vec<String> = ids.into_iter().collect();

        let views = run(async {
            let registry = RoomRegistry::new();
            let mut receivers = Vec::new();
            for id in &ids {
                let (tx, rx) = mpsc::channel(64);
                registry
                    .register_peer(PeerHandle::new(id.clone(), tx, Duration::from_secs(1)))
                    .await
                    .unwrap();
                receivers.push(rx);
            }
            for id in &ids {
                registry.handle_join(id, &room).await.unwrap();
            }
            let views: Vec<Vec<ServerMessage>> = receivers.iter_mut().map(drain).collect();

            for id in &ids {
                registry.deregister_peer(id).await.unwrap();
            }
            assert!(registry.members(&room).await.is_none());
            views
        });

        for (k, view) in views.iter().enumerate() {
            let mut expected = vec![ServerMessage::ExistingPeer { peers: ids[..k].to_vec() }];
            expected.extend(ids[k + 1..].iter().map(|id| ServerMessage::NewPeer { id: id.clone() }));
            prop_assert_eq!(view, &expected);
        }
    }
}
