//! Root registration tests, including a full bootstrap between two clients
//! through an in-process relay
//!
//! Run with: cargo test --test integration_root_registration

mod common;

use common::{decode, encode, node, outcomes, recording, settle};
use rtc_bootstrap_core::{
    BootstrapError, ConnectionRequest, RequestHandler, RootEvent, RootFrame, SignalingMessage,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time;

fn channel_handler() -> (RequestHandler, UnboundedReceiver<RootEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: RequestHandler = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (handler, rx)
}

#[tokio::test(start_paused = true)]
async fn test_root_url_uses_secret() {
    let mut n = node(true);
    let (handler, _events) = channel_handler();

    n.client.register_as_root("s3cr3t", handler).unwrap();
    let relay = n.next_relay().await;

    assert_eq!(
        relay.url(),
        "ws://relay.test:5000/s3cr3t/webrtc-bootstrap-root"
    );
    assert!(n.client.is_root_registered());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_ignored_and_requests_delivered_once() {
    let mut n = node(true);
    let (handler, mut events) = channel_handler();

    n.client.register_as_root("s3cr3t", handler).unwrap();
    let relay = n.next_relay().await;
    relay.open();
    relay.deliver(RootFrame::heartbeat());
    relay.deliver(encode(Some("peer-A"), None, json!({"type": "offer"}), 0));
    relay.deliver(RootFrame::heartbeat());
    settle().await;

    match events.try_recv() {
        Ok(RootEvent::Request(message)) => {
            assert_eq!(message.origin.as_deref(), Some("peer-A"));
            assert_eq!(message.signal, json!({"type": "offer"}));
        }
        other => panic!("Expected request, got {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_every_interval_while_open() {
    let mut n = node(true);
    let (handler, _events) = channel_handler();

    n.client.register_as_root("s3cr3t", handler).unwrap();
    let mut relay = n.next_relay().await;
    relay.open();
    settle().await;

    time::sleep(Duration::from_millis(9_900)).await;
    assert!(relay.try_recv_frame().is_none());

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.try_recv_frame(), Some(RootFrame::heartbeat()));

    time::sleep(Duration::from_secs(20)).await;
    assert_eq!(relay.try_recv_frame(), Some(RootFrame::heartbeat()));
    assert_eq!(relay.try_recv_frame(), Some(RootFrame::heartbeat()));
    assert!(relay.try_recv_frame().is_none());

    relay.close();
    settle().await;
    time::sleep(Duration::from_secs(30)).await;
    assert!(relay.try_recv_frame().is_none());
    assert!(!n.client.is_root_registered());
}

#[tokio::test(start_paused = true)]
async fn test_root_error_goes_to_handler() {
    let mut n = node(true);
    let (handler, mut events) = channel_handler();

    n.client.register_as_root("s3cr3t", handler).unwrap();
    let relay = n.next_relay().await;
    relay.fail("tls handshake failed");
    settle().await;

    assert_eq!(
        events.try_recv().ok(),
        Some(RootEvent::Error(BootstrapError::Channel(
            "tls handshake failed".to_string()
        )))
    );
    assert!(relay.is_destroyed());
    assert!(!n.client.is_root_registered());
}

#[tokio::test(start_paused = true)]
async fn test_register_again_after_registration_ends() {
    let mut n = node(true);
    let (handler, _events) = channel_handler();

    n.client
        .register_as_root("s3cr3t", Arc::clone(&handler))
        .unwrap();
    assert_eq!(
        n.client.register_as_root("s3cr3t", Arc::clone(&handler)),
        Err(BootstrapError::AlreadyRegistered)
    );

    let first = n.next_relay().await;
    first.close();
    settle().await;

    n.client.register_as_root("s3cr3t", handler).unwrap();
    let second = n.next_relay().await;
    assert_eq!(second.url(), first.url());
    assert!(first.is_destroyed());
    assert!(!second.is_destroyed());
    assert!(n.client.is_root_registered());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_through_root() {
    let mut root = node(true);
    let mut joiner = node(true);
    let root_results = outcomes();
    let joiner_results = outcomes();
    let (handler, mut requests) = channel_handler();

    root.client.register_as_root("s3cr3t", handler).unwrap();
    let root_channel = root.next_relay().await;
    root_channel.open();

    // Joiner opens the negotiation through the relay's default route
    joiner
        .client
        .connect(ConnectionRequest::initiator(), recording(&joiner_results))
        .unwrap();
    let mut joiner_channel = joiner.next_relay().await;
    let joiner_engine = joiner.next_engine().await;
    joiner_channel.open();
    joiner_engine.emit(json!({"type": "offer"}));

    let offer = decode(&joiner_channel.recv_frame().await.unwrap());
    assert_eq!(offer.destination, None);
    root_channel.deliver(encode(Some("joiner"), None, offer.signal, offer.rank));

    // Root answers on a fresh attempt
    let request: SignalingMessage = match requests.recv().await {
        Some(RootEvent::Request(message)) => message,
        other => panic!("Expected request, got {:?}", other),
    };
    root.client
        .connect(ConnectionRequest::from(request), recording(&root_results))
        .unwrap();
    let mut root_join = root.next_relay().await;
    let root_engine = root.next_engine().await;
    settle().await;
    assert_eq!(root_engine.peer.received(), vec![json!({"type": "offer"})]);

    root_engine.emit(json!({"type": "answer"}));
    root_join.open();
    let answer = decode(&root_join.recv_frame().await.unwrap());
    assert_eq!(answer.destination.as_deref(), Some("joiner"));
    joiner_channel.deliver(encode(
        Some("root"),
        answer.destination.as_deref(),
        answer.signal,
        answer.rank,
    ));
    settle().await;
    assert_eq!(joiner_engine.peer.received(), vec![json!({"type": "answer"})]);

    // Joiner now addresses the root directly
    joiner_engine.emit(json!({"candidate": "c1"}));
    let candidate = decode(&joiner_channel.recv_frame().await.unwrap());
    assert_eq!(candidate.destination.as_deref(), Some("root"));
    assert_eq!(candidate.rank, 1);
    root_join.deliver(encode(Some("joiner"), Some("root"), candidate.signal, candidate.rank));
    settle().await;
    assert_eq!(root_engine.peer.received().len(), 2);

    joiner_engine.connected();
    root_engine.connected();
    settle().await;

    assert_eq!(*joiner_results.lock(), vec![Ok(())]);
    assert_eq!(*root_results.lock(), vec![Ok(())]);
    assert!(joiner_channel.is_destroyed());
    assert!(root_join.is_destroyed());
    // The root registration outlives the attempts it answered
    assert!(root.client.is_root_registered());
    assert!(!root_channel.is_destroyed());
}
