//! Integration tests for the per-connection actor, driven through in-memory
//! sink/stream pairs on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use finpulse_core::types::{new_id, DbId};
use finpulse_events::config::{ClientConfig, HubConfig};
use finpulse_events::ws::{run_client, ConnectionRegistry};
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::task::JoinHandle;

type Inbound = mpsc::UnboundedSender<Result<Message, String>>;
type Outbound = mpsc::UnboundedReceiver<Message>;

fn config() -> ClientConfig {
    ClientConfig::new(
        8,
        Duration::from_secs(1),
        Duration::from_secs(10),
        Duration::from_secs(5),
    )
    .unwrap()
}

/// Spawn a client actor for `user` and wait until it is registered.
async fn connect(
    registry: &Arc<ConnectionRegistry>,
    user: DbId,
) -> (Inbound, Outbound, JoinHandle<()>) {
    let (in_tx, in_rx) = mpsc::unbounded::<Result<Message, String>>();
    let (out_tx, out_rx) = mpsc::unbounded::<Message>();
    let handle = tokio::spawn(run_client(user, out_tx, in_rx, Arc::clone(registry), config()));

    while !registry.is_user_connected(user).await {
        tokio::task::yield_now().await;
    }
    (in_tx, out_rx, handle)
}

// ---------------------------------------------------------------------------
// Test: pings go out every period and pongs keep the connection alive
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn pongs_keep_connection_alive() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();
    let (in_tx, mut out_rx, _handle) = connect(&registry, user).await;

    // Three ping periods outlast the 10s read deadline unless pongs renew it.
    for _ in 0..3 {
        let frame = out_rx.next().await.unwrap();
        assert!(matches!(frame, Message::Ping(_)), "expected ping, got {frame:?}");
        in_tx.unbounded_send(Ok(Message::Pong(Bytes::new()))).unwrap();
    }

    assert!(registry.is_user_connected(user).await);
    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a client that never answers pings is dropped at the read deadline
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn missing_pong_expires_connection() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();
    let (_in_tx, out_rx, handle) = connect(&registry, user).await;

    handle.await.unwrap();

    assert!(!registry.is_user_connected(user).await);
    let frames: Vec<Message> = out_rx.collect().await;
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| matches!(f, Message::Ping(_))));

    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: queued messages are written as text frames
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn queued_message_written_as_text() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();
    let (_in_tx, mut out_rx, _handle) = connect(&registry, user).await;

    let queued = registry
        .send_to_user(user, "notification", &serde_json::json!({"subject": "Rent due"}))
        .await
        .unwrap();
    assert_eq!(queued, 1);

    let Message::Text(text) = out_rx.next().await.unwrap() else {
        panic!("expected a text frame");
    };
    let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(value["type"], "notification");
    assert_eq!(value["payload"]["subject"], "Rent due");

    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a peer Close frame disconnects and unregisters the client
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn peer_close_unregisters() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();
    let (in_tx, _out_rx, handle) = connect(&registry, user).await;

    in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
    handle.await.unwrap();

    assert!(!registry.is_user_connected(user).await);
    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: registry shutdown sends a Close frame and ends the actor
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn shutdown_sends_close_frame() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();
    let (_in_tx, mut out_rx, handle) = connect(&registry, user).await;

    registry.shutdown().await;

    let frame = out_rx.next().await.unwrap();
    assert!(matches!(frame, Message::Close(None)), "expected close, got {frame:?}");
    handle.await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: connecting after shutdown is refused
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn connect_after_shutdown_returns_immediately() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    registry.shutdown().await;

    let (_in_tx, in_rx) = mpsc::unbounded::<Result<Message, String>>();
    let (out_tx, out_rx) = mpsc::unbounded::<Message>();
    run_client(new_id(), out_tx, in_rx, Arc::clone(&registry), config()).await;

    let frames: Vec<Message> = out_rx.collect().await;
    assert!(frames.is_empty());
}
