//! Integration tests for the connection registry: membership bookkeeping,
//! per-user fan-out, and eviction of slow clients.

use finpulse_core::types::new_id;
use finpulse_events::config::HubConfig;
use finpulse_events::ws::{Client, ConnectionRegistry};

// ---------------------------------------------------------------------------
// Test: a user is connected while at least one client is registered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn user_connected_until_last_client_leaves() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();

    let (first, _rx1) = Client::new(user, 8);
    let (second, _rx2) = Client::new(user, 8);
    let (first_key, second_key) = (first.key(), second.key());
    registry.register(first).await.unwrap();
    registry.register(second).await.unwrap();

    assert!(registry.is_user_connected(user).await);
    assert_eq!(registry.connection_count().await, 2);
    assert_eq!(registry.connected_users().await, vec![user]);

    assert!(registry.unregister(first_key).await.unwrap());
    assert!(registry.is_user_connected(user).await);

    assert!(registry.unregister(second_key).await.unwrap());
    assert!(!registry.is_user_connected(user).await);
    assert!(registry.connected_users().await.is_empty());

    // Already gone.
    assert!(!registry.unregister(second_key).await.unwrap());

    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: sending to a user with no connections is not an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_absent_user_reaches_nobody() {
    let registry = ConnectionRegistry::start(HubConfig::default());

    let queued = registry
        .send_to_user(new_id(), "notification", &serde_json::json!({"x": 1}))
        .await
        .unwrap();

    assert_eq!(queued, 0);
    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: every client of a user receives the message, other users do not
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_fans_out_to_all_clients_of_user() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();
    let other = new_id();

    let (laptop, mut laptop_rx) = Client::new(user, 8);
    let (phone, mut phone_rx) = Client::new(user, 8);
    let (bystander, mut bystander_rx) = Client::new(other, 8);
    registry.register(laptop).await.unwrap();
    registry.register(phone).await.unwrap();
    registry.register(bystander).await.unwrap();

    let queued = registry
        .send_to_user(user, "notification", &serde_json::json!({"subject": "Hi"}))
        .await
        .unwrap();
    assert_eq!(queued, 2);

    for rx in [&mut laptop_rx, &mut phone_rx] {
        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["payload"]["subject"], "Hi");
    }
    assert!(bystander_rx.try_recv().is_err());

    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a client whose queue is full is evicted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saturated_client_is_evicted() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();

    let (slow, mut slow_rx) = Client::new(user, 1);
    registry.register(slow).await.unwrap();

    let first = registry.send_to_user(user, "tick", &1).await.unwrap();
    let second = registry.send_to_user(user, "tick", &2).await.unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert!(!registry.is_user_connected(user).await);
    assert_eq!(registry.connection_count().await, 0);

    // The message queued before eviction is still readable, then the queue
    // reports closed.
    assert!(slow_rx.recv().await.is_some());
    assert!(slow_rx.recv().await.is_none());

    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a client that hung up is evicted on the next send
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_client_is_evicted_on_send() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let user = new_id();

    let (gone, gone_rx) = Client::new(user, 8);
    let (live, mut live_rx) = Client::new(user, 8);
    registry.register(gone).await.unwrap();
    registry.register(live).await.unwrap();
    drop(gone_rx);

    let queued = registry.send_to_user(user, "tick", &"x").await.unwrap();

    assert_eq!(queued, 1);
    assert_eq!(registry.connection_count().await, 1);
    assert!(live_rx.recv().await.is_some());

    registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: shutdown closes every outbound queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_all_queues() {
    let registry = ConnectionRegistry::start(HubConfig::default());
    let (a, mut a_rx) = Client::new(new_id(), 8);
    let (b, mut b_rx) = Client::new(new_id(), 8);
    registry.register(a).await.unwrap();
    registry.register(b).await.unwrap();

    registry.shutdown().await;

    assert!(a_rx.recv().await.is_none());
    assert!(b_rx.recv().await.is_none());
    assert_eq!(registry.connection_count().await, 0);
}
