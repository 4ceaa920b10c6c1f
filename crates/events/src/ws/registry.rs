//! Single-writer connection registry.
//!
//! All mutation of the user → clients map happens on one spawned loop that
//! receives commands over three bounded channels (register, unregister,
//! broadcast). Read-only queries go through a separate `RwLock`-guarded
//! snapshot of per-user connection counts, so status checks never contend
//! with the fan-out path.
//!
//! Each client owns a bounded outbound queue. Fan-out uses `try_send`: a
//! full queue means the consumer is too slow, and the client is evicted
//! instead of blocking the producer.

use std::collections::HashMap;
use std::sync::Arc;

use finpulse_core::types::{new_id, DbId};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;

/// Identifies one connection. Unique across users.
pub type ClientId = uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The registry loop has been shut down.
    #[error("Connection registry is not running")]
    Stopped,

    #[error("Failed to encode hub message: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Address of a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub user_id: DbId,
    pub id: ClientId,
}

/// One live connection as seen by the registry: its owner and the sending
/// half of its bounded outbound queue.
///
/// The queue closes once every clone of the client is dropped; after
/// registration the registry should hold the only one.
#[derive(Debug, Clone)]
pub struct Client {
    key: ClientKey,
    outbound: mpsc::Sender<String>,
}

impl Client {
    /// Create a client with a fresh id and an outbound queue of `capacity`
    /// messages. The receiver feeds the connection's writer.
    pub fn new(user_id: DbId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let client = Self {
            key: ClientKey {
                user_id,
                id: new_id(),
            },
            outbound,
        };
        (client, rx)
    }

    pub fn key(&self) -> ClientKey {
        self.key
    }

    pub fn user_id(&self) -> DbId {
        self.key.user_id
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

struct Registration {
    client: Client,
    ack: oneshot::Sender<()>,
}

struct Removal {
    key: ClientKey,
    ack: oneshot::Sender<bool>,
}

struct Broadcast {
    user_id: DbId,
    message: String,
    queued: oneshot::Sender<usize>,
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Process-wide registry of live connections.
///
/// Created via [`ConnectionRegistry::start`]; the returned `Arc` can be
/// cloned into connection handlers and the dispatcher.
pub struct ConnectionRegistry {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Removal>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    /// Live connection count per user, written only by the loop.
    snapshot: Arc<RwLock<HashMap<DbId, usize>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionRegistry {
    /// Spawn the registry loop. Must be called inside a Tokio runtime.
    pub fn start(config: HubConfig) -> Arc<Self> {
        let buffer = config.command_buffer.max(1);
        let (register_tx, register_rx) = mpsc::channel(buffer);
        let (unregister_tx, unregister_rx) = mpsc::channel(buffer);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(buffer);
        let snapshot = Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let event_loop = RegistryLoop {
            clients: HashMap::new(),
            snapshot: Arc::clone(&snapshot),
        };
        let task = tokio::spawn(event_loop.run(
            register_rx,
            unregister_rx,
            broadcast_rx,
            cancel.clone(),
        ));
        tracing::info!(command_buffer = buffer, "Connection registry started");

        Arc::new(Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            snapshot,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Add a client to its user's connection set.
    ///
    /// Registering a client whose id is already present is a no-op.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.register_tx
            .send(Registration { client, ack })
            .await
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Remove a client and close its outbound queue.
    ///
    /// Returns `false` if the client was not registered (already evicted or
    /// unregistered).
    pub async fn unregister(&self, key: ClientKey) -> Result<bool, HubError> {
        let (ack, done) = oneshot::channel();
        self.unregister_tx
            .send(Removal { key, ack })
            .await
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Queue a `{type, payload}` message for every live client of a user.
    ///
    /// Returns the number of clients the message was queued for. Clients
    /// whose queue is full or closed are evicted and not counted. A user
    /// with no connections yields `Ok(0)`.
    pub async fn send_to_user<P>(
        &self,
        user_id: DbId,
        message_type: &str,
        payload: &P,
    ) -> Result<usize, HubError>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let message = serde_json::json!({ "type": message_type, "payload": payload }).to_string();

        let (queued, done) = oneshot::channel();
        self.broadcast_tx
            .send(Broadcast {
                user_id,
                message,
                queued,
            })
            .await
            .map_err(|_| HubError::Stopped)?;
        done.await.map_err(|_| HubError::Stopped)
    }

    pub async fn is_user_connected(&self, user_id: DbId) -> bool {
        self.snapshot.read().await.contains_key(&user_id)
    }

    /// Users with at least one live connection, in no particular order.
    pub async fn connected_users(&self) -> Vec<DbId> {
        self.snapshot.read().await.keys().copied().collect()
    }

    /// Total number of live connections across all users.
    pub async fn connection_count(&self) -> usize {
        self.snapshot.read().await.values().sum()
    }

    /// Stop the loop and close every outbound queue.
    ///
    /// Later calls to the mutating operations return [`HubError::Stopped`].
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Connection registry task failed");
            }
        }
        tracing::info!("Connection registry stopped");
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// State owned exclusively by the registry task.
struct RegistryLoop {
    clients: HashMap<DbId, HashMap<ClientId, mpsc::Sender<String>>>,
    snapshot: Arc<RwLock<HashMap<DbId, usize>>>,
}

impl RegistryLoop {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<Registration>,
        mut unregister_rx: mpsc::Receiver<Removal>,
        mut broadcast_rx: mpsc::Receiver<Broadcast>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(cmd) = register_rx.recv() => {
                    self.register(cmd.client).await;
                    let _ = cmd.ack.send(());
                }
                Some(cmd) = unregister_rx.recv() => {
                    let removed = self.unregister(cmd.key).await;
                    let _ = cmd.ack.send(removed);
                }
                Some(cmd) = broadcast_rx.recv() => {
                    let queued = self.broadcast(cmd.user_id, cmd.message).await;
                    let _ = cmd.queued.send(queued);
                }
                else => break,
            }
        }

        let count: usize = self.clients.values().map(HashMap::len).sum();
        // Dropping the senders closes every outbound queue.
        self.clients.clear();
        self.snapshot.write().await.clear();
        tracing::info!(closed = count, "Connection registry loop exited");
    }

    async fn register(&mut self, client: Client) {
        let ClientKey { user_id, id } = client.key;
        let set = self.clients.entry(user_id).or_default();
        if set.contains_key(&id) {
            return;
        }
        set.insert(id, client.outbound);
        let connections = set.len();
        self.publish(user_id).await;
        tracing::debug!(%user_id, client_id = %id, connections, "Client registered");
    }

    async fn unregister(&mut self, key: ClientKey) -> bool {
        let removed = self
            .clients
            .get_mut(&key.user_id)
            .and_then(|set| set.remove(&key.id))
            .is_some();
        if removed {
            self.publish(key.user_id).await;
            tracing::debug!(user_id = %key.user_id, client_id = %key.id, "Client unregistered");
        }
        removed
    }

    async fn broadcast(&mut self, user_id: DbId, message: String) -> usize {
        let Some(set) = self.clients.get_mut(&user_id) else {
            return 0;
        };

        let mut queued = 0;
        set.retain(|client_id, outbound| match outbound.try_send(message.clone()) {
            Ok(()) => {
                queued += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%user_id, %client_id, "Outbound queue full, evicting client");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(%user_id, %client_id, "Outbound queue closed, evicting client");
                false
            }
        });

        self.publish(user_id).await;
        queued
    }

    /// Sync the snapshot for one user, dropping empty sets.
    async fn publish(&mut self, user_id: DbId) {
        let count = self.clients.get(&user_id).map_or(0, HashMap::len);
        if count == 0 {
            self.clients.remove(&user_id);
        }

        let mut snapshot = self.snapshot.write().await;
        if count == 0 {
            snapshot.remove(&user_id);
        } else {
            snapshot.insert(user_id, count);
        }
    }
}
