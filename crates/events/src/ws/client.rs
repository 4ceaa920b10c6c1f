//! Per-connection actor.
//!
//! A connection runs two cooperating loops that share a cancellation token:
//!
//! - the reader enforces the read deadline, renewing it on every pong, and
//!   stops on close, error, or expiry;
//! - the writer drains the client's outbound queue and sends a ping every
//!   `ping_period`; a failed or timed-out write stops it, and a closed
//!   queue (eviction or shutdown) makes it send a Close frame first.
//!
//! Whichever loop stops first cancels the other. The client is unregistered
//! once both have finished.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use finpulse_core::types::DbId;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::ws::registry::{Client, ClientKey, ConnectionRegistry};

/// Drive an upgraded socket for `user_id` until it disconnects.
pub async fn serve_socket(
    socket: WebSocket,
    user_id: DbId,
    registry: Arc<ConnectionRegistry>,
    config: ClientConfig,
) {
    let (sink, stream) = socket.split();
    run_client(user_id, sink, stream, registry, config).await;
}

/// Register a client for `user_id` and pump frames between the registry and
/// the given sink/stream pair until either side gives up.
pub async fn run_client<S, R, E>(
    user_id: DbId,
    sink: S,
    stream: R,
    registry: Arc<ConnectionRegistry>,
    config: ClientConfig,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (client, outbound) = Client::new(user_id, config.outbound_buffer);
    let key = client.key();
    if let Err(e) = registry.register(client).await {
        tracing::warn!(%user_id, error = %e, "Rejecting connection");
        return;
    }
    tracing::info!(%user_id, client_id = %key.id, "WebSocket client connected");

    let cancel = CancellationToken::new();
    tokio::join!(
        read_pump(key, stream, config.pong_wait, cancel.clone()),
        write_pump(key, sink, outbound, config, cancel.clone()),
    );

    if let Err(e) = registry.unregister(key).await {
        tracing::debug!(%user_id, error = %e, "Unregister after disconnect failed");
    }
    tracing::info!(%user_id, client_id = %key.id, "WebSocket client disconnected");
}

async fn read_pump<R, E>(
    key: ClientKey,
    mut stream: R,
    pong_wait: Duration,
    cancel: CancellationToken,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout_at(deadline, stream.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::debug!(client_id = %key.id, "Read deadline expired");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(Message::Pong(_)))) => {
                tracing::trace!(client_id = %key.id, "Pong received");
                deadline = Instant::now() + pong_wait;
            }
            Ok(Some(Ok(_))) => {
                // Inbound application frames carry nothing the server acts on.
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(client_id = %key.id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    cancel.cancel();
}

async fn write_pump<S>(
    key: ClientKey,
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    config: ClientConfig,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping =
        tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(text) => {
                    let frame = Message::Text(text.into());
                    if !write_frame(key, &mut sink, frame, config.write_wait).await {
                        break;
                    }
                }
                None => {
                    tracing::debug!(client_id = %key.id, "Outbound queue closed");
                    write_frame(key, &mut sink, Message::Close(None), config.write_wait).await;
                    break;
                }
            },
            _ = ping.tick() => {
                let frame = Message::Ping(Bytes::new());
                if !write_frame(key, &mut sink, frame, config.write_wait).await {
                    break;
                }
            }
        }
    }

    cancel.cancel();
    if let Ok(Err(e)) = timeout(config.write_wait, sink.close()).await {
        tracing::trace!(client_id = %key.id, error = %e, "Closing WebSocket sink failed");
    }
}

/// Write one frame within `write_wait`. Returns `false` if the connection
/// should be abandoned.
async fn write_frame<S>(key: ClientKey, sink: &mut S, frame: Message, write_wait: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(client_id = %key.id, error = %e, "WebSocket write failed");
            false
        }
        Err(_) => {
            tracing::debug!(client_id = %key.id, "WebSocket write timed out");
            false
        }
    }
}
