//! Real-time delivery over WebSocket.
//!
//! [`ConnectionRegistry`] maps users to their live connections; each
//! connection is driven by [`serve_socket`] (or [`run_client`] for any
//! sink/stream pair) after the host's router has upgraded the request.

mod client;
pub mod registry;

pub use client::{run_client, serve_socket};
pub use registry::{Client, ClientId, ClientKey, ConnectionRegistry, HubError};
