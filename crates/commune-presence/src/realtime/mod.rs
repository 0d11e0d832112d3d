//! Thin realtime client over the Phoenix Channels v1 protocol.
//!
//! A reusable WebSocket client built on `tokio-tungstenite` that joins one
//! channel per table subscription, forwards `postgres_changes` events to
//! the subscriber's callback in arrival order, keeps the socket alive with
//! Phoenix heartbeats and reconnects with exponential backoff, rejoining
//! every live subscription.

mod client;
mod connection;
pub(crate) mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{
    ChannelConfig, PhoenixMessage, PostgresChangesFilter, RealtimeConfig, RealtimeEvent,
};
