//! Configuration, protocol types, and event/command enums for the realtime client.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::platform::{ChangeCallback, EventMask, SubscriptionId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the realtime server.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// HTTP(S) base URL of the project, e.g. `https://abcd.supabase.co`.
    pub base_url: String,
    /// Publishable anon key.
    pub api_key: String,
    /// Optional access token (JWT) sent with every channel join.
    pub access_token: Option<String>,
    /// Database schema the watched tables live in.
    pub schema: String,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("schema", &self.schema)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            schema: "public".to_string(),
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl RealtimeConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Build the WebSocket URL for the realtime endpoint.
    pub(crate) fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!(
            "{base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.api_key
        )
    }
}

// ---------------------------------------------------------------------------
// Phoenix Protocol Types
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Channel Configuration
// ---------------------------------------------------------------------------

/// One `postgres_changes` filter inside a channel join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresChangesFilter {
    pub event: String,
    pub schema: String,
    pub table: String,
}

/// Configuration for a realtime channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub postgres_changes: Vec<PostgresChangesFilter>,
    pub access_token: Option<String>,
}

impl ChannelConfig {
    /// Serialize to the JSON payload expected by `phx_join`.
    pub(crate) fn to_join_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "config": {
                "broadcast": { "self": false, "ack": false },
                "presence": { "key": "" },
                "postgres_changes": self.postgres_changes,
            }
        });
        if let Some(token) = &self.access_token {
            payload["access_token"] = serde_json::json!(token);
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// A live table subscription bound to one channel topic.
#[derive(Clone)]
pub(crate) struct TopicEntry {
    pub(crate) id: SubscriptionId,
    pub(crate) table: String,
    pub(crate) mask: EventMask,
    pub(crate) callback: ChangeCallback,
    pub(crate) config: ChannelConfig,
}

/// Topic (without the `realtime:` prefix) to subscription.
pub(crate) type TopicRegistry = Arc<RwLock<HashMap<String, TopicEntry>>>;

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Connection status events emitted by the realtime client.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// WebSocket connection established.
    Connected,
    /// WebSocket connection lost.
    Disconnected,
    /// The server acknowledged a channel join.
    ChannelJoined { topic: String },
    /// Channel closed or errored.
    ChannelError { topic: String, message: String },
    /// Error.
    Error(String),
}

/// Commands sent to the connection task from the client handle.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel { topic: String },
    LeaveChannel { topic: String },
    Disconnect,
}
