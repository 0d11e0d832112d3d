//! Presence and realtime configuration types.

use serde::{Deserialize, Serialize};

/// Presence tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub enabled: bool,
    /// Table holding one presence row per user.
    pub table: String,
    /// Seconds between heartbeat upserts (valid range: 10-600).
    pub heartbeat_interval: u32,
    /// A record whose `last_seen` is older than this many heartbeat
    /// intervals reads as offline (valid range: 2-10).
    pub stale_after_intervals: u32,
    /// Upper bound on the offline write during shutdown, in milliseconds
    /// (valid range: 100-10000).
    pub offline_write_timeout_ms: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            table: "user_status".to_string(),
            heartbeat_interval: 60,
            stale_after_intervals: 3,
            offline_write_timeout_ms: 1500,
        }
    }
}

/// Realtime transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Transport-level keepalive in seconds (valid range: 5-120).
    pub heartbeat_interval: u32,
    /// Base reconnect delay in seconds.
    pub reconnect_delay: u32,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 25,
            reconnect_delay: 1,
            max_reconnect_delay: 30,
        }
    }
}
