//! Presence rows as stored in the status table.
//!
//! One `PresenceRecord` exists per user (upserted on `user_id`). `online`
//! is infrastructural liveness written by heartbeats and lifecycle
//! transitions; `status` is what the user picked and is independent of it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commune_common::PlatformError;

use crate::platform::RecordStore;

/// Default name of the presence table.
pub const DEFAULT_TABLE: &str = "user_status";

/// Column the presence table is keyed on.
pub const PRIMARY_KEY: &str = "user_id";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Self-selected presence status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Idle,
    Dnd,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "idle" | "away" => Ok(Self::Idle),
            "dnd" | "do_not_disturb" => Ok(Self::Dnd),
            "offline" | "invisible" => Ok(Self::Offline),
            other => Err(format!("unknown presence status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One user's latest known liveness state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub online: bool,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// The record a heartbeat or an activation writes.
    pub fn online(user_id: &str, status: PresenceStatus, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            online: true,
            status,
            last_seen: now,
            updated_at: now,
        }
    }

    /// The record written once when a session ends.
    pub fn offline(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            online: false,
            status: PresenceStatus::Offline,
            last_seen: now,
            updated_at: now,
        }
    }

    /// Whether `last_seen` is older than `stale_after` at `now`.
    ///
    /// A `last_seen` in the future (clock skew) is never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match (now - self.last_seen).to_std() {
            Ok(elapsed) => elapsed > stale_after,
            Err(_) => false,
        }
    }

    /// Status a reader should display.
    ///
    /// An explicit offline write or a stale heartbeat both read as offline;
    /// otherwise the self-selected status wins.
    pub fn effective_status(&self, now: DateTime<Utc>, stale_after: Duration) -> PresenceStatus {
        if !self.online || self.is_stale(now, stale_after) {
            PresenceStatus::Offline
        } else {
            self.status
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, PlatformError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, PlatformError> {
        Ok(Self::deserialize(value)?)
    }
}

/// Upsert `record` into `table`.
pub async fn write_record(
    store: &dyn RecordStore,
    table: &str,
    record: &PresenceRecord,
) -> Result<(), PlatformError> {
    store.upsert(table, record.to_value()?).await
}
