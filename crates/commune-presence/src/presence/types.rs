//! Settings, dependency bundle and change notifications for presence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::platform::{AuthSession, ChangeFeed, ChangeKind, MemoryPlatform, RecordStore};
use crate::record::{PresenceRecord, DEFAULT_TABLE};

use super::host::HostEnvironment;

/// Tunables for a presence session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSettings {
    /// Table presence records are written to and watched on.
    pub table: String,
    /// Time between heartbeat writes.
    pub heartbeat_interval: Duration,
    /// Age after which a record reads as offline regardless of `online`.
    pub stale_after: Duration,
    /// Upper bound on the offline write during deactivation.
    pub offline_write_timeout: Duration,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        let heartbeat_interval = Duration::from_secs(60);
        Self {
            table: DEFAULT_TABLE.to_string(),
            heartbeat_interval,
            stale_after: heartbeat_interval * 3,
            offline_write_timeout: Duration::from_millis(1500),
        }
    }
}

impl PresenceSettings {
    /// Settings with a custom heartbeat interval and the default staleness
    /// multiple.
    pub fn with_interval(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            stale_after: heartbeat_interval * 3,
            ..Default::default()
        }
    }
}

/// A presence record delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub kind: ChangeKind,
    /// New state. For deletes, the last known state, or an offline record
    /// when only the key of the removed row was delivered.
    pub record: PresenceRecord,
}

/// Observer callback for presence changes.
pub type PresenceCallback = Arc<dyn Fn(PresenceChange) + Send + Sync>;

/// Source of record timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall-clock time.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Everything a session talks to.
#[derive(Clone)]
pub struct PresenceDeps {
    pub store: Arc<dyn RecordStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub auth: Arc<dyn AuthSession>,
    pub host: Arc<dyn HostEnvironment>,
    pub clock: Clock,
}

impl PresenceDeps {
    /// Same seams, timestamps from `clock`.
    pub fn with_clock(self, clock: Clock) -> Self {
        Self { clock, ..self }
    }

    /// Wire every platform seam to one in-memory platform.
    pub fn from_platform(platform: &MemoryPlatform, host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            store: Arc::new(platform.clone()),
            feed: Arc::new(platform.clone()),
            auth: Arc::new(platform.clone()),
            host,
            clock: system_clock(),
        }
    }
}
