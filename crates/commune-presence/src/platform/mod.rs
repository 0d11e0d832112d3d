//! The data platform seam: record storage, auth-session lookup and
//! row-level change feeds.
//!
//! Presence logic only talks to these traits. `rest::SupabaseRest` and
//! `crate::realtime::RealtimeClient` implement them against a hosted
//! backend; `memory::MemoryPlatform` implements all three in-process.

pub mod memory;
pub mod rest;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use commune_common::PlatformError;

use crate::identity::Identity;

pub use memory::MemoryPlatform;
pub use rest::{RestConfig, SupabaseRest};

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// Kind of row mutation reported by a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which mutation kinds a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventMask {
    pub const ALL: Self = Self {
        insert: true,
        update: true,
        delete: true,
    };

    pub fn only(kind: ChangeKind) -> Self {
        Self {
            insert: kind == ChangeKind::Insert,
            update: kind == ChangeKind::Update,
            delete: kind == ChangeKind::Delete,
        }
    }

    pub fn contains(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.insert,
            ChangeKind::Update => self.update,
            ChangeKind::Delete => self.delete,
        }
    }

    /// Event filter understood by the realtime server: a single kind, or
    /// `*` (callers filter the rest locally with `contains`).
    pub fn wire_event(&self) -> &'static str {
        match (self.insert, self.update, self.delete) {
            (true, false, false) => "INSERT",
            (false, true, false) => "UPDATE",
            (false, false, true) => "DELETE",
            _ => "*",
        }
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// One row-level mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// New row state; `Null` for deletes.
    pub record: serde_json::Value,
    /// Previous row state when the platform provides it.
    pub old_record: serde_json::Value,
}

impl ChangeEvent {
    /// The row this event is about: the new state, or the old one for deletes.
    pub fn row(&self) -> &serde_json::Value {
        match self.kind {
            ChangeKind::Delete => &self.old_record,
            ChangeKind::Insert | ChangeKind::Update => &self.record,
        }
    }
}

/// Callback invoked for every delivered change.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Handle returned by `ChangeFeed::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Remote table access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `record`, or overwrite the row with the same primary key.
    async fn upsert(&self, table: &str, record: serde_json::Value) -> Result<(), PlatformError>;

    /// Rows of `table` matching every `(column, value)` equality filter.
    async fn select(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<serde_json::Value>, PlatformError>;
}

/// Push notifications of row mutations.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start delivering mutations of `table` matching `mask` to `callback`,
    /// in the order the platform emits them.
    async fn subscribe(
        &self,
        table: &str,
        mask: EventMask,
        callback: ChangeCallback,
    ) -> Result<SubscriptionId, PlatformError>;

    /// Stop a subscription. Unknown or already released ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);
}

/// Who is signed in.
#[async_trait]
pub trait AuthSession: Send + Sync {
    async fn current_user(&self) -> Result<Option<Identity>, PlatformError>;
}

/// Auth lookup that always answers with a fixed identity (or nobody).
#[derive(Debug, Clone, Default)]
pub struct StaticAuth(pub Option<Identity>);

#[async_trait]
impl AuthSession for StaticAuth {
    async fn current_user(&self) -> Result<Option<Identity>, PlatformError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_wire_event() {
        assert_eq!(EventMask::ALL.wire_event(), "*");
        assert_eq!(EventMask::only(ChangeKind::Update).wire_event(), "UPDATE");
        let insert_or_delete = EventMask {
            insert: true,
            update: false,
            delete: true,
        };
        assert_eq!(insert_or_delete.wire_event(), "*");
        assert!(!insert_or_delete.contains(ChangeKind::Update));
    }

    #[test]
    fn delete_row_is_old_record() {
        let ev = ChangeEvent {
            table: "user_status".into(),
            kind: ChangeKind::Delete,
            record: serde_json::Value::Null,
            old_record: serde_json::json!({ "user_id": "u1" }),
        };
        assert_eq!(ev.row()["user_id"], "u1");
    }

    #[test]
    fn change_kind_wire_names() {
        let k: ChangeKind = serde_json::from_value(serde_json::json!("UPDATE")).unwrap();
        assert_eq!(k, ChangeKind::Update);
    }

    #[tokio::test]
    async fn static_auth_returns_identity() {
        let auth = StaticAuth(Some(Identity::new("u1", "Ada")));
        let user = auth.current_user().await.unwrap().unwrap();
        assert_eq!(user.user_id, "u1");
        assert!(StaticAuth(None).current_user().await.unwrap().is_none());
    }
}
