//! In-process data platform.
//!
//! Rows live in per-table maps keyed by the primary key column; every
//! upsert or delete is fanned out synchronously to matching subscribers,
//! so delivery order is write order. Failure switches and call counters
//! make it usable as a test double.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use commune_common::PlatformError;

use super::{
    AuthSession, ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, EventMask, RecordStore,
    SubscriptionId,
};
use crate::identity::Identity;
use crate::record::PRIMARY_KEY;

struct Subscriber {
    table: String,
    mask: EventMask,
    callback: ChangeCallback,
}

#[derive(Default)]
struct Counters {
    upserts: AtomicU64,
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
}

struct Inner {
    primary_key: String,
    tables: Mutex<HashMap<String, BTreeMap<String, serde_json::Value>>>,
    writes: Mutex<Vec<(String, serde_json::Value)>>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_sub: AtomicU64,
    user: Mutex<Option<Identity>>,
    fail_writes: AtomicBool,
    fail_next_writes: AtomicU64,
    fail_subscribe: AtomicBool,
    counters: Counters,
}

/// Thread-safe in-memory platform. Clones share state.
#[derive(Clone)]
pub struct MemoryPlatform {
    inner: Arc<Inner>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::with_primary_key(PRIMARY_KEY)
    }

    pub fn with_primary_key(primary_key: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                primary_key: primary_key.to_string(),
                tables: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_sub: AtomicU64::new(1),
                user: Mutex::new(None),
                fail_writes: AtomicBool::new(false),
                fail_next_writes: AtomicU64::new(0),
                fail_subscribe: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Set who `current_user` reports.
    pub fn set_current_user(&self, user: Option<Identity>) {
        *lock(&self.inner.user) = user;
    }

    /// Make every upsert fail with a network error (writes are still logged
    /// as attempts).
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only the next `count` upserts fail.
    pub fn fail_next_writes(&self, count: u64) {
        self.inner.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Make every subscribe fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Every upsert attempt on `table`, in call order.
    pub fn writes(&self, table: &str) -> Vec<serde_json::Value> {
        lock(&self.inner.writes)
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Upsert attempts across all tables, failed ones included.
    pub fn upsert_calls(&self) -> u64 {
        self.inner.counters.upserts.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.inner.counters.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> u64 {
        self.inner.counters.unsubscribes.load(Ordering::SeqCst)
    }

    /// Subscriptions currently receiving events.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Current stored row for `key`, if any.
    pub fn row(&self, table: &str, key: &str) -> Option<serde_json::Value> {
        lock(&self.inner.tables)
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned()
    }

    /// Remove a row and notify subscribers.
    pub fn delete(&self, table: &str, key: &str) -> Option<serde_json::Value> {
        let removed = lock(&self.inner.tables)
            .get_mut(table)
            .and_then(|rows| rows.remove(key))?;
        self.publish(ChangeEvent {
            table: table.to_string(),
            kind: ChangeKind::Delete,
            record: serde_json::Value::Null,
            old_record: removed.clone(),
        });
        Some(removed)
    }

    fn publish(&self, event: ChangeEvent) {
        // Collect first so callbacks run without the subscriber lock held.
        let targets: Vec<ChangeCallback> = lock(&self.inner.subscribers)
            .values()
            .filter(|s| s.table == event.table && s.mask.contains(event.kind))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        debug!(
            table = %event.table,
            kind = ?event.kind,
            subscribers = targets.len(),
            "memory platform change"
        );
        for callback in targets {
            callback(event.clone());
        }
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn column_matches(row: &serde_json::Value, column: &str, value: &str) -> bool {
    match row.get(column) {
        Some(serde_json::Value::String(s)) => s == value,
        Some(other) => other.to_string() == value,
        None => false,
    }
}

#[async_trait]
impl RecordStore for MemoryPlatform {
    async fn upsert(&self, table: &str, record: serde_json::Value) -> Result<(), PlatformError> {
        self.inner.counters.upserts.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.writes).push((table.to_string(), record.clone()));

        let one_shot = self
            .inner
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if one_shot || self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(PlatformError::Network("simulated write failure".into()));
        }

        let key = match record.get(&self.inner.primary_key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(PlatformError::Http {
                    status: 400,
                    body: format!("missing primary key column {}", self.inner.primary_key),
                })
            }
        };

        let old = lock(&self.inner.tables)
            .entry(table.to_string())
            .or_default()
            .insert(key, record.clone());

        let (kind, old_record) = match old {
            Some(prev) => (ChangeKind::Update, prev),
            None => (ChangeKind::Insert, serde_json::Value::Null),
        };
        self.publish(ChangeEvent {
            table: table.to_string(),
            kind,
            record,
            old_record,
        });
        Ok(())
    }

    async fn select(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<serde_json::Value>, PlatformError> {
        let tables = lock(&self.inner.tables);
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|row| filters.iter().all(|(c, v)| column_matches(row, c, v)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChangeFeed for MemoryPlatform {
    async fn subscribe(
        &self,
        table: &str,
        mask: EventMask,
        callback: ChangeCallback,
    ) -> Result<SubscriptionId, PlatformError> {
        self.inner.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(PlatformError::Subscription(
                "simulated subscribe failure".into(),
            ));
        }
        let id = SubscriptionId(self.inner.next_sub.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.subscribers).insert(
            id,
            Subscriber {
                table: table.to_string(),
                mask,
                callback,
            },
        );
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscribers).remove(&id);
    }
}

#[async_trait]
impl AuthSession for MemoryPlatform {
    async fn current_user(&self) -> Result<Option<Identity>, PlatformError> {
        Ok(lock(&self.inner.user).clone())
    }
}
