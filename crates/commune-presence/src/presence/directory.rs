//! Local view of everyone's presence, fed by the change feed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use commune_common::PlatformError;

use crate::platform::{ChangeKind, RecordStore};
use crate::record::{PresenceRecord, PresenceStatus, PRIMARY_KEY};

use super::types::{PresenceCallback, PresenceChange, PresenceSettings};

/// Last-write-wins map of presence records keyed by user id.
///
/// Clones share the same map.
#[derive(Clone)]
pub struct PresenceDirectory {
    table: String,
    stale_after: Duration,
    records: Arc<RwLock<HashMap<String, PresenceRecord>>>,
}

impl PresenceDirectory {
    pub fn new(settings: &PresenceSettings) -> Self {
        Self {
            table: settings.table.clone(),
            stale_after: settings.stale_after,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed from every row currently in the presence table.
    pub async fn load(
        store: &dyn RecordStore,
        settings: &PresenceSettings,
    ) -> Result<Self, PlatformError> {
        let directory = Self::new(settings);
        let rows = store.select(&directory.table, &[]).await?;
        let total = rows.len();
        let mut loaded = 0;
        for row in &rows {
            match PresenceRecord::from_value(row) {
                Ok(record) => {
                    directory.upsert(record);
                    loaded += 1;
                }
                Err(e) => debug!(error = %e, "Skipping undecodable presence row"),
            }
        }
        info!(table = %directory.table, loaded, total, "Presence directory loaded");
        Ok(directory)
    }

    /// Look up one user on the platform and merge the result.
    pub async fn fetch(
        &self,
        store: &dyn RecordStore,
        user_id: &str,
    ) -> Result<Option<PresenceRecord>, PlatformError> {
        let rows = store.select(&self.table, &[(PRIMARY_KEY, user_id)]).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let record = PresenceRecord::from_value(row)?;
        self.upsert(record.clone());
        Ok(Some(record))
    }

    /// Merge one change. Deletes drop the user; older writes never replace
    /// newer ones.
    pub fn apply(&self, change: &PresenceChange) {
        match change.kind {
            ChangeKind::Delete => {
                write_lock(&self.records).remove(&change.record.user_id);
            }
            ChangeKind::Insert | ChangeKind::Update => self.upsert(change.record.clone()),
        }
    }

    /// `apply` as a session change callback.
    pub fn callback(&self) -> PresenceCallback {
        let directory = self.clone();
        Arc::new(move |change| directory.apply(&change))
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceRecord> {
        read_lock(&self.records).get(user_id).cloned()
    }

    /// What a reader should show for `user_id` at `now`.
    pub fn status_of(&self, user_id: &str, now: DateTime<Utc>) -> PresenceStatus {
        self.get(user_id)
            .map(|r| r.effective_status(now, self.stale_after))
            .unwrap_or(PresenceStatus::Offline)
    }

    /// Users whose effective status is not offline, sorted by user id.
    pub fn online_users(&self, now: DateTime<Utc>) -> Vec<PresenceRecord> {
        let mut online: Vec<PresenceRecord> = read_lock(&self.records)
            .values()
            .filter(|r| r.effective_status(now, self.stale_after) != PresenceStatus::Offline)
            .cloned()
            .collect();
        online.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        online
    }

    /// Every known record, sorted by user id.
    pub fn all(&self) -> Vec<PresenceRecord> {
        let mut all: Vec<PresenceRecord> = read_lock(&self.records).values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn len(&self) -> usize {
        read_lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, record: PresenceRecord) {
        let mut records = write_lock(&self.records);
        match records.get(&record.user_id) {
            Some(existing) if existing.updated_at > record.updated_at => {
                debug!(user_id = %record.user_id, "Ignoring out-of-order presence write");
            }
            _ => {
                records.insert(record.user_id.clone(), record);
            }
        }
    }
}

fn read_lock<T>(m: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    m.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(m: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    m.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::platform::MemoryPlatform;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn change(kind: ChangeKind, record: PresenceRecord) -> PresenceChange {
        PresenceChange { kind, record }
    }

    fn settings() -> PresenceSettings {
        PresenceSettings::default()
    }

    #[tokio::test]
    async fn load_seeds_from_store() {
        let platform = MemoryPlatform::new();
        for user in ["u1", "u2"] {
            let record = PresenceRecord::online(user, PresenceStatus::Online, at(0));
            platform
                .upsert("user_status", record.to_value().unwrap())
                .await
                .unwrap();
        }
        platform
            .upsert("user_status", serde_json::json!({ "user_id": "broken" }))
            .await
            .unwrap();

        let directory = PresenceDirectory::load(&platform, &settings()).await.unwrap();
        assert_eq!(directory.len(), 2);
        assert!(directory.get("u1").unwrap().online);
        assert!(directory.get("broken").is_none());
    }

    #[tokio::test]
    async fn fetch_merges_single_user() {
        let platform = MemoryPlatform::new();
        let record = PresenceRecord::online("u7", PresenceStatus::Idle, at(0));
        platform
            .upsert("user_status", record.to_value().unwrap())
            .await
            .unwrap();

        let directory = PresenceDirectory::new(&settings());
        assert_eq!(directory.fetch(&platform, "u7").await.unwrap(), Some(record));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.fetch(&platform, "nobody").await.unwrap(), None);
    }

    #[test]
    fn apply_is_last_write_wins() {
        let directory = PresenceDirectory::new(&settings());
        let newer = PresenceRecord::offline("u1", at(120));
        let older = PresenceRecord::online("u1", PresenceStatus::Online, at(60));

        directory.apply(&change(ChangeKind::Update, newer.clone()));
        directory.apply(&change(ChangeKind::Update, older));

        assert_eq!(directory.get("u1"), Some(newer));
    }

    #[test]
    fn delete_removes_user() {
        let directory = PresenceDirectory::new(&settings());
        let record = PresenceRecord::online("u1", PresenceStatus::Online, at(0));
        directory.apply(&change(ChangeKind::Insert, record.clone()));
        directory.apply(&change(ChangeKind::Delete, record));
        assert!(directory.is_empty());
    }

    #[test]
    fn stale_records_read_offline() {
        let directory = PresenceDirectory::new(&settings());
        directory.apply(&change(
            ChangeKind::Insert,
            PresenceRecord::online("u1", PresenceStatus::Dnd, at(0)),
        ));
        directory.apply(&change(
            ChangeKind::Insert,
            PresenceRecord::online("u2", PresenceStatus::Online, at(150)),
        ));

        // Default staleness is three 60 s intervals.
        let now = at(200);
        assert_eq!(directory.status_of("u1", now), PresenceStatus::Offline);
        assert_eq!(directory.status_of("u2", now), PresenceStatus::Online);
        assert_eq!(directory.status_of("unknown", now), PresenceStatus::Offline);

        let online: Vec<String> = directory
            .online_users(now)
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(online, vec!["u2".to_string()]);

        assert_eq!(directory.status_of("u1", at(100)), PresenceStatus::Dnd);
    }

    #[test]
    fn callback_feeds_directory() {
        let directory = PresenceDirectory::new(&settings());
        let callback = directory.callback();
        callback(change(
            ChangeKind::Insert,
            PresenceRecord::online("u3", PresenceStatus::Idle, at(0)),
        ));
        assert_eq!(directory.all().len(), 1);
    }
}
