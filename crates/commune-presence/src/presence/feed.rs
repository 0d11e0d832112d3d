//! Change-feed subscription over the presence table.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use commune_common::PlatformError;

use crate::platform::{
    ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, EventMask, SubscriptionId,
};
use crate::record::{PresenceRecord, PRIMARY_KEY};

use super::types::{PresenceCallback, PresenceChange};

/// Callback slot shared with the platform; emptied on release.
type Gate = Arc<Mutex<Option<PresenceCallback>>>;

/// A live subscription to every insert, update and delete on the presence
/// table.
///
/// Once `close` or `unsubscribe` returns the callback is never invoked
/// again, even if the platform still delivers events it had queued.
pub struct PresenceSubscription {
    feed: Arc<dyn ChangeFeed>,
    id: Option<SubscriptionId>,
    gate: Gate,
}

impl PresenceSubscription {
    pub async fn subscribe(
        feed: Arc<dyn ChangeFeed>,
        table: &str,
        on_change: PresenceCallback,
    ) -> Result<Self, PlatformError> {
        let gate: Gate = Arc::new(Mutex::new(Some(on_change)));
        let id = feed
            .subscribe(table, EventMask::ALL, forwarder(Arc::clone(&gate)))
            .await?;
        debug!(subscription = %id, table = %table, "Presence subscription opened");
        Ok(Self {
            feed,
            id: Some(id),
            gate,
        })
    }

    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    /// Stop delivering to the callback, without releasing the platform side.
    pub fn close(&self) {
        lock(&self.gate).take();
    }

    /// Close and release the platform subscription. Safe to call twice.
    pub async fn unsubscribe(&mut self) {
        self.close();
        if let Some(id) = self.id.take() {
            self.feed.unsubscribe(id).await;
            debug!(subscription = %id, "Presence subscription released");
        }
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        self.close();
        let Some(id) = self.id.take() else {
            return;
        };
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let feed = Arc::clone(&self.feed);
            rt.spawn(async move { feed.unsubscribe(id).await });
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn forwarder(gate: Gate) -> ChangeCallback {
    Arc::new(move |event: ChangeEvent| {
        let Some(callback) = lock(&gate).clone() else {
            return;
        };
        match decode(&event) {
            Ok(record) => callback(PresenceChange {
                kind: event.kind,
                record,
            }),
            Err(e) => {
                debug!(
                    table = %event.table,
                    kind = ?event.kind,
                    error = %e,
                    "Skipping undecodable presence change"
                );
            }
        }
    })
}

/// The record an event carries.
///
/// Deletes usually only carry the primary key of the old row; those decode
/// to an offline record stamped with the time of delivery.
fn decode(event: &ChangeEvent) -> Result<PresenceRecord, PlatformError> {
    let row = event.row();
    match PresenceRecord::from_value(row) {
        Ok(record) => Ok(record),
        Err(e) if event.kind == ChangeKind::Delete => row
            .get(PRIMARY_KEY)
            .and_then(|key| key.as_str())
            .map(|user_id| PresenceRecord::offline(user_id, Utc::now()))
            .ok_or(e),
        Err(e) => Err(e),
    }
}
