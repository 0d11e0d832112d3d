//! Presence session lifecycle.
//!
//! A session owns, per activation, one heartbeat timer, one visibility
//! observer and one change-feed subscription. Activation acquires them,
//! deactivation releases each exactly once and writes the offline record.

use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use commune_common::{PlatformError, SessionId};

use crate::identity::Identity;
use crate::record::{write_record, PresenceRecord, PresenceStatus};

use super::feed::PresenceSubscription;
use super::heartbeat::{HeartbeatEmitter, HeartbeatStats};
use super::host::HostEvent;
use super::types::{PresenceCallback, PresenceDeps, PresenceSettings};
use super::visibility::VisibilityObserver;

/// Resources held by one activation.
struct ActiveSession {
    session_id: SessionId,
    identity: Identity,
    observer: VisibilityObserver,
    subscription: Option<PresenceSubscription>,
}

struct SessionInner {
    deps: PresenceDeps,
    settings: PresenceSettings,
    heartbeat: HeartbeatEmitter,
    status: watch::Sender<PresenceStatus>,
    listener: RwLock<Option<PresenceCallback>>,
    /// Never held across an `.await`.
    state: Mutex<Option<ActiveSession>>,
    /// Serializes activation and deactivation.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Handle to a user's presence. Clones share the same session.
#[derive(Clone)]
pub struct PresenceSession {
    inner: Arc<SessionInner>,
}

impl PresenceSession {
    pub fn new(deps: PresenceDeps, settings: PresenceSettings) -> Self {
        let (status, status_rx) = watch::channel(PresenceStatus::default());
        let heartbeat = HeartbeatEmitter::new(
            Arc::clone(&deps.store),
            settings.table.clone(),
            settings.heartbeat_interval,
            status_rx,
            Arc::clone(&deps.clock),
        );
        Self {
            inner: Arc::new(SessionInner {
                deps,
                settings,
                heartbeat,
                status,
                listener: RwLock::new(None),
                state: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &PresenceSettings {
        &self.inner.settings
    }

    /// Mark `identity` online and start heartbeat, visibility observation
    /// and the change feed.
    ///
    /// Re-activating the same user swaps the resources without an offline
    /// write in between; activating another user fully deactivates the
    /// previous one first.
    pub async fn activate(&self, identity: Identity) {
        self.start(identity).await;
    }

    /// `activate`, returning the id of the new activation. The id is taken
    /// while the lifecycle lock is still held.
    async fn start(&self, identity: Identity) -> SessionId {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        let prior = lock(&inner.state).take();
        if let Some(prior) = prior {
            let same_user = prior.identity.same_user(&identity);
            let prior_user = prior.identity.user_id.clone();
            inner.release(prior).await;
            if !same_user {
                inner.write_offline(&prior_user).await;
                info!(user_id = %prior_user, "Presence handed over to another user");
            }
        }

        let session_id = SessionId::new();
        let user_id = identity.user_id.clone();

        let record = PresenceRecord::online(&user_id, inner.current_status(), inner.now());
        inner.write(&record, "online").await;

        let subscription = match PresenceSubscription::subscribe(
            Arc::clone(&inner.deps.feed),
            &inner.settings.table,
            self.forwarder(),
        )
        .await
        {
            Ok(sub) => Some(sub),
            Err(e) => {
                // Readers fall back to last-known state.
                warn!(user_id = %user_id, error = %e, "Presence change feed unavailable");
                None
            }
        };

        let mut state = lock(&inner.state);
        let weak = Arc::downgrade(inner);
        let observed = session_id.clone();
        let observer = VisibilityObserver::start(inner.deps.host.as_ref(), move |event| {
            if let Some(inner) = weak.upgrade() {
                SessionInner::on_host_event(&inner, &observed, event);
            }
        });
        inner.heartbeat.start(&user_id);
        *state = Some(ActiveSession {
            session_id: session_id.clone(),
            identity,
            observer,
            subscription,
        });
        drop(state);

        info!(user_id = %user_id, session = %session_id, "Presence activated");
        session_id
    }

    /// Activate whoever the auth session reports, or deactivate when nobody
    /// is signed in. Returns whether a user is now active.
    pub async fn activate_current_user(&self) -> Result<bool, PlatformError> {
        match self.inner.deps.auth.current_user().await? {
            Some(identity) => {
                self.activate(identity).await;
                Ok(true)
            }
            None => {
                debug!("No signed-in user");
                self.deactivate().await;
                Ok(false)
            }
        }
    }

    /// Follow an identity change: `None` signs out, `Some` signs in.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        match identity {
            Some(identity) => self.activate(identity).await,
            None => self.deactivate().await,
        }
    }

    /// Release everything and write the offline record. A no-op when not
    /// active, so concurrent triggers release each resource once.
    pub async fn deactivate(&self) {
        self.inner.end(None).await;
    }

    /// Activate and return a guard that deactivates on release.
    pub async fn guard(&self, identity: Identity) -> PresenceGuard {
        let session_id = self.start(identity).await;
        PresenceGuard {
            session: Some(self.clone()),
            session_id,
        }
    }

    /// Change the self-selected status. Written immediately when active and
    /// carried by every later heartbeat.
    pub async fn set_status(&self, status: PresenceStatus) {
        self.inner.status.send_replace(status);
        let Some(user_id) = self.current_user().map(|u| u.user_id) else {
            return;
        };
        let record = PresenceRecord::online(&user_id, status, self.inner.now());
        self.inner.write(&record, "status").await;
        info!(user_id = %user_id, %status, "Presence status changed");
    }

    pub fn status(&self) -> PresenceStatus {
        self.inner.current_status()
    }

    /// Install the callback every presence change is forwarded to.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(super::types::PresenceChange) + Send + Sync + 'static,
    {
        *write_lock(&self.inner.listener) = Some(Arc::new(callback));
    }

    pub fn is_active(&self) -> bool {
        lock(&self.inner.state).is_some()
    }

    pub fn current_user(&self) -> Option<Identity> {
        lock(&self.inner.state).as_ref().map(|a| a.identity.clone())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.inner.state).as_ref().map(|a| a.session_id.clone())
    }

    pub fn heartbeat_running(&self) -> bool {
        self.inner.heartbeat.is_running()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.inner.heartbeat.stats()
    }

    /// Whether the current activation holds a change-feed subscription.
    pub fn is_subscribed(&self) -> bool {
        lock(&self.inner.state)
            .as_ref()
            .is_some_and(|a| a.subscription.is_some())
    }

    /// Callback handed to the change feed. Reads the listener at delivery
    /// time so `on_change` may be called at any point.
    fn forwarder(&self) -> PresenceCallback {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        Arc::new(move |change| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let listener = read_lock(&inner.listener).clone();
            if let Some(listener) = listener {
                listener(change);
            }
        })
    }
}

impl SessionInner {
    fn now(&self) -> DateTime<Utc> {
        (self.deps.clock)()
    }

    fn current_status(&self) -> PresenceStatus {
        *self.status.borrow()
    }

    fn is_current(&self, session_id: &SessionId) -> bool {
        lock(&self.state)
            .as_ref()
            .is_some_and(|a| &a.session_id == session_id)
    }

    /// Deactivate; when `only` is set, only if that activation is still
    /// the current one.
    async fn end(&self, only: Option<&SessionId>) {
        let _lifecycle = self.lifecycle.lock().await;

        let active = {
            let mut state = lock(&self.state);
            match (only, state.as_ref()) {
                (Some(wanted), Some(active)) if &active.session_id != wanted => None,
                _ => state.take(),
            }
        };
        let Some(active) = active else {
            return;
        };

        let user_id = active.identity.user_id.clone();
        let session_id = active.session_id.clone();
        self.release(active).await;
        self.write_offline(&user_id).await;
        info!(user_id = %user_id, session = %session_id, "Presence deactivated");
    }

    async fn release(&self, mut active: ActiveSession) {
        self.heartbeat.stop();
        active.observer.release();
        if let Some(mut subscription) = active.subscription.take() {
            subscription.unsubscribe().await;
        }
        debug!(session = %active.session_id, "Presence resources released");
    }

    async fn write(&self, record: &PresenceRecord, reason: &str) {
        match write_record(self.deps.store.as_ref(), &self.settings.table, record).await {
            Ok(()) => debug!(user_id = %record.user_id, reason, "Presence written"),
            Err(e) => warn!(user_id = %record.user_id, reason, error = %e, "Presence write failed"),
        }
    }

    /// Best-effort offline write, bounded by `offline_write_timeout`.
    async fn write_offline(&self, user_id: &str) {
        let record = PresenceRecord::offline(user_id, self.now());
        let store = self.deps.store.as_ref();
        let table = self.settings.table.as_str();
        // One retry for transient failures, inside the same time budget.
        let write = async {
            match write_record(store, table, &record).await {
                Err(e) if e.is_transient() => {
                    debug!(user_id = %user_id, error = %e, "Retrying offline write");
                    write_record(store, table, &record).await
                }
                result => result,
            }
        };
        match tokio::time::timeout(self.settings.offline_write_timeout, write).await {
            Ok(Ok(())) => debug!(user_id = %user_id, "Offline written"),
            Ok(Err(e)) => warn!(user_id = %user_id, error = %e, "Offline write failed"),
            Err(_) => warn!(
                user_id = %user_id,
                timeout = ?self.settings.offline_write_timeout,
                "Offline write timed out"
            ),
        }
    }

    fn on_host_event(inner: &Arc<SessionInner>, session_id: &SessionId, event: HostEvent) {
        match event {
            HostEvent::Foreground => {
                let user_id = {
                    let state = lock(&inner.state);
                    let Some(active) = state.as_ref().filter(|a| &a.session_id == session_id)
                    else {
                        return;
                    };
                    inner.heartbeat.start(&active.identity.user_id);
                    active.identity.user_id.clone()
                };
                debug!(user_id = %user_id, "Foreground: marking online");

                let inner = Arc::clone(inner);
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    if !inner.is_current(&session_id) {
                        return;
                    }
                    let record =
                        PresenceRecord::online(&user_id, inner.current_status(), inner.now());
                    inner.write(&record, "foreground").await;
                });
            }
            HostEvent::Background => {
                let state = lock(&inner.state);
                if state.as_ref().is_some_and(|a| &a.session_id == session_id) {
                    inner.heartbeat.stop();
                    debug!(session = %session_id, "Background: heartbeat paused");
                }
            }
            HostEvent::BeforeTerminate => {
                debug!(session = %session_id, "Host terminating");
                let inner = Arc::clone(inner);
                let session_id = session_id.clone();
                tokio::spawn(async move { inner.end(Some(&session_id)).await });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Scoped activation. `release` deactivates; dropping without releasing
/// schedules the deactivation on the runtime.
#[must_use = "dropping the guard deactivates presence"]
pub struct PresenceGuard {
    session: Option<PresenceSession>,
    session_id: SessionId,
}

impl PresenceGuard {
    pub fn session(&self) -> Option<&PresenceSession> {
        self.session.as_ref()
    }

    /// The activation this guard ends.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Deactivate the activation this guard was created for.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            session.inner.end(Some(&self.session_id)).await;
        }
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let session_id = self.session_id.clone();
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move { session.inner.end(Some(&session_id)).await });
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(m: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    m.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(m: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    m.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
