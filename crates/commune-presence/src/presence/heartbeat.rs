//! Periodic liveness writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::platform::RecordStore;
use crate::record::{write_record, PresenceRecord, PresenceStatus};

use super::types::Clock;

struct Running {
    user_id: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// How often the timer has been started and stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub started: u64,
    pub stopped: u64,
}

impl HeartbeatStats {
    /// Timers currently alive (0 or 1).
    pub fn live(&self) -> u64 {
        self.started.saturating_sub(self.stopped)
    }
}

/// Single repeating timer that upserts an online record for one user.
///
/// The first write happens one full interval after `start`; activation
/// already wrote the immediate online record.
pub struct HeartbeatEmitter {
    store: Arc<dyn RecordStore>,
    table: String,
    interval: Duration,
    status: watch::Receiver<PresenceStatus>,
    clock: Clock,
    running: Mutex<Option<Running>>,
    started: AtomicU64,
    stopped: AtomicU64,
}

impl HeartbeatEmitter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        table: impl Into<String>,
        interval: Duration,
        status: watch::Receiver<PresenceStatus>,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            interval,
            status,
            clock,
            running: Mutex::new(None),
            started: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
        }
    }

    /// Start beating for `user_id`. A running timer is replaced, never
    /// duplicated.
    pub fn start(&self, user_id: &str) {
        let mut running = lock(&self.running);
        if let Some(prev) = running.take() {
            self.cancel(prev);
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(beat(
            Arc::clone(&self.store),
            self.table.clone(),
            user_id.to_string(),
            self.interval,
            self.status.clone(),
            Arc::clone(&self.clock),
            token.clone(),
        ));
        self.started.fetch_add(1, Ordering::SeqCst);
        debug!(user_id = %user_id, interval = ?self.interval, "Heartbeat started");

        *running = Some(Running {
            user_id: user_id.to_string(),
            token,
            handle,
        });
    }

    /// Stop the timer. No tick begins after this returns; a write already
    /// in flight may still land.
    pub fn stop(&self) {
        if let Some(prev) = lock(&self.running).take() {
            debug!(user_id = %prev.user_id, "Heartbeat stopped");
            self.cancel(prev);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// User the running timer writes for.
    pub fn user_id(&self) -> Option<String> {
        lock(&self.running).as_ref().map(|r| r.user_id.clone())
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            started: self.started.load(Ordering::SeqCst),
            stopped: self.stopped.load(Ordering::SeqCst),
        }
    }

    fn cancel(&self, running: Running) {
        running.token.cancel();
        // The handle is detached; an in-flight write finishes on its own.
        drop(running.handle);
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for HeartbeatEmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn beat(
    store: Arc<dyn RecordStore>,
    table: String,
    user_id: String,
    period: Duration,
    status: watch::Receiver<PresenceStatus>,
    clock: Clock,
    token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let record = PresenceRecord::online(&user_id, *status.borrow(), clock());
        match write_record(store.as_ref(), &table, &record).await {
            Ok(()) => debug!(user_id = %user_id, "Heartbeat written"),
            // The next tick retries either way.
            Err(e) if e.is_transient() => {
                warn!(user_id = %user_id, error = %e, "Heartbeat write failed")
            }
            Err(e) => error!(
                user_id = %user_id,
                error = %e,
                "Heartbeat write rejected; later ticks will likely fail too"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;
    use crate::presence::system_clock;

    const TABLE: &str = "user_status";

    fn emitter(platform: &MemoryPlatform) -> (HeartbeatEmitter, watch::Sender<PresenceStatus>) {
        let (tx, rx) = watch::channel(PresenceStatus::Online);
        let emitter = HeartbeatEmitter::new(
            Arc::new(platform.clone()),
            TABLE,
            Duration::from_secs(60),
            rx,
            system_clock(),
        );
        (emitter, tx)
    }

    async fn advance(secs: u64) {
        time::sleep(Duration::from_secs(secs)).await;
        // Let the timer task run its write.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_write_waits_one_interval() {
        let platform = MemoryPlatform::new();
        let (hb, _status) = emitter(&platform);

        hb.start("u1");
        advance(59).await;
        assert!(platform.writes(TABLE).is_empty());

        advance(1).await;
        let writes = platform.writes(TABLE);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0]["user_id"], "u1");
        assert_eq!(writes[0]["online"], true);

        advance(60).await;
        assert_eq!(platform.writes(TABLE).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_never_runs_two_timers() {
        let platform = MemoryPlatform::new();
        let (hb, _status) = emitter(&platform);

        hb.start("u1");
        hb.start("u1");
        hb.start("u1");
        assert_eq!(hb.stats().live(), 1);

        advance(60).await;
        assert_eq!(platform.writes(TABLE).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let platform = MemoryPlatform::new();
        let (hb, _status) = emitter(&platform);

        hb.stop();
        assert_eq!(hb.stats(), HeartbeatStats::default());

        hb.start("u1");
        hb.stop();
        hb.stop();
        assert!(!hb.is_running());
        assert_eq!(hb.stats(), HeartbeatStats { started: 1, stopped: 1 });

        advance(300).await;
        assert!(platform.writes(TABLE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_retried_next_tick() {
        let platform = MemoryPlatform::new();
        let (hb, _status) = emitter(&platform);
        platform.set_fail_writes(true);

        hb.start("u1");
        advance(60).await;
        assert_eq!(platform.upsert_calls(), 1);
        assert!(hb.is_running());

        platform.set_fail_writes(false);
        advance(60).await;
        assert_eq!(platform.upsert_calls(), 2);
        assert!(platform.row(TABLE, "u1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_carry_selected_status() {
        let platform = MemoryPlatform::new();
        let (hb, status) = emitter(&platform);

        hb.start("u1");
        status.send_replace(PresenceStatus::Dnd);
        advance(60).await;

        assert_eq!(platform.writes(TABLE)[0]["status"], "dnd");
        assert_eq!(hb.user_id().as_deref(), Some("u1"));
    }
}
