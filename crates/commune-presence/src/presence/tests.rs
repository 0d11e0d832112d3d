use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use super::*;
use crate::identity::Identity;
use crate::platform::{ChangeKind, MemoryPlatform, RecordStore};
use crate::record::{PresenceRecord, PresenceStatus};

const TABLE: &str = "user_status";

struct Harness {
    platform: MemoryPlatform,
    host: Arc<ChannelHost>,
    session: PresenceSession,
}

fn harness() -> Harness {
    let platform = MemoryPlatform::new();
    let host = Arc::new(ChannelHost::new(16));
    let deps = PresenceDeps::from_platform(&platform, host.clone()).with_clock(paused_clock());
    let session = PresenceSession::new(deps, PresenceSettings::default());
    Harness {
        platform,
        host,
        session,
    }
}

/// Wall time that moves with the paused tokio clock.
fn paused_clock() -> Clock {
    let origin = Utc::now();
    let start = tokio::time::Instant::now();
    Arc::new(move || origin + chrono::Duration::from_std(start.elapsed()).unwrap())
}

fn ada() -> Identity {
    Identity::new("u1", "Ada")
}

fn grace() -> Identity {
    Identity::new("u2", "Grace")
}

/// Let spawned tasks (observer, heartbeat, host reactions) run.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
    settle().await;
}

fn records_for(platform: &MemoryPlatform, user: &str) -> Vec<PresenceRecord> {
    platform
        .writes(TABLE)
        .iter()
        .filter(|w| w["user_id"] == user)
        .map(|w| PresenceRecord::from_value(w).unwrap())
        .collect()
}

fn recorder(session: &PresenceSession) -> Arc<Mutex<Vec<PresenceChange>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.on_change(move |change| sink.lock().unwrap().push(change));
    seen
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn activation_writes_online_once_and_starts_one_timer() {
    let h = harness();
    h.session.activate(ada()).await;
    settle().await;

    let writes = records_for(&h.platform, "u1");
    assert_eq!(writes.len(), 1);
    assert!(writes[0].online);
    assert_eq!(writes[0].status, PresenceStatus::Online);

    assert!(h.session.is_active());
    assert!(h.session.heartbeat_running());
    assert_eq!(h.session.heartbeat_stats().live(), 1);
    assert_eq!(h.platform.active_subscriptions(), 1);
    assert_eq!(h.host.listener_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn double_activation_keeps_one_subscription_and_one_timer() {
    let h = harness();
    h.session.activate(ada()).await;
    h.session.activate(ada()).await;
    settle().await;

    assert_eq!(h.platform.active_subscriptions(), 1);
    assert_eq!(h.platform.subscribe_calls(), 2);
    assert_eq!(h.session.heartbeat_stats().live(), 1);
    assert_eq!(h.host.listener_count(), 1);

    // Same user: no offline blip between the two activations.
    let writes = records_for(&h.platform, "u1");
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|r| r.online));

    advance(60).await;
    assert_eq!(records_for(&h.platform, "u1").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn switching_users_marks_previous_offline() {
    let h = harness();
    h.session.activate(ada()).await;
    h.session.activate(grace()).await;

    let u1 = PresenceRecord::from_value(&h.platform.row(TABLE, "u1").unwrap()).unwrap();
    let u2 = PresenceRecord::from_value(&h.platform.row(TABLE, "u2").unwrap()).unwrap();
    assert!(!u1.online);
    assert!(u2.online);
    assert_eq!(h.session.current_user().unwrap().user_id, "u2");
    assert_eq!(h.session.heartbeat_stats().live(), 1);
    assert_eq!(h.platform.active_subscriptions(), 1);
}

#[tokio::test(start_paused = true)]
async fn activate_current_user_follows_auth_session() {
    let h = harness();

    h.platform.set_current_user(Some(ada()));
    assert!(h.session.activate_current_user().await.unwrap());
    assert_eq!(h.session.current_user().unwrap().user_id, "u1");

    h.platform.set_current_user(None);
    assert!(!h.session.activate_current_user().await.unwrap());
    assert!(!h.session.is_active());
    assert!(!records_for(&h.platform, "u1").last().unwrap().online);
}

#[tokio::test(start_paused = true)]
async fn set_identity_none_signs_out() {
    let h = harness();
    h.session.set_identity(Some(ada())).await;
    assert!(h.session.is_active());

    h.session.set_identity(None).await;
    assert!(!h.session.is_active());
    assert!(!h.session.heartbeat_running());
}

#[tokio::test(start_paused = true)]
async fn subscribe_failure_degrades_to_heartbeat_only() {
    let h = harness();
    h.platform.set_fail_subscribe(true);

    h.session.activate(ada()).await;
    assert!(h.session.is_active());
    assert!(h.session.heartbeat_running());
    assert!(!h.session.is_subscribed());

    h.session.deactivate().await;
    assert_eq!(h.platform.unsubscribe_calls(), 0);
    assert!(!records_for(&h.platform, "u1").last().unwrap().online);
}

// ---------------------------------------------------------------------------
// Heartbeat and visibility
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn online_heartbeat_offline_sequence() {
    let h = harness();
    h.session.activate(ada()).await;

    advance(60).await;
    let writes = records_for(&h.platform, "u1");
    assert_eq!(writes.len(), 2);
    assert!(writes[1].online);
    assert_eq!(
        writes[1].last_seen - writes[0].last_seen,
        chrono::Duration::seconds(60)
    );

    h.session.deactivate().await;
    let writes = records_for(&h.platform, "u1");
    assert_eq!(writes.len(), 3);
    assert!(!writes[2].online);
    assert_eq!(writes[2].status, PresenceStatus::Offline);

    advance(300).await;
    assert_eq!(records_for(&h.platform, "u1").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn timer_balance_stays_within_bounds() {
    let h = harness();
    let check = |session: &PresenceSession| {
        let stats = session.heartbeat_stats();
        assert!(stats.started >= stats.stopped);
        assert!(stats.live() <= 1);
    };

    check(&h.session);
    h.session.activate(ada()).await;
    check(&h.session);
    for _ in 0..3 {
        h.host.background();
        settle().await;
        check(&h.session);
        h.host.foreground();
        settle().await;
        check(&h.session);
    }
    h.session.activate(ada()).await;
    check(&h.session);
    h.session.deactivate().await;
    check(&h.session);
    assert_eq!(h.session.heartbeat_stats().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn background_then_foreground_leaves_one_timer() {
    let h = harness();
    h.session.activate(ada()).await;
    settle().await;

    h.host.background();
    h.host.foreground();
    settle().await;

    assert!(h.session.heartbeat_running());
    assert_eq!(h.session.heartbeat_stats().live(), 1);

    // Activation + foreground mark-online.
    assert_eq!(records_for(&h.platform, "u1").len(), 2);
    advance(60).await;
    assert_eq!(records_for(&h.platform, "u1").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn background_pauses_without_offline_write() {
    let h = harness();
    h.session.activate(ada()).await;
    settle().await;

    h.host.background();
    settle().await;
    assert!(!h.session.heartbeat_running());
    assert!(h.session.is_active());

    advance(300).await;
    let writes = records_for(&h.platform, "u1");
    assert_eq!(writes.len(), 1);
    assert!(writes[0].online);
}

#[tokio::test(start_paused = true)]
async fn host_events_after_deactivation_are_ignored() {
    let h = harness();
    h.session.activate(ada()).await;
    settle().await;
    h.session.deactivate().await;
    let before = h.platform.upsert_calls();

    h.host.foreground();
    settle().await;

    assert!(!h.session.heartbeat_running());
    assert_eq!(h.platform.upsert_calls(), before);
    assert_eq!(h.host.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn selected_status_survives_heartbeats() {
    let h = harness();
    h.session.activate(ada()).await;

    h.session.set_status(PresenceStatus::Dnd).await;
    let row = PresenceRecord::from_value(&h.platform.row(TABLE, "u1").unwrap()).unwrap();
    assert_eq!(row.status, PresenceStatus::Dnd);
    assert!(row.online);

    advance(60).await;
    let last = records_for(&h.platform, "u1").pop().unwrap();
    assert_eq!(last.status, PresenceStatus::Dnd);
    assert_eq!(h.session.status(), PresenceStatus::Dnd);
}

// ---------------------------------------------------------------------------
// Deactivation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn offline_is_attempted_even_when_writes_fail() {
    let h = harness();
    h.session.activate(ada()).await;
    h.platform.set_fail_writes(true);

    advance(60).await;
    h.session.deactivate().await;

    let attempts = h.platform.writes(TABLE);
    let last = attempts.last().unwrap();
    assert_eq!(last["user_id"], "u1");
    assert_eq!(last["online"], false);
    assert!(!h.session.is_active());
    assert!(!h.session.heartbeat_running());
    assert_eq!(h.platform.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_offline_failure_is_retried_once() {
    let h = harness();
    h.session.activate(ada()).await;
    let before = h.platform.upsert_calls();

    h.platform.fail_next_writes(1);
    h.session.deactivate().await;

    assert_eq!(h.platform.upsert_calls(), before + 2);
    let stored = PresenceRecord::from_value(&h.platform.row(TABLE, "u1").unwrap()).unwrap();
    assert!(!stored.online);
}

#[tokio::test(start_paused = true)]
async fn persistent_offline_failure_is_not_retried_forever() {
    let h = harness();
    h.session.activate(ada()).await;
    let before = h.platform.upsert_calls();

    h.platform.set_fail_writes(true);
    h.session.deactivate().await;

    assert_eq!(h.platform.upsert_calls(), before + 2);
    assert!(!h.session.is_active());
}

#[tokio::test(start_paused = true)]
async fn concurrent_deactivation_releases_once() {
    let h = harness();
    h.session.activate(ada()).await;
    settle().await;

    let other = h.session.clone();
    tokio::join!(h.session.deactivate(), other.deactivate());
    h.session.deactivate().await;

    let offline: Vec<_> = records_for(&h.platform, "u1")
        .into_iter()
        .filter(|r| !r.online)
        .collect();
    assert_eq!(offline.len(), 1);
    assert_eq!(h.platform.unsubscribe_calls(), 1);
    assert_eq!(h.session.heartbeat_stats(), HeartbeatStats { started: 1, stopped: 1 });
}

#[tokio::test(start_paused = true)]
async fn terminate_signal_deactivates() {
    let h = harness();
    h.session.activate(ada()).await;
    settle().await;

    h.host.terminate();
    settle().await;

    assert!(!h.session.is_active());
    assert!(!records_for(&h.platform, "u1").last().unwrap().online);

    // Terminate racing an explicit deactivation still writes offline once.
    h.session.deactivate().await;
    let offline = records_for(&h.platform, "u1")
        .iter()
        .filter(|r| !r.online)
        .count();
    assert_eq!(offline, 1);
}

#[tokio::test(start_paused = true)]
async fn guard_release_deactivates() {
    let h = harness();
    let guard = h.session.guard(ada()).await;
    assert!(guard.session().is_some_and(|s| s.is_active()));

    guard.release().await;
    assert!(!h.session.is_active());
    assert!(!records_for(&h.platform, "u1").last().unwrap().online);
}

#[tokio::test(start_paused = true)]
async fn dropped_guard_deactivates_in_background() {
    let h = harness();
    {
        let _guard = h.session.guard(ada()).await;
        assert!(h.session.is_active());
    }
    settle().await;
    assert!(!h.session.is_active());
}

#[tokio::test(start_paused = true)]
async fn stale_guard_leaves_newer_activation_alone() {
    let h = harness();
    let guard = h.session.guard(ada()).await;
    h.session.activate(grace()).await;

    guard.release().await;
    assert_eq!(h.session.current_user().unwrap().user_id, "u2");
    assert!(h.session.heartbeat_running());
}

#[tokio::test(start_paused = true)]
async fn guard_keeps_its_own_activation_when_another_is_queued() {
    let h = harness();
    let other = h.session.clone();

    let (guard, ()) = tokio::join!(h.session.guard(ada()), other.activate(grace()));

    assert_eq!(h.session.current_user().unwrap().user_id, "u2");
    assert_ne!(Some(guard.session_id().clone()), h.session.session_id());

    guard.release().await;
    assert!(h.session.is_active());
    assert!(records_for(&h.platform, "u2").iter().all(|r| r.online));
}

// ---------------------------------------------------------------------------
// Change observation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn other_users_change_reaches_callback_once() {
    let h = harness();
    let seen = recorder(&h.session);
    h.session.activate(ada()).await;

    let theirs = PresenceRecord::online("u2", PresenceStatus::Idle, Utc::now());
    h.platform
        .upsert(TABLE, theirs.to_value().unwrap())
        .await
        .unwrap();

    let changes: Vec<PresenceChange> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.record.user_id == "u2")
        .cloned()
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Insert);
    assert_eq!(changes[0].record, theirs);

    // Our own session is untouched.
    assert_eq!(h.session.current_user().unwrap().user_id, "u1");
    assert!(h.session.heartbeat_running());
    assert_eq!(records_for(&h.platform, "u1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_callbacks_after_deactivation() {
    let h = harness();
    let seen = recorder(&h.session);
    h.session.activate(ada()).await;
    h.session.deactivate().await;
    seen.lock().unwrap().clear();

    let theirs = PresenceRecord::online("u2", PresenceStatus::Online, Utc::now());
    h.platform
        .upsert(TABLE, theirs.to_value().unwrap())
        .await
        .unwrap();

    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn directory_tracks_session_changes() {
    let h = harness();
    let directory = PresenceDirectory::new(h.session.settings());
    let callback = directory.callback();
    h.session.on_change(move |change| callback(change));
    h.session.activate(ada()).await;

    let theirs = PresenceRecord::online("u2", PresenceStatus::Online, Utc::now());
    h.platform
        .upsert(TABLE, theirs.to_value().unwrap())
        .await
        .unwrap();
    assert_eq!(directory.status_of("u2", Utc::now()), PresenceStatus::Online);

    h.platform.delete(TABLE, "u2");
    assert!(directory.get("u2").is_none());
}
