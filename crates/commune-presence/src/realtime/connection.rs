//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::handle_phoenix_message;
use super::types::{PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent, TopicRegistry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

fn channel_message(topic: &str, event: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: event.to_string(),
        payload,
        msg_ref: Some(next_ref()),
    }
}

/// Serialize and send one message. Returns false once the socket is gone.
async fn send_message<S>(writer: &Mutex<S>, msg: &PhoenixMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => writer
            .lock()
            .await
            .send(WsMessage::Text(json.into()))
            .await
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode Phoenix message");
            true
        }
    }
}

/// Topics joined on the current socket; reset on every reconnect.
type JoinedTopics = Arc<Mutex<HashSet<String>>>;

async fn join_topic<S>(
    writer: &Mutex<S>,
    topics: &TopicRegistry,
    joined: &JoinedTopics,
    topic: &str,
) where
    S: Sink<WsMessage> + Unpin,
{
    let Some(config) = topics.read().await.get(topic).map(|e| e.config.clone()) else {
        return;
    };
    if !joined.lock().await.insert(topic.to_string()) {
        return;
    }
    let msg = channel_message(topic, "phx_join", config.to_join_payload());
    send_message(writer, &msg).await;
    debug!(topic = %topic, "Joining channel");
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
///
/// Runs until `shutdown` is cancelled.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: broadcast::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
    topics: TopicRegistry,
    shutdown: CancellationToken,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let mut reconnect_delay = config.reconnect_delay_secs;

    while !shutdown.is_cancelled() {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to realtime");

        let attempt = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url)) => r,
        };

        match attempt {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected);

                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));
                let joined: JoinedTopics = Arc::new(Mutex::new(HashSet::new()));

                // Rejoin every live subscription.
                let live: Vec<String> = topics.read().await.keys().cloned().collect();
                for topic in &live {
                    join_topic(&ws_write, &topics, &joined, topic).await;
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));

                let mut cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&topics),
                    Arc::clone(&joined),
                    shutdown.clone(),
                ));

                // Process incoming messages.
                let mut read_stream = ws_read;
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = read_stream.next() => next,
                    };
                    match next {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<PhoenixMessage>(&text) {
                                Ok(phoenix_msg) => {
                                    handle_phoenix_message(&phoenix_msg, &topics, &event_tx).await;
                                }
                                Err(_) => {
                                    debug!(
                                        text = %text.as_str(),
                                        "Unrecognized message from realtime"
                                    );
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Realtime server closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                // Cleanup.
                heartbeat_handle.abort();
                if shutdown.is_cancelled() {
                    // Let a pending Disconnect finish its leave/close frames.
                    if tokio::time::timeout(Duration::from_secs(1), &mut cmd_handle)
                        .await
                        .is_err()
                    {
                        cmd_handle.abort();
                    }
                } else {
                    cmd_handle.abort();
                }
                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to realtime");
                let _ = event_tx.send(RealtimeEvent::Error(format!("Connection failed: {e}")));
            }
            Err(_elapsed) => {
                error!("WebSocket connection timed out after 15s");
                let _ = event_tx.send(RealtimeEvent::Error(
                    "Connection timed out after 15s".to_string(),
                ));
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        // Exponential backoff reconnect.
        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }

    info!("Realtime connection loop stopped");
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let msg = PhoenixMessage {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(next_ref()),
        };
        if !send_message(&ws_write, &msg).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    cmd_write: Arc<Mutex<S>>,
    topics: TopicRegistry,
    joined: JoinedTopics,
    shutdown: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::JoinChannel { topic } => {
                join_topic(&cmd_write, &topics, &joined, &topic).await;
            }
            RealtimeCommand::LeaveChannel { topic } => {
                if joined.lock().await.remove(&topic) {
                    let msg = channel_message(&topic, "phx_leave", serde_json::json!({}));
                    send_message(&cmd_write, &msg).await;
                    debug!(topic = %topic, "Left channel");
                }
            }
            RealtimeCommand::Disconnect => {
                // Send phx_leave for all channels, then close.
                let topics: Vec<String> = joined.lock().await.drain().collect();
                for topic in topics {
                    let msg = channel_message(&topic, "phx_leave", serde_json::json!({}));
                    send_message(&cmd_write, &msg).await;
                }
                let _ = cmd_write.lock().await.send(WsMessage::Close(None)).await;
                shutdown.cancel();
                return;
            }
        }
    }
}
