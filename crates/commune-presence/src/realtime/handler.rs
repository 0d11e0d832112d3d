//! Incoming Phoenix message handler and `postgres_changes` parsing.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::platform::{ChangeEvent, ChangeKind};

use super::types::{PhoenixMessage, RealtimeEvent, TopicRegistry};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
pub(crate) fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse the payload of a `postgres_changes` message.
///
/// The server sends `{ "data": { "type": "UPDATE", "table": ..,
/// "record": {..}, "old_record": {..} }, "ids": [..] }`.
pub(crate) fn parse_postgres_change(payload: &serde_json::Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let kind: ChangeKind = serde_json::from_value(data.get("type")?.clone()).ok()?;
    let table = data.get("table")?.as_str()?.to_string();
    Some(ChangeEvent {
        table,
        kind,
        record: data.get("record").cloned().unwrap_or(serde_json::Value::Null),
        old_record: data
            .get("old_record")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
    })
}

// ---------------------------------------------------------------------------
// Message Handler
// ---------------------------------------------------------------------------

/// Handle a single incoming Phoenix message.
pub(crate) async fn handle_phoenix_message(
    msg: &PhoenixMessage,
    topics: &TopicRegistry,
    event_tx: &broadcast::Sender<RealtimeEvent>,
) {
    let topic = strip_topic_prefix(&msg.topic);

    match msg.event.as_str() {
        "postgres_changes" => {
            let Some(change) = parse_postgres_change(&msg.payload) else {
                debug!(topic = %topic, "Malformed postgres_changes payload");
                return;
            };
            // Clone the callback out so it runs without the registry lock.
            let target = {
                let registry = topics.read().await;
                registry
                    .get(topic)
                    .filter(|entry| entry.table == change.table && entry.mask.contains(change.kind))
                    .map(|entry| (entry.id, Arc::clone(&entry.callback)))
            };
            match target {
                Some((id, callback)) => {
                    debug!(
                        topic = %topic,
                        subscription = %id,
                        kind = ?change.kind,
                        "Change received"
                    );
                    callback(change);
                }
                None => {
                    debug!(topic = %topic, "Change for unknown or filtered subscription");
                }
            }
        }
        "phx_reply" => {
            // Join acknowledgment, or the reply to a heartbeat/leave.
            if topic == "phoenix" {
                return;
            }
            if let Some(status) = msg.payload.get("status").and_then(|s| s.as_str()) {
                if status == "ok" {
                    debug!(topic = %topic, "Channel reply: ok");
                    let _ = event_tx.send(RealtimeEvent::ChannelJoined {
                        topic: topic.to_string(),
                    });
                } else {
                    let message = msg
                        .payload
                        .get("response")
                        .and_then(|r| r.get("reason"))
                        .and_then(|r| r.as_str())
                        .unwrap_or("unknown error")
                        .to_string();
                    warn!(
                        topic = %topic,
                        status = %status,
                        reason = %message,
                        "Channel reply error"
                    );
                    let _ = event_tx.send(RealtimeEvent::ChannelError {
                        topic: topic.to_string(),
                        message,
                    });
                }
            }
        }
        "system" => {
            // Subscription status from the changes extension.
            let status = msg
                .payload
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("");
            let message = msg
                .payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            if status == "error" {
                warn!(topic = %topic, message = %message, "Change subscription rejected");
                let _ = event_tx.send(RealtimeEvent::ChannelError {
                    topic: topic.to_string(),
                    message,
                });
            } else {
                debug!(topic = %topic, message = %message, "System message");
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            let _ = event_tx.send(RealtimeEvent::ChannelError {
                topic: topic.to_string(),
                message: "Channel error".to_string(),
            });
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            let _ = event_tx.send(RealtimeEvent::ChannelError {
                topic: topic.to_string(),
                message: "Channel closed".to_string(),
            });
        }
        _ => {
            debug!(
                topic = %topic,
                event = %msg.event,
                "Unhandled Phoenix event"
            );
        }
    }
}
