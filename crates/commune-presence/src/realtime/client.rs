//! Public handle for the realtime connection, and its `ChangeFeed` impl.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use commune_common::{short_id, PlatformError};

use super::connection::connection_loop;
use super::types::{
    ChannelConfig, PostgresChangesFilter, RealtimeCommand, RealtimeConfig, RealtimeEvent,
    TopicEntry, TopicRegistry,
};
use crate::platform::{ChangeCallback, ChangeFeed, EventMask, SubscriptionId};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for interacting with the realtime connection.
///
/// Subscriptions survive reconnects: the background task rejoins every
/// registered topic each time the socket comes back.
pub struct RealtimeClient {
    config: RealtimeConfig,
    command_tx: mpsc::Sender<RealtimeCommand>,
    connected: Arc<RwLock<bool>>,
    events: broadcast::Sender<RealtimeEvent>,
    topics: TopicRegistry,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl RealtimeClient {
    /// Create a new client and start the background connection.
    pub fn connect(config: RealtimeConfig) -> Self {
        let (client, command_rx) = Self::detached(config);
        tokio::spawn(connection_loop(
            client.config.clone(),
            Arc::clone(&client.connected),
            client.events.clone(),
            command_rx,
            Arc::clone(&client.topics),
            client.shutdown.clone(),
        ));
        client
    }

    /// Client state without a running connection task.
    fn detached(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeCommand>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(256);
        let client = Self {
            config,
            command_tx,
            connected: Arc::new(RwLock::new(false)),
            events,
            topics: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        };
        (client, command_rx)
    }

    /// Subscribe to connection status events.
    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Number of live table subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Leave every channel, close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(RealtimeCommand::Disconnect).await;
        self.shutdown.cancel();
        info!("Realtime client disconnected");
    }

    fn channel_config(&self, table: &str, mask: EventMask) -> ChannelConfig {
        ChannelConfig {
            postgres_changes: vec![PostgresChangesFilter {
                event: mask.wire_event().to_string(),
                schema: self.config.schema.clone(),
                table: table.to_string(),
            }],
            access_token: self.config.access_token.clone(),
        }
    }
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn subscribe(
        &self,
        table: &str,
        mask: EventMask,
        callback: ChangeCallback,
    ) -> Result<SubscriptionId, PlatformError> {
        if self.shutdown.is_cancelled() {
            return Err(PlatformError::Closed);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = format!("{table}:{}", short_id());
        let entry = TopicEntry {
            id,
            table: table.to_string(),
            mask,
            callback,
            config: self.channel_config(table, mask),
        };
        self.topics.write().await.insert(topic.clone(), entry);

        if self
            .command_tx
            .send(RealtimeCommand::JoinChannel {
                topic: topic.clone(),
            })
            .await
            .is_err()
        {
            self.topics.write().await.remove(&topic);
            return Err(PlatformError::Closed);
        }

        debug!(topic = %topic, subscription = %id, "Subscribed to table changes");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let topic = {
            let mut topics = self.topics.write().await;
            let topic = topics
                .iter()
                .find(|(_, entry)| entry.id == id)
                .map(|(topic, _)| topic.clone());
            if let Some(topic) = &topic {
                topics.remove(topic);
            }
            topic
        };

        let Some(topic) = topic else {
            return;
        };
        let _ = self
            .command_tx
            .send(RealtimeCommand::LeaveChannel {
                topic: topic.clone(),
            })
            .await;
        debug!(topic = %topic, subscription = %id, "Unsubscribed from table changes");
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
