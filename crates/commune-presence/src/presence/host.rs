//! The host environment: where visibility and termination signals come from.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle signal from the host (window, tab, process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostEvent {
    /// The client became visible.
    Foreground,
    /// The client was hidden; it may come back.
    Background,
    /// The client is about to go away for good.
    BeforeTerminate,
}

/// Source of host lifecycle signals.
pub trait HostEnvironment: Send + Sync {
    /// A fresh receiver; only signals emitted after this call are delivered.
    fn events(&self) -> broadcast::Receiver<HostEvent>;
}

/// Host driven by explicit calls, backed by a broadcast channel.
pub struct ChannelHost {
    sender: broadcast::Sender<HostEvent>,
}

impl ChannelHost {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Deliver `event`; returns how many observers received it.
    pub fn emit(&self, event: HostEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn foreground(&self) -> usize {
        self.emit(HostEvent::Foreground)
    }

    pub fn background(&self) -> usize {
        self.emit(HostEvent::Background)
    }

    pub fn terminate(&self) -> usize {
        self.emit(HostEvent::BeforeTerminate)
    }

    /// Observers currently registered.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelHost {
    fn default() -> Self {
        Self::new(16)
    }
}

impl HostEnvironment for ChannelHost {
    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }
}
