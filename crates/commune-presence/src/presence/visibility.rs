//! Host visibility observation.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::host::{HostEnvironment, HostEvent};

/// Forwards host lifecycle signals to a handler until released.
///
/// Dormant between signals: the task only wakes when the host emits.
pub struct VisibilityObserver {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl VisibilityObserver {
    /// Register with `host` and call `on_event` for every signal.
    ///
    /// Registration happens before this returns, so no signal emitted
    /// afterwards is missed.
    pub fn start<F>(host: &dyn HostEnvironment, on_event: F) -> Self
    where
        F: Fn(HostEvent) + Send + Sync + 'static,
    {
        let mut events = host.events();
        let token = CancellationToken::new();
        let cancel = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        debug!(?event, "Host event");
                        on_event(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Visibility observer lagged behind host events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop observing. Safe to call more than once.
    pub fn release(&mut self) {
        self.token.cancel();
        if self.handle.take().is_some() {
            debug!("Visibility observer released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for VisibilityObserver {
    fn drop(&mut self) {
        self.release();
    }
}
