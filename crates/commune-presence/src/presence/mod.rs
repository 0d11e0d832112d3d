//! User presence: liveness writes, visibility handling and change
//! observation for one signed-in user.
//!
//! `PresenceSession` ties the pieces together. `HeartbeatEmitter` keeps the
//! record fresh, `VisibilityObserver` pauses and resumes it with the host,
//! `PresenceSubscription` watches everyone else, and `PresenceDirectory`
//! turns the feed into a queryable view.

mod directory;
mod feed;
mod heartbeat;
mod host;
mod session;
mod types;
mod visibility;

#[cfg(test)]
mod tests;

pub use directory::PresenceDirectory;
pub use feed::PresenceSubscription;
pub use heartbeat::{HeartbeatEmitter, HeartbeatStats};
pub use host::{ChannelHost, HostEnvironment, HostEvent};
pub use session::{PresenceGuard, PresenceSession};
pub use types::{
    system_clock, Clock, PresenceCallback, PresenceChange, PresenceDeps, PresenceSettings,
};
pub use visibility::VisibilityObserver;
