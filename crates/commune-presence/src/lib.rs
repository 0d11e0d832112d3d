pub mod identity;
pub mod platform;
pub mod presence;
pub mod realtime;
pub mod record;

pub use identity::Identity;
pub use platform::{
    AuthSession, ChangeEvent, ChangeFeed, ChangeKind, EventMask, MemoryPlatform, RecordStore,
    RestConfig, StaticAuth, SubscriptionId, SupabaseRest,
};
pub use presence::{
    ChannelHost, HostEnvironment, HostEvent, PresenceChange, PresenceDeps, PresenceDirectory,
    PresenceGuard, PresenceSession, PresenceSettings,
};
pub use realtime::{RealtimeClient, RealtimeConfig, RealtimeEvent};
pub use record::{PresenceRecord, PresenceStatus};
