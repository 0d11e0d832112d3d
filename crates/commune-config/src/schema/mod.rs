//! Configuration schema types for Commune.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod platform;
mod presence;
mod system;

pub use platform::*;
pub use presence::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for the presence client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct CommuneConfig {
    pub platform: PlatformConfig,
    pub presence: PresenceConfig,
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}
