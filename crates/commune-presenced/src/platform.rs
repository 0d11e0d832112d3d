//! Wiring from config to platform adapters.

use std::sync::Arc;
use std::time::Duration;

use commune_common::{CommuneError, PlatformError};
use commune_config::{CommuneConfig, PresenceConfig};
use commune_presence::platform::{ChangeFeed, RecordStore};
use commune_presence::presence::{
    system_clock, HostEnvironment, PresenceDeps, PresenceSettings,
};
use commune_presence::realtime::{RealtimeClient, RealtimeConfig};
use commune_presence::{Identity, MemoryPlatform, RestConfig, SupabaseRest};

/// Platform adapters for one run of the daemon.
pub struct Backend {
    pub deps: PresenceDeps,
    realtime: Option<Arc<RealtimeClient>>,
}

impl Backend {
    /// In-process platform; `user` is reported as the signed-in user.
    pub fn offline(user: Option<Identity>, host: Arc<dyn HostEnvironment>) -> Self {
        let platform = MemoryPlatform::new();
        platform.set_current_user(user);
        Self {
            deps: PresenceDeps::from_platform(&platform, host),
            realtime: None,
        }
    }

    /// REST store and auth plus a realtime change feed.
    pub fn connect(
        config: &CommuneConfig,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Self, CommuneError> {
        let rest = Arc::new(rest_client(config)?);

        let mut rt_config =
            RealtimeConfig::new(config.platform.base_url(), &config.platform.api_key);
        rt_config.access_token = config.platform.access_token.clone();
        rt_config.heartbeat_interval_secs = u64::from(config.realtime.heartbeat_interval);
        rt_config.reconnect_delay_secs = u64::from(config.realtime.reconnect_delay);
        rt_config.max_reconnect_delay_secs = u64::from(config.realtime.max_reconnect_delay);
        let realtime = Arc::new(RealtimeClient::connect(rt_config));

        let store: Arc<dyn RecordStore> = rest.clone();
        let feed: Arc<dyn ChangeFeed> = realtime.clone();
        Ok(Self {
            deps: PresenceDeps {
                store,
                feed,
                auth: rest,
                host,
                clock: system_clock(),
            },
            realtime: Some(realtime),
        })
    }

    pub async fn shutdown(&self) {
        if let Some(realtime) = &self.realtime {
            realtime.disconnect().await;
        }
    }
}

/// A REST client for the configured project.
pub fn rest_client(config: &CommuneConfig) -> Result<SupabaseRest, CommuneError> {
    if !config.platform.is_configured() {
        return Err(CommuneError::Platform(PlatformError::Auth(
            "platform not configured: set [platform] project_ref and api_key \
             (or COMMUNE_PROJECT_REF / COMMUNE_API_KEY), or pass --offline"
                .into(),
        )));
    }
    let mut rest_config = RestConfig::new(config.platform.base_url(), &config.platform.api_key);
    rest_config.access_token = config.platform.access_token.clone();
    Ok(SupabaseRest::new(rest_config)?)
}

/// Session tunables from the `[presence]` section.
pub fn settings_from(config: &PresenceConfig) -> PresenceSettings {
    let heartbeat_interval = Duration::from_secs(u64::from(config.heartbeat_interval));
    PresenceSettings {
        table: config.table.clone(),
        heartbeat_interval,
        stale_after: heartbeat_interval * config.stale_after_intervals,
        offline_write_timeout: Duration::from_millis(u64::from(config.offline_write_timeout_ms)),
    }
}
