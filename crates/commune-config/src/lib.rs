//! Commune configuration system.
//!
//! TOML-based configuration for the presence client: platform connection,
//! heartbeat and staleness timing, realtime transport and logging. All
//! sections use defaults so partial configs work out of the box, and
//! connection secrets can come from the environment instead of the file.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use commune_config::{load_config, config_to_json};
//!
//! let config = load_config(None).expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

use std::path::Path;

pub use schema::{
    CommuneConfig, LogLevel, LoggingConfig, PlatformConfig, PresenceConfig, RealtimeConfig,
    CONFIG_SCHEMA_VERSION,
};

use commune_common::ConfigError;

/// Environment variables that override `[platform]` values.
pub const ENV_PROJECT_REF: &str = "COMMUNE_PROJECT_REF";
pub const ENV_API_KEY: &str = "COMMUNE_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "COMMUNE_ACCESS_TOKEN";

/// Load config from `path`, or from the platform default path when `None`,
/// then apply environment overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<CommuneConfig, ConfigError> {
    let mut config = match path {
        Some(p) => toml_loader::load_from_path(p)?,
        None => toml_loader::load_default()?,
    };

    apply_env_overrides(&mut config);
    validation::validate(&config)?;
    Ok(config)
}

/// Apply `COMMUNE_*` environment variables on top of the file values.
pub fn apply_env_overrides(config: &mut CommuneConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup. Empty values are ignored.
pub fn apply_overrides<F>(config: &mut CommuneConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get(ENV_PROJECT_REF) {
        tracing::debug!("platform.project_ref overridden from environment");
        config.platform.project_ref = v;
    }
    if let Some(v) = get(ENV_API_KEY) {
        tracing::debug!("platform.api_key overridden from environment");
        config.platform.api_key = v;
    }
    if let Some(v) = get(ENV_ACCESS_TOKEN) {
        tracing::debug!("platform.access_token overridden from environment");
        config.platform.access_token = Some(v);
    }
}

/// Serialize a config to a pretty-printed JSON string with secrets masked.
pub fn config_to_json(config: &CommuneConfig) -> String {
    let mut redacted = config.clone();
    if !redacted.platform.api_key.is_empty() {
        redacted.platform.api_key = "[REDACTED]".into();
    }
    if redacted.platform.access_token.is_some() {
        redacted.platform.access_token = Some("[REDACTED]".into());
    }
    serde_json::to_string_pretty(&redacted)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
