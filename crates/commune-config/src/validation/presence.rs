//! Validators for the presence, realtime and platform sections.

use super::helpers::{validate_identifier, validate_range};
use crate::schema::CommuneConfig;

/// Validate presence constraints.
pub(crate) fn validate_presence(errors: &mut Vec<String>, config: &CommuneConfig) {
    validate_identifier(errors, "presence.table", &config.presence.table);
    validate_range(
        errors,
        "presence.heartbeat_interval",
        config.presence.heartbeat_interval,
        10,
        600,
    );
    validate_range(
        errors,
        "presence.stale_after_intervals",
        config.presence.stale_after_intervals,
        2,
        10,
    );
    validate_range(
        errors,
        "presence.offline_write_timeout_ms",
        config.presence.offline_write_timeout_ms,
        100,
        10_000,
    );
}

/// Validate realtime transport constraints.
pub(crate) fn validate_realtime(errors: &mut Vec<String>, config: &CommuneConfig) {
    let rt = &config.realtime;
    validate_range(errors, "realtime.heartbeat_interval", rt.heartbeat_interval, 5, 120);
    validate_range(errors, "realtime.reconnect_delay", rt.reconnect_delay, 1, 60);
    validate_range(
        errors,
        "realtime.max_reconnect_delay",
        rt.max_reconnect_delay,
        1,
        600,
    );
    if rt.reconnect_delay > rt.max_reconnect_delay {
        errors.push(format!(
            "realtime.reconnect_delay = {} exceeds realtime.max_reconnect_delay = {}",
            rt.reconnect_delay, rt.max_reconnect_delay
        ));
    }
}

/// Validate platform constraints.
pub(crate) fn validate_platform(errors: &mut Vec<String>, config: &CommuneConfig) {
    let url = &config.platform.url;
    if !url.is_empty() && !url.starts_with("https://") && !url.starts_with("http://") {
        errors.push(format!("platform.url = {url:?} must start with http:// or https://"));
    }
    let project_ref = &config.platform.project_ref;
    if !project_ref.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.push(format!(
            "platform.project_ref = {project_ref:?} must be alphanumeric"
        ));
    }
}
