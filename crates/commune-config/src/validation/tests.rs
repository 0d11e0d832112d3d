//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = CommuneConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_heartbeat_interval_too_small() {
    let mut config = CommuneConfig::default();
    config.presence.heartbeat_interval = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("presence.heartbeat_interval"));
}

#[test]
fn catches_stale_window_too_tight() {
    let mut config = CommuneConfig::default();
    config.presence.stale_after_intervals = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("presence.stale_after_intervals"));
}

#[test]
fn catches_bad_table_name() {
    let mut config = CommuneConfig::default();
    config.presence.table = "user_status?select=*".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("presence.table"));

    config.presence.table = String::new();
    assert!(validate(&config).is_err());
}

#[test]
fn catches_inverted_reconnect_delays() {
    let mut config = CommuneConfig::default();
    config.realtime.reconnect_delay = 40;
    config.realtime.max_reconnect_delay = 20;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("exceeds realtime.max_reconnect_delay"));
}

#[test]
fn catches_non_http_url() {
    let mut config = CommuneConfig::default();
    config.platform.url = "ftp://example.com".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("platform.url"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = CommuneConfig::default();
    config.presence.heartbeat_interval = 5000;
    config.realtime.heartbeat_interval = 1;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("presence.heartbeat_interval"));
    assert!(err.contains("realtime.heartbeat_interval"));
    assert!(err.contains("; "));
}
