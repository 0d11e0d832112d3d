//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Commune presence configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[platform]
# project_ref = "abcdefghijklmnop"   # or set COMMUNE_PROJECT_REF
# url = ""                           # full base URL, overrides project_ref
# api_key = ""                       # anon key, or set COMMUNE_API_KEY
# access_token = ""                  # user JWT, or set COMMUNE_ACCESS_TOKEN

[presence]
# enabled = true
# table = "user_status"
# heartbeat_interval = 60            # 10-600 seconds
# stale_after_intervals = 3          # 2-10, records older than N heartbeats read as offline
# offline_write_timeout_ms = 1500    # 100-10000

[realtime]
# heartbeat_interval = 25            # 5-120 seconds
# reconnect_delay = 1                # base backoff, seconds
# max_reconnect_delay = 30

[logging]
# level = "INFO"                     # TRACE, DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
