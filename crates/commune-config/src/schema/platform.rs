//! Data platform connection settings.

use serde::{Deserialize, Serialize};

/// Where the hosted backend lives and how to authenticate against it.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlatformConfig {
    /// Project reference; the REST and realtime hosts derive from it.
    pub project_ref: String,
    /// Full base URL override (e.g. a self-hosted instance). Takes precedence
    /// over `project_ref` when non-empty.
    pub url: String,
    /// Publishable anon key.
    pub api_key: String,
    /// Optional user JWT.
    pub access_token: Option<String>,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("project_ref", &self.project_ref)
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl PlatformConfig {
    /// HTTPS base URL of the project.
    pub fn base_url(&self) -> String {
        if !self.url.is_empty() {
            return self.url.trim_end_matches('/').to_string();
        }
        format!("https://{}.supabase.co", self.project_ref)
    }

    /// Whether enough is configured to reach a remote platform.
    pub fn is_configured(&self) -> bool {
        (!self.project_ref.is_empty() || !self.url.is_empty()) && !self.api_key.is_empty()
    }
}
