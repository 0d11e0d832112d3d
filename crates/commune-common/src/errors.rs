use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures reported by the data platform adapters (records, auth, change feed).
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Network(String),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("auth error: {0}")]
    Auth(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("platform connection closed")]
    Closed,
}

impl PlatformError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Closed => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Auth(_) | Self::Decode(_) | Self::Subscription(_) => false,
        }
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommuneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("presence error: {0}")]
    Presence(String),

    #[error("{0}")]
    Other(String),
}
