pub mod errors;
pub mod id;

pub use errors::{CommuneError, ConfigError, PlatformError};
pub use id::{new_id, short_id, SessionId};

pub type Result<T> = std::result::Result<T, CommuneError>;
