use serde::{Deserialize, Serialize};

/// The signed-in user a presence session runs for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    /// Auth JWT used for row-level security on writes and the change feed.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            access_token: None,
        }
    }

    /// Build an identity from an auth `user` object.
    ///
    /// The display name falls back through `user_metadata.display_name`,
    /// `user_metadata.full_name`, the local part of `email`, then the id.
    pub fn from_auth_user(user: &serde_json::Value, access_token: Option<String>) -> Option<Self> {
        let user_id = user.get("id")?.as_str()?.to_string();
        let meta = user.get("user_metadata");
        let display_name = meta
            .and_then(|m| m.get("display_name"))
            .or_else(|| meta.and_then(|m| m.get("full_name")))
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| {
                user.get("email")
                    .and_then(|e| e.as_str())
                    .and_then(|e| e.split('@').next())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| user_id.clone());

        Some(Self {
            user_id,
            display_name,
            access_token,
        })
    }

    /// Same identity for presence purposes: tokens may rotate.
    pub fn same_user(&self, other: &Identity) -> bool {
        self.user_id == other.user_id
    }
}
