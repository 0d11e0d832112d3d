//! REST adapter for the hosted backend: PostgREST tables and the auth user
//! endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use tracing::debug;

use commune_common::PlatformError;

use super::{AuthSession, RecordStore};
use crate::identity::Identity;
use crate::record::PRIMARY_KEY;

/// REST client configuration.
#[derive(Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `https://abcd.supabase.co`.
    pub base_url: String,
    /// Publishable anon key.
    pub api_key: String,
    /// User JWT; falls back to the anon key for `Authorization`.
    pub access_token: Option<String>,
    /// Conflict target for upserts.
    pub on_conflict: String,
    pub timeout: Duration,
}

impl fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("on_conflict", &self.on_conflict)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
            on_conflict: PRIMARY_KEY.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Client for `/rest/v1` and `/auth/v1`.
pub struct SupabaseRest {
    config: RestConfig,
    http: reqwest::Client,
}

impl SupabaseRest {
    pub fn new(config: RestConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn bearer(&self) -> &str {
        self.config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key)
    }

    /// `apikey` + `Authorization` headers shared by every request.
    pub(crate) fn auth_headers(&self) -> Result<HeaderMap, PlatformError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|_| PlatformError::Auth("api key is not a valid header value".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.bearer()))
            .map_err(|_| PlatformError::Auth("token is not a valid header value".into()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    pub(crate) fn build_upsert(
        &self,
        table: &str,
        record: &serde_json::Value,
    ) -> Result<reqwest::Request, PlatformError> {
        self.http
            .post(self.table_url(table))
            .headers(self.auth_headers()?)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", self.config.on_conflict.as_str())])
            .json(record)
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))
    }

    pub(crate) fn build_select(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<reqwest::Request, PlatformError> {
        let mut query: Vec<(String, String)> = vec![("select".into(), "*".into())];
        query.extend(
            filters
                .iter()
                .map(|(col, val)| (col.to_string(), format!("eq.{val}"))),
        );
        self.http
            .get(self.table_url(table))
            .headers(self.auth_headers()?)
            .query(&query)
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, PlatformError> {
        let method = request.method().clone();
        let path = request.url().path().to_string();
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        debug!(%method, %path, status = response.status().as_u16(), "platform request");
        Ok(response)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RecordStore for SupabaseRest {
    async fn upsert(&self, table: &str, record: serde_json::Value) -> Result<(), PlatformError> {
        let request = self.build_upsert(table, &record)?;
        error_for_status(self.execute(request).await?).await?;
        Ok(())
    }

    async fn select(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<serde_json::Value>, PlatformError> {
        let request = self.build_select(table, filters)?;
        let response = error_for_status(self.execute(request).await?).await?;
        response
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AuthSession for SupabaseRest {
    async fn current_user(&self) -> Result<Option<Identity>, PlatformError> {
        // Without a user token there is no session to look up.
        let Some(token) = self.config.access_token.clone() else {
            return Ok(None);
        };

        let request = self
            .http
            .get(format!("{}/auth/v1/user", self.config.base_url))
            .headers(self.auth_headers()?)
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        let response = self.execute(request).await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        let user: serde_json::Value = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;

        Identity::from_auth_user(&user, Some(token))
            .map(Some)
            .ok_or_else(|| PlatformError::Decode("auth user without id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(token: Option<&str>) -> SupabaseRest {
        let mut config = RestConfig::new("https://abcd.supabase.co/", "anon-key");
        config.access_token = token.map(str::to_string);
        SupabaseRest::new(config).unwrap()
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(client(None).config().base_url, "https://abcd.supabase.co");
    }

    #[test]
    fn bearer_falls_back_to_anon_key() {
        let headers = client(None).auth_headers().unwrap();
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers[AUTHORIZATION], "Bearer anon-key");

        let headers = client(Some("user-jwt")).auth_headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer user-jwt");
    }

    #[test]
    fn upsert_request_shape() {
        let record = serde_json::json!({ "user_id": "u1", "online": true });
        let req = client(None).build_upsert("user_status", &record).unwrap();

        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().path(), "/rest/v1/user_status");
        assert_eq!(req.url().query(), Some("on_conflict=user_id"));
        assert_eq!(
            req.headers()["Prefer"],
            "resolution=merge-duplicates,return=minimal"
        );
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        let sent: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(sent, record);
    }

    #[test]
    fn select_request_encodes_equality_filters() {
        let req = client(None)
            .build_select("user_status", &[("user_id", "a b")])
            .unwrap();
        assert_eq!(req.method(), reqwest::Method::GET);
        let pairs: Vec<(String, String)> = req
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "*".to_string()),
                ("user_id".to_string(), "eq.a b".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_key_is_auth_error() {
        let config = RestConfig::new("https://abcd.supabase.co", "bad\nkey");
        let rest = SupabaseRest::new(config).unwrap();
        assert!(matches!(rest.auth_headers(), Err(PlatformError::Auth(_))));
    }

    #[tokio::test]
    async fn current_user_without_token_is_none() {
        assert!(client(None).current_user().await.unwrap().is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let dbg = format!("{:?}", client(Some("user-jwt")).config());
        assert!(!dbg.contains("anon-key"));
        assert!(!dbg.contains("user-jwt"));
    }
}
