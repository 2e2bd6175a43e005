//! Access token broker for the upstream feed.
//!
//! Tokens come from an OAuth client-credentials grant. A granted token is
//! cached in memory, and optionally in a JSON file so a restarted process
//! does not request a new one. The cache lifetime is cut short of the
//! reported expiry so the token is renewed before the feed starts rejecting
//! it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::CredentialSource;
use crate::config::Config;
use crate::error::{Error, Result};

/// Shortest lifetime a cached token is given.
pub const MIN_TOKEN_TTL_SECS: u64 = 300;

/// How long before the reported expiry a token is dropped.
pub const EXPIRY_MARGIN_SECS: u64 = 60;

/// Expiry assumed when the grant does not report one.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Cache lifetime for a token reported to expire in `expires_in` seconds.
#[must_use]
pub fn token_ttl(expires_in: u64) -> Duration {
    Duration::from_secs(
        expires_in
            .saturating_sub(EXPIRY_MARGIN_SECS)
            .max(MIN_TOKEN_TTL_SECS),
    )
}

/// Client id and secret for the identity endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl Credentials {
    /// Credentials from optional configuration values. Empty values count
    /// as absent.
    #[must_use]
    pub fn from_parts(client_id: Option<&str>, client_secret: Option<&str>) -> Option<Self> {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some(Self {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// A granted token and the instant it stops being used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    /// The bearer token.
    pub token: String,
    /// When the cache entry expires.
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Whether the token may still be handed out at `now`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Token cache persisted as a small JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenCache {
    path: PathBuf,
}

impl FileTokenCache {
    /// Create a cache backed by the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path to the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a still-valid token, if one is stored.
    ///
    /// A missing, unreadable or expired entry yields `None`.
    #[must_use]
    pub fn load(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        let body = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CachedToken>(&body) {
            Ok(token) if token.is_valid(now) => Some(token),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %self.path.display(), "Ignoring unreadable token cache: {e}");
                None
            }
        }
    }

    /// Store a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn store(&self, token: &CachedToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string(token)?)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: Option<String>,
    expires_in: Option<Value>,
}

impl GrantResponse {
    /// `expires_in` is a number on most servers and a string on some.
    fn expires_in(&self) -> u64 {
        match &self.expires_in {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
    }
}

/// Acquires, caches and refreshes the feed's bearer token.
#[derive(Debug)]
pub struct TokenBroker {
    http: reqwest::Client,
    auth_url: String,
    credentials: Option<Credentials>,
    cache: Mutex<Option<CachedToken>>,
    durable: Option<FileTokenCache>,
}

impl TokenBroker {
    /// Create a broker for the given identity endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        auth_url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            auth_url: auth_url.into(),
            credentials,
            cache: Mutex::new(None),
            durable: None,
        })
    }

    /// Create a broker from the loaded configuration, with the durable
    /// cache enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = Credentials::from_parts(
            config.upstream.client_id.as_deref(),
            config.upstream.client_secret.as_deref(),
        );
        Ok(Self::new(&config.upstream.auth_url, credentials, config.upstream_timeout())?
            .with_durable_cache(FileTokenCache::new(config.token_cache_path())))
    }

    /// Also cache tokens in a file.
    #[must_use]
    pub fn with_durable_cache(mut self, cache: FileTokenCache) -> Self {
        self.durable = Some(cache);
        self
    }

    async fn request_token(&self, credentials: &Credentials) -> Result<CachedToken> {
        let response = self
            .http
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::token_request(format!("identity endpoint returned {status}")));
        }

        let grant: GrantResponse = response.json().await?;
        let expires_in = grant.expires_in();
        let token = grant
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::token_request("no access_token in response"))?;

        let ttl = chrono::Duration::from_std(token_ttl(expires_in))
            .map_err(|e| Error::internal(format!("token lifetime out of range: {e}")))?;
        Ok(CachedToken {
            token,
            expires_at: Utc::now() + ttl,
        })
    }
}

#[async_trait::async_trait]
impl CredentialSource for TokenBroker {
    async fn get_token(&self, force_refresh: bool) -> Option<String> {
        let Some(credentials) = &self.credentials else {
            warn!("Upstream client credentials missing, no token available");
            return None;
        };

        let mut cache = self.cache.lock().await;
        let now = Utc::now();

        if force_refresh {
            *cache = None;
        } else {
            if let Some(cached) = cache.as_ref().filter(|t| t.is_valid(now)) {
                return Some(cached.token.clone());
            }
            if let Some(stored) = self.durable.as_ref().and_then(|d| d.load(now)) {
                debug!("Using access token from durable cache");
                let token = stored.token.clone();
                *cache = Some(stored);
                return Some(token);
            }
        }

        match self.request_token(credentials).await {
            Ok(granted) => {
                info!(expires_at = %granted.expires_at, "Access token granted");
                if let Some(durable) = &self.durable {
                    if let Err(e) = durable.store(&granted) {
                        warn!("Failed to write token cache: {e}");
                    }
                }
                let token = granted.token.clone();
                *cache = Some(granted);
                Some(token)
            }
            Err(e) => {
                warn!("Failed to obtain access token: {e}");
                None
            }
        }
    }

    fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn has_cached_token(&self) -> bool {
        self.cache
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| t.is_valid(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn credentials() -> Option<Credentials> {
        Credentials::from_parts(Some("client"), Some("secret"))
    }

    fn broker(url: &str) -> TokenBroker {
        TokenBroker::new(format!("{url}/token"), credentials(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_token_ttl() {
        assert_eq!(token_ttl(3600), Duration::from_secs(3540));
        assert_eq!(token_ttl(300), Duration::from_secs(300));
        assert_eq!(token_ttl(30), Duration::from_secs(300));
        assert_eq!(token_ttl(DEFAULT_EXPIRES_IN_SECS), Duration::from_secs(3540));
    }

    #[test]
    fn test_credentials_from_parts() {
        assert!(Credentials::from_parts(Some("id"), Some("secret")).is_some());
        assert!(Credentials::from_parts(Some("id"), None).is_none());
        assert!(Credentials::from_parts(Some(""), Some("secret")).is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let debug = format!("{:?}", credentials().unwrap());
        assert!(debug.contains("client"));
        assert!(!debug.contains("secret\""));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_grant_expires_in_formats() {
        let number: GrantResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":1800}"#).unwrap();
        assert_eq!(number.expires_in(), 1800);
        let string: GrantResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":"900"}"#).unwrap();
        assert_eq!(string.expires_in(), 900);
        let absent: GrantResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(absent.expires_in(), DEFAULT_EXPIRES_IN_SECS);
    }

    #[test]
    fn test_file_cache_round_trip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileTokenCache::new(dir.path().join("nested").join("token.json"));
        let now = Utc::now();

        assert!(cache.load(now).is_none());
        let token = CachedToken {
            token: "abc".to_string(),
            expires_at: now + chrono::Duration::minutes(5),
        };
        cache.store(&token).unwrap();
        assert_eq!(cache.load(now), Some(token));
        assert!(cache.load(now + chrono::Duration::minutes(6)).is_none());

        let body = std::fs::read_to_string(cache.path()).unwrap();
        assert!(body.contains("expiresAt"));
    }

    #[tokio::test]
    async fn test_missing_credentials_returns_none_without_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/token").expect(0).create_async().await;

        let broker = TokenBroker::new(
            format!("{}/token", server.url()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!broker.has_credentials());
        assert!(broker.get_token(false).await.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_is_requested_once_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-1","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let broker = broker(&server.url());
        assert_eq!(broker.get_token(false).await.as_deref(), Some("tok-1"));
        assert_eq!(broker.get_token(false).await.as_deref(), Some("tok-1"));
        assert!(broker.has_cached_token().await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_force_refresh_requests_new_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expires_in":"3600"}"#)
            .expect(2)
            .create_async()
            .await;

        let broker = broker(&server.url());
        assert!(broker.get_token(false).await.is_some());
        assert!(broker.get_token(true).await.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_failure_returns_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(503)
            .create_async()
            .await;

        let broker = broker(&server.url());
        assert!(broker.get_token(false).await.is_none());
        assert!(!broker.has_cached_token().await);
    }

    #[tokio::test]
    async fn test_missing_access_token_returns_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"expires_in":3600}"#)
            .create_async()
            .await;

        assert!(broker(&server.url()).get_token(false).await.is_none());
    }

    #[tokio::test]
    async fn test_durable_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"durable","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let first = broker(&server.url()).with_durable_cache(FileTokenCache::new(&path));
        assert_eq!(first.get_token(false).await.as_deref(), Some("durable"));

        let restarted = broker(&server.url()).with_durable_cache(FileTokenCache::new(&path));
        assert_eq!(restarted.get_token(false).await.as_deref(), Some("durable"));
        mock.assert_async().await;
    }
}
