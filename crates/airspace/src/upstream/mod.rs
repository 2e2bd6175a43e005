//! Upstream flight-state feed and its credential.
//!
//! This module defines the seams the poll cycle talks to: a
//! [`CredentialSource`] handing out bearer tokens and a [`StateFeed`] returning
//! one snapshot of state vectors. The production implementations are the
//! [`TokenBroker`] and the [`OpenSkyClient`].

pub mod opensky;
pub mod token;

use thiserror::Error;

use crate::aircraft::StateVector;

pub use opensky::OpenSkyClient;
pub use token::{Credentials, FileTokenCache, TokenBroker};

/// Errors returned by a [`StateFeed`].
///
/// Every variant is recovered from inside the poll cycle; none of them
/// reaches a client.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed rejected the bearer token (HTTP 401).
    #[error("upstream rejected the access token")]
    Unauthorized,

    /// The feed is throttling requests (HTTP 429).
    #[error("upstream rate limit reached")]
    RateLimited,

    /// Any other non-success status.
    #[error("upstream returned HTTP {0}")]
    Status(u16),

    /// The request could not be completed (connect error, timeout).
    #[error("upstream request failed: {0}")]
    Transport(String),

    /// The response body was not a state vector snapshot.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

/// Result type for feed operations.
pub type FeedResult<T> = std::result::Result<T, FeedError>;

impl FeedError {
    /// Map a non-success HTTP status to an error.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            429 => Self::RateLimited,
            other => Self::Status(other),
        }
    }

    /// Whether one retry with a freshly issued token may succeed.
    #[must_use]
    pub fn is_retriable_with_fresh_token(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Whether the feed is throttling us.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Source of bearer tokens for the feed.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// Get a token, requesting a new one when none is cached or
    /// `force_refresh` is set.
    ///
    /// Returns `None` when no token can be obtained. Implementations never
    /// retry internally.
    async fn get_token(&self, force_refresh: bool) -> Option<String>;

    /// Whether client credentials are configured at all.
    fn has_credentials(&self) -> bool;

    /// Whether a token is cached and not yet expired.
    async fn has_cached_token(&self) -> bool;
}

/// One snapshot of the upstream feed.
#[async_trait::async_trait]
pub trait StateFeed: Send + Sync {
    /// Fetch all current state vectors.
    ///
    /// A response without states yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] describing why no snapshot was obtained.
    async fn fetch_states(&self, token: &str) -> FeedResult<Vec<StateVector>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(FeedError::from_status(401), FeedError::Unauthorized));
        assert!(matches!(FeedError::from_status(429), FeedError::RateLimited));
        assert!(matches!(FeedError::from_status(503), FeedError::Status(503)));
    }

    #[test]
    fn test_only_unauthorized_is_retried() {
        assert!(FeedError::Unauthorized.is_retriable_with_fresh_token());
        assert!(!FeedError::RateLimited.is_retriable_with_fresh_token());
        assert!(!FeedError::Status(500).is_retriable_with_fresh_token());
        assert!(!FeedError::Transport("timeout".to_string()).is_retriable_with_fresh_token());
    }

    #[test]
    fn test_rate_limited() {
        assert!(FeedError::RateLimited.is_rate_limited());
        assert!(!FeedError::Unauthorized.is_rate_limited());
    }

    #[test]
    fn test_display() {
        assert_eq!(FeedError::Status(502).to_string(), "upstream returned HTTP 502");
        assert!(FeedError::Malformed("states is a string".to_string())
            .to_string()
            .contains("states is a string"));
    }
}
