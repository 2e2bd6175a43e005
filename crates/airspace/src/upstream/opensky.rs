//! OpenSky Network state vector client.

use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde_json::Value;
use tracing::debug;

use super::{FeedError, FeedResult, StateFeed};
use crate::aircraft::StateVector;
use crate::config::Config;
use crate::error::Result;

/// Client for the `/states/all` endpoint.
#[derive(Debug, Clone)]
pub struct OpenSkyClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    extended: bool,
}

impl OpenSkyClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
        extended: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
            extended,
        })
    }

    /// Create a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.upstream.base_url,
            &config.upstream.user_agent,
            config.upstream_timeout(),
            config.upstream.extended,
        )
    }

    fn states_url(&self) -> String {
        format!("{}/states/all", self.base_url)
    }
}

/// Extract state vectors from a `/states/all` response body.
///
/// A `null` or absent `states` field is an empty snapshot. Rows that are
/// not arrays are skipped.
///
/// # Errors
///
/// Returns [`FeedError::Malformed`] if the body is not an object or
/// `states` is neither `null` nor an array.
pub fn parse_snapshot(body: &Value) -> FeedResult<Vec<StateVector>> {
    let object = body
        .as_object()
        .ok_or_else(|| FeedError::Malformed("response is not an object".to_string()))?;

    match object.get("states") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(rows)) => Ok(rows.iter().filter_map(StateVector::from_row).collect()),
        Some(_) => Err(FeedError::Malformed("states is not an array".to_string())),
    }
}

#[async_trait::async_trait]
impl StateFeed for OpenSkyClient {
    async fn fetch_states(&self, token: &str) -> FeedResult<Vec<StateVector>> {
        let mut request = self
            .http
            .get(self.states_url())
            .bearer_auth(token)
            .header(USER_AGENT, &self.user_agent);
        if self.extended {
            request = request.query(&[("extended", "1")]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::from_status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))?;
        let states = parse_snapshot(&body)?;

        debug!(count = states.len(), "State vectors fetched");
        Ok(states)
    }
}
