//! Configuration management for the airspace monitor.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults. The
//! resolved [`Config`] is turned into plain parameters ([`GeoFilter`],
//! [`RetentionPolicy`], [`PollSettings`]) once at startup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::aircraft::Language;
use crate::error::{Error, Result};
use crate::geo::{Center, GeoFilter};
use crate::poller::PollSettings;
use crate::storage::{BackendKind, RetentionPolicy};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data and config directory name.
const DATA_DIR_NAME: &str = "airspace-monitor";

/// Default flat contact file name.
const CONTACT_FILE_NAME: &str = "first_contacts.json";

/// Default contact database file name.
const DATABASE_FILE_NAME: &str = "contacts.db";

/// Default token cache file name.
const TOKEN_CACHE_FILE_NAME: &str = "token.json";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. `OPENSKY_USERNAME` / `OPENSKY_PASSWORD` (client credentials)
/// 2. Environment variables (prefixed with `AIRSPACE_`, nested with `__`)
/// 3. TOML config file at `~/.config/airspace-monitor/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Monitored area.
    pub monitoring: MonitoringConfig,
    /// Display list shaping.
    pub display: DisplayConfig,
    /// Poll cadence and retention.
    pub data: DataConfig,
    /// Contact persistence.
    pub storage: StorageConfig,
    /// Upstream feed and identity endpoint.
    pub upstream: UpstreamConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// Callsign prefix to airline name.
    pub airlines: BTreeMap<String, String>,
    /// Optional JSON object file merged over `airlines`.
    pub airlines_path: Option<PathBuf>,
}

/// Monitored area configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Center latitude in decimal degrees.
    pub lat: f64,
    /// Center longitude in decimal degrees.
    pub lon: f64,
    /// Radius around the center in kilometers.
    pub radius_km: f64,
    /// Aircraft category codes shown. Empty admits every category.
    pub category_allowlist: Vec<u8>,
}

/// Display configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Title reported to display clients.
    pub title: String,
    /// Maximum number of entries in the display list.
    pub max_display_count: usize,
    /// Language for status and compass labels.
    pub language: Language,
}

/// Poll cadence and retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Minimum time between upstream requests.
    pub rate_limit_delay_seconds: u64,
    /// How long a polled display list is served from cache.
    pub cache_timeout_seconds: u64,
    /// How long Past records are retained after they were last seen.
    /// Set to 0 to disable the time cap.
    pub past_retention_minutes: u32,
    /// Maximum number of Past records retained.
    pub max_past_records: usize,
}

/// Contact persistence configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend holds the contact table.
    pub backend: BackendKind,
    /// Path to the contact file or database.
    /// Defaults to `first_contacts.json` or `contacts.db` in the data dir.
    pub path: Option<PathBuf>,
}

/// Upstream feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the state vector API.
    pub base_url: String,
    /// Token endpoint for the client-credentials grant.
    pub auth_url: String,
    /// Timeout for token and feed requests.
    pub timeout_seconds: u64,
    /// User agent sent with feed requests.
    pub user_agent: String,
    /// Client id for the token endpoint.
    pub client_id: Option<String>,
    /// Client secret for the token endpoint.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    /// File the access token is cached in across restarts.
    pub token_cache_path: Option<PathBuf>,
    /// Request the extended response carrying the category column.
    pub extended: bool,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server listens on.
    pub bind: String,
    /// Shared secret required by the poll endpoint, if set.
    #[serde(skip_serializing)]
    pub poll_secret: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            lat: 48.3705,
            lon: 7.8819,
            radius_km: 10.0,
            category_allowlist: vec![3, 4, 5, 6],
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "Luftraum Friesenheim (Baden)".to_string(),
            max_display_count: 7,
            language: Language::De,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay_seconds: 6,
            cache_timeout_seconds: 60,
            past_retention_minutes: 10,
            max_past_records: 7,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://opensky-network.org/api".to_string(),
            auth_url: "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token".to_string(),
            timeout_seconds: 60, // the feed is slow
            user_agent: format!("AirspaceMonitor/{}", env!("CARGO_PKG_VERSION")),
            client_id: None,
            client_secret: None,
            token_cache_path: None,
            extended: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            poll_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Self::figment(config_path).extract::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// The merged provider chain, exposed for inspection.
    #[must_use]
    pub fn figment(config_path: Option<PathBuf>) -> Figment {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("AIRSPACE_").split("__"))
            .merge(
                Env::raw()
                    .only(&["OPENSKY_USERNAME", "OPENSKY_PASSWORD"])
                    .map(|key| {
                        if key.as_str().eq_ignore_ascii_case("OPENSKY_USERNAME") {
                            "upstream.client_id".into()
                        } else {
                            "upstream.client_secret".into()
                        }
                    }),
            )
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let monitoring = &self.monitoring;
        if !monitoring.radius_km.is_finite() || monitoring.radius_km <= 0.0 {
            return Err(Error::ConfigValidation {
                message: format!(
                    "radius_km must be a positive number, got {}",
                    monitoring.radius_km
                ),
            });
        }

        if !(-90.0..=90.0).contains(&monitoring.lat) {
            return Err(Error::ConfigValidation {
                message: format!("lat must be within [-90, 90], got {}", monitoring.lat),
            });
        }

        if !(-180.0..=180.0).contains(&monitoring.lon) {
            return Err(Error::ConfigValidation {
                message: format!("lon must be within [-180, 180], got {}", monitoring.lon),
            });
        }

        if self.display.max_display_count == 0 {
            return Err(Error::ConfigValidation {
                message: "max_display_count must be greater than 0".to_string(),
            });
        }

        if self.upstream.timeout_seconds == 0 {
            return Err(Error::ConfigValidation {
                message: "timeout_seconds must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the contact store path, resolving the default for the backend.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            let name = match self.storage.backend {
                BackendKind::File => CONTACT_FILE_NAME,
                BackendKind::Sqlite => DATABASE_FILE_NAME,
            };
            Self::default_data_dir().join(name)
        })
    }

    /// Get the token cache path, resolving the default.
    #[must_use]
    pub fn token_cache_path(&self) -> PathBuf {
        self.upstream
            .token_cache_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(TOKEN_CACHE_FILE_NAME))
    }

    /// Whether both client credentials are set.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.upstream.client_id) && present(&self.upstream.client_secret)
    }

    /// Build the eligibility filter for the monitored area.
    #[must_use]
    pub fn geo_filter(&self) -> GeoFilter {
        GeoFilter::new(
            Center {
                lat: self.monitoring.lat,
                lon: self.monitoring.lon,
            },
            self.monitoring.radius_km,
            self.monitoring.category_allowlist.iter().copied(),
        )
    }

    /// Build the retention policy for Past records.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        let minutes = self.data.past_retention_minutes;
        RetentionPolicy {
            max_past: self.data.max_past_records,
            max_age: (minutes > 0).then(|| chrono::Duration::minutes(i64::from(minutes))),
        }
    }

    /// Build the poll cadence settings.
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            min_interval: Duration::from_secs(self.data.rate_limit_delay_seconds),
            cache_ttl: Duration::from_secs(self.data.cache_timeout_seconds),
        }
    }

    /// Get the upstream request timeout as a Duration.
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_seconds)
    }
}
