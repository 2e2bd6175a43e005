//! Crate-wide error type.
//!
//! Upstream feed failures are not represented here. They have their own
//! taxonomy in [`crate::upstream::FeedError`] because the poll cycle recovers
//! from every one of them locally.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration, opening storage or talking to
/// the identity endpoint.
#[derive(Error, Debug)]
pub enum Error {
    /// The contact database could not be opened or created.
    #[error("cannot open contact database {path}: {source}")]
    DatabaseOpen {
        /// Database file.
        path: PathBuf,
        /// Cause.
        #[source]
        source: rusqlite::Error,
    },

    /// A statement against the contact database failed.
    #[error("contact database: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// The schema could not be brought to the current version.
    #[error("schema migration failed: {message}")]
    DatabaseMigration {
        /// What went wrong.
        message: String,
    },

    /// The flat JSON contact file could not be read or written.
    #[error("contact file {path}: {source}")]
    StoreFile {
        /// Contact file.
        path: PathBuf,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    /// A configuration source could not be read or parsed.
    #[error("cannot load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Which value and why.
        message: String,
    },

    /// The identity endpoint refused or garbled the token grant.
    #[error("token request failed: {0}")]
    TokenRequest(String),

    /// An HTTP client could not be built or a request failed outright.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A directory for data or cache files could not be created.
    #[error("cannot create directory {path}: {source}")]
    DirectoryCreate {
        /// Directory.
        path: PathBuf,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A condition that should not happen.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Shorthand for [`Error::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Shorthand for [`Error::TokenRequest`].
    #[must_use]
    pub fn token_request(message: impl Into<String>) -> Self {
        Self::TokenRequest(message.into())
    }

    /// True for errors fixed by editing configuration rather than retrying.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::ConfigLoad(_) | Self::ConfigValidation { .. })
    }
}
