//! Error types for the webchat-offline library.

use thiserror::Error;

/// Errors that can occur in the transcript store or the asset cache.
#[derive(Error, Debug)]
pub enum Error {
    /// The durable database could not be opened (disabled, unreadable or corrupted).
    ///
    /// Distinct from a load that simply finds no record.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A transaction failed partway and was rolled back.
    #[error("transaction aborted: {0}")]
    Transaction(String),

    /// A cache storage operation failed.
    #[error("cache storage error: {0}")]
    Cache(String),

    /// Populating a new cache generation failed.
    #[error("install failed for {path}: {reason}")]
    Install {
        /// Manifest path that could not be fetched.
        path: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// A cache generation was driven through an invalid lifecycle step.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Network fetch failed and nothing cached could stand in.
    #[error("network error: {0}")]
    Network(String),

    /// A request or origin URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration file could not be parsed or written.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl Error {
    /// Returns true if this error means storage could not be opened at all.
    #[must_use]
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

/// A specialized `Result` type for webchat-offline operations.
pub type Result<T> = std::result::Result<T, Error>;
