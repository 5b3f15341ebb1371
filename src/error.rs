//! Error types for the prefetch worker
//!
//! All modules use `PrefetchResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for prefetch worker operations
pub type PrefetchResult<T> = Result<T, PrefetchError>;

/// All errors that can occur in the prefetch worker
#[derive(Error, Debug)]
pub enum PrefetchError {
    // Cache store errors
    #[error("Failed to open cache {name}: {reason}")]
    CacheOpen { name: String, reason: String },

    #[error("Failed to read cache entry {key}: {reason}")]
    CacheRead { key: String, reason: String },

    #[error("Failed to write cache entry {key}: {reason}")]
    CacheWrite { key: String, reason: String },

    // Network errors
    #[error("Network request failed for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    // Host errors
    #[error("Client control failed: {0}")]
    ClientControl(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl PrefetchError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a network error for a URL
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid URL error from a parse failure
    pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: source.to_string(),
        }
    }

    /// Create a cache open error
    pub fn cache_open(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::CacheOpen {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if error is retryable
    ///
    /// Nothing retries automatically; callers may try again on the next event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CacheOpen { .. } | Self::Network { .. } | Self::CacheRead { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: prefetch-worker config init --force"),
            Self::InvalidUrl { .. } => Some("Check worker.origin in your config or pass --origin"),
            Self::CacheOpen { .. } => Some("Check permissions on the cache directory"),
            _ => None,
        }
    }
}
