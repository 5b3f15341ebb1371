//! Configuration schema for the prefetch worker
//!
//! Configuration is stored at `~/.config/prefetch-worker/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Worker behavior
    pub worker: WorkerConfig,

    /// Network fetcher settings
    pub network: NetworkConfig,

    /// Persistent cache store settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Base URL of the serving context
    pub origin: String,

    /// Name of the cache opened in the store
    pub cache_name: String,

    /// Idle window before the cache handle is released
    pub idle_release_ms: u64,

    /// Base paths whose `.js` resources are intercepted
    pub bases: Vec<String>,
}

impl WorkerConfig {
    /// Idle window as a `Duration`
    pub fn idle_release(&self) -> Duration {
        Duration::from_millis(self.idle_release_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:5173/".to_string(),
            cache_name: "bundles".to_string(),
            idle_release_ms: 5000,
            bases: vec!["/build/".to_string()],
        }
    }
}

/// Network fetcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Overall request timeout in seconds
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("prefetch-worker/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Persistent cache store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding cache stores (defaults to the state directory)
    pub dir: Option<PathBuf>,
}
