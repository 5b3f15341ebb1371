//! Per-activation worker state
//!
//! One `WorkerState` is built when the worker activates and shared by every
//! event handler until the host recycles the process. Interior locks are
//! never held across an await point.
//!
//! The cache store outlives any one activation, so every fresh open of the
//! cache loads the keys it already holds into the bundle registry.

use crate::config::schema::WorkerConfig;
use crate::error::{PrefetchError, PrefetchResult};
use crate::host::{CacheHandle, CacheStorage, Fetcher};
use crate::worker::accessor::CacheAccessor;
use crate::worker::drain::MessageQueue;
use crate::worker::registry::BundleRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use url::Url;

/// Shared state for one worker activation
pub struct WorkerState {
    origin: Url,
    fetcher: Arc<dyn Fetcher>,
    cache: CacheAccessor,
    registry: Mutex<BundleRegistry>,
    /// Open count whose stored keys are already in the registry
    loaded_open: AtomicU64,
    queue: MessageQueue,
}

impl WorkerState {
    /// Create state with an empty registry. Performs no I/O.
    pub fn new(fetcher: Arc<dyn Fetcher>, origin: Url, cache: CacheAccessor) -> Self {
        Self {
            origin,
            fetcher,
            cache,
            registry: Mutex::new(BundleRegistry::new()),
            loaded_open: AtomicU64::new(0),
            queue: MessageQueue::new(),
        }
    }

    /// Create state from worker settings, registering the configured bases
    pub fn from_config(
        config: &WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn CacheStorage>,
    ) -> PrefetchResult<Self> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| PrefetchError::invalid_url(config.origin.as_str(), e))?;
        let cache = CacheAccessor::new(storage, config.cache_name.clone(), config.idle_release());
        let state = Self::new(fetcher, origin, cache);
        for base in &config.bases {
            state.add_base(base)?;
        }
        Ok(state)
    }

    /// Base URL of the serving context
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Network capability
    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// Debounced cache accessor
    pub fn cache(&self) -> &CacheAccessor {
        &self.cache
    }

    /// Get the open cache, restarting its idle window
    ///
    /// The first acquire after each open also registers the bundles the
    /// store already holds.
    pub async fn cache_acquire(&self) -> PrefetchResult<Arc<dyn CacheHandle>> {
        let cache = self.cache.acquire().await?;
        let opens = self.cache.stats().opens();
        if self.loaded_open.swap(opens, Ordering::SeqCst) != opens {
            self.load_stored(cache.as_ref()).await;
        }
        Ok(cache)
    }

    async fn load_stored(&self, cache: &dyn CacheHandle) {
        let keys = match cache.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Could not list stored bundles: {}", e);
                return;
            }
        };

        let mut registry = self.registry();
        let before = registry.known_count();
        for key in &keys {
            match Url::parse(key) {
                Ok(url) => registry.remember(&url),
                Err(e) => debug!("Ignoring stored key {}: {}", key, e),
            }
        }
        debug!(
            "Loaded {} stored bundle(s) from {}",
            registry.known_count() - before,
            self.cache.cache_name()
        );
    }

    /// Pending message queue
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Resolve a possibly relative URL against the origin
    pub fn resolve_url(&self, url: &str) -> PrefetchResult<Url> {
        self.origin
            .join(url)
            .map_err(|e| PrefetchError::invalid_url(url, e))
    }

    /// Whether requests for `url` are intercepted
    pub fn recognizes(&self, url: &Url) -> bool {
        self.registry().recognizes(url)
    }

    /// Remember a stored bundle URL
    pub fn remember(&self, url: &Url) {
        self.registry().remember(url);
    }

    /// Number of exact bundle URLs known to be stored
    pub fn known_bundles(&self) -> usize {
        self.registry().known_count()
    }

    /// Registered bundle base directories
    pub fn bundle_bases(&self) -> Vec<Url> {
        self.registry().bases().to_vec()
    }

    /// Register a bundle base directory
    pub fn add_base(&self, base: &str) -> PrefetchResult<Url> {
        let resolved = self.registry().add_base(&self.origin, base)?;
        debug!("Registered bundle base {}", resolved);
        Ok(resolved)
    }

    fn registry(&self) -> MutexGuard<'_, BundleRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
