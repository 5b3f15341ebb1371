//! In-memory cache store
//!
//! Caches live as long as the storage value. Opening the same name twice
//! returns handles over the same entries, so a released-and-reopened handle
//! still sees earlier writes.

use crate::error::PrefetchResult;
use crate::host::{CacheHandle, CacheStorage, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory `CacheStorage`
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
    opens: AtomicUsize,
}

impl MemoryCacheStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `open` calls served so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> PrefetchResult<Arc<dyn CacheHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::default()));
        Ok(Arc::clone(cache) as Arc<dyn CacheHandle>)
    }

    async fn delete(&self, name: &str) -> PrefetchResult<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}

/// One named in-memory cache
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Response>>,
}

#[async_trait]
impl CacheHandle for MemoryCache {
    async fn get(&self, key: &str) -> PrefetchResult<Option<Response>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, response: &Response) -> PrefetchResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PrefetchResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> PrefetchResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
