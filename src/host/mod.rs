//! Host collaborator interfaces
//!
//! The worker never talks to the network, the cache store, or the
//! controlled pages directly. Everything goes through the traits below so a
//! host (the CLI harness, or a test) can substitute its own implementation:
//!
//! | Trait | Host capability |
//! |-------|-----------------|
//! | [`Fetcher`] | Low-level network fetch |
//! | [`CacheStorage`] | Persistent cache store, opened by name |
//! | [`CacheHandle`] | One open cache: get/put by key |
//! | [`ClientControl`] | Skip-waiting and client claiming |

pub mod clients;
pub mod disk;
pub mod memory;
pub mod network;

pub use clients::LoggingClients;
pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;
pub use network::UreqFetcher;

use crate::error::PrefetchResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Canonical method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request observed by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Create a GET request
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Create a request with no headers
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
        }
    }
}

/// A response record, as served to pages and stored in caches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL the response was produced for
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Response headers in received order
    pub headers: Vec<(String, String)>,

    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// Create a response with no headers
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// Low-level network fetch capability
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request against the network
    ///
    /// Non-2xx statuses are returned as `Ok`; only transport failures are
    /// errors.
    async fn fetch(&self, request: &Request) -> PrefetchResult<Response>;
}

/// Persistent cache store
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open (or create) the named cache
    async fn open(&self, name: &str) -> PrefetchResult<Arc<dyn CacheHandle>>;

    /// Remove the named cache and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> PrefetchResult<bool>;
}

/// An open cache
///
/// A handle stays usable for as long as it is held, even after the worker
/// has released its own reference.
#[async_trait]
pub trait CacheHandle: Send + Sync {
    /// Look up a stored response
    async fn get(&self, key: &str) -> PrefetchResult<Option<Response>>;

    /// Store a response, replacing any previous entry
    async fn put(&self, key: &str, response: &Response) -> PrefetchResult<()>;

    /// Remove an entry. Returns whether it existed.
    async fn remove(&self, key: &str) -> PrefetchResult<bool>;

    /// All stored keys
    async fn keys(&self) -> PrefetchResult<Vec<String>>;
}

/// Control over the pages a worker serves
#[async_trait]
pub trait ClientControl: Send + Sync {
    /// Activate this worker version without waiting for old clients to close
    async fn skip_waiting(&self) -> PrefetchResult<()>;

    /// Take control of all existing clients
    async fn claim(&self) -> PrefetchResult<()>;
}
