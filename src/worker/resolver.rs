//! Direct-fetch resolver
//!
//! Decides, per intercepted request, between serving from the cache,
//! fetching and storing, or leaving the request to the network.

use crate::error::PrefetchResult;
use crate::host::{CacheHandle, Method, Request, Response};
use crate::worker::state::WorkerState;
use tracing::{debug, trace, warn};

/// Outcome of resolving one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from the cache without network I/O
    Hit(Response),
    /// Cache miss, fetched from the network
    Fetched(Response),
    /// Not intercepted; the host should let the request through
    PassThrough,
}

impl Resolution {
    /// Borrow the response to serve, if any
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Hit(response) | Self::Fetched(response) => Some(response),
            Self::PassThrough => None,
        }
    }

    /// Short label for output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Fetched(_) => "fetched",
            Self::PassThrough => "pass",
        }
    }
}

/// Resolve an intercepted request
///
/// Only GETs for recognized bundle URLs are intercepted; everything else
/// passes through without touching the cache. A cache read failure is
/// treated as a miss. Transport failures on a miss are returned as errors
/// and nothing is stored.
pub async fn resolve(state: &WorkerState, request: &Request) -> PrefetchResult<Resolution> {
    if request.method != Method::Get {
        trace!("Passing through {} {}", request.method, request.url);
        return Ok(Resolution::PassThrough);
    }
    if !state.recognizes(&request.url) {
        trace!("Passing through unrecognized {}", request.url);
        return Ok(Resolution::PassThrough);
    }

    let cache = state.cache_acquire().await?;
    let key = request.url.as_str();

    match cache.get(key).await {
        Ok(Some(response)) => {
            debug!("Cache hit {}", key);
            return Ok(Resolution::Hit(response));
        }
        Ok(None) => debug!("Cache miss {}", key),
        Err(e) => warn!("Cache read failed for {}, fetching instead: {}", key, e),
    }

    let response = fetch_and_store(state, cache.as_ref(), request).await?;
    Ok(Resolution::Fetched(response))
}

/// Fetch from the network and store a successful response under the URL
///
/// Shared by request misses and speculative prefetches. Non-2xx responses
/// are returned but not stored; a failed store is logged and the response
/// is still returned.
pub async fn fetch_and_store(
    state: &WorkerState,
    cache: &dyn CacheHandle,
    request: &Request,
) -> PrefetchResult<Response> {
    let response = state.fetcher().fetch(request).await?;
    let key = request.url.as_str();

    if !response.is_success() {
        debug!("Not caching {} (status {})", key, response.status);
        return Ok(response);
    }

    match cache.put(key, &response).await {
        Ok(()) => {
            state.remember(&request.url);
            debug!("Cached {}", key);
        }
        Err(e) => warn!("Failed to cache {}: {}", key, e),
    }
    Ok(response)
}
