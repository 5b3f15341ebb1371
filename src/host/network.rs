//! Network fetcher backed by a blocking HTTP agent
//!
//! ureq is synchronous, so each fetch runs on tokio's blocking pool. The
//! agent is configured to return non-2xx statuses as ordinary responses.

use crate::config::schema::NetworkConfig;
use crate::error::{PrefetchError, PrefetchResult};
use crate::host::{Fetcher, Method, Request, Response};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Bodies larger than this are rejected
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

/// `Fetcher` that performs real HTTP requests
#[derive(Clone)]
pub struct UreqFetcher {
    agent: ureq::Agent,
    user_agent: String,
}

impl UreqFetcher {
    /// Create a fetcher from network settings
    pub fn new(config: &NetworkConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            user_agent: config.user_agent.clone(),
        }
    }

    fn fetch_blocking(&self, request: &Request) -> PrefetchResult<Response> {
        let url = request.url.as_str();
        let mut builder = match request.method {
            Method::Get => self.agent.get(url),
            Method::Head => self.agent.head(url),
            other => {
                return Err(PrefetchError::network(
                    url,
                    format!("{} is not fetched by the worker", other),
                ))
            }
        };

        builder = builder.header("user-agent", self.user_agent.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .call()
            .map_err(|e| PrefetchError::network(url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| PrefetchError::network(url, e))?;

        debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());
        Ok(Response {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for UreqFetcher {
    async fn fetch(&self, request: &Request) -> PrefetchResult<Response> {
        let fetcher = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || fetcher.fetch_blocking(&request))
            .await
            .map_err(|e| PrefetchError::Internal(format!("fetch task failed: {}", e)))?
    }
}
