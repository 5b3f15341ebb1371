//! Test doubles for worker tests

use crate::error::{PrefetchError, PrefetchResult};
use crate::host::{ClientControl, Fetcher, Request, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const ORIGIN: &str = "http://localhost:5173/";

#[derive(Clone)]
enum Route {
    Respond {
        status: u16,
        body: String,
        delay: Duration,
    },
    Fail,
    Panic,
}

/// Fetcher answering from a fixed route table and logging every call
///
/// Unrouted URLs get a 404. The log holds `start <url>` / `end <url>`
/// entries in the order they happened.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn url(path: &str) -> String {
        url::Url::parse(ORIGIN).unwrap().join(path).unwrap().to_string()
    }

    pub fn respond(self, path: &str, status: u16, body: &str) -> Self {
        self.respond_after(path, status, body, Duration::ZERO)
    }

    pub fn respond_after(self, path: &str, status: u16, body: &str, delay: Duration) -> Self {
        self.routes.lock().unwrap().insert(
            Self::url(path),
            Route::Respond {
                status,
                body: body.to_string(),
                delay,
            },
        );
        self
    }

    pub fn fail(self, path: &str) -> Self {
        self.routes.lock().unwrap().insert(Self::url(path), Route::Fail);
        self
    }

    pub fn panic_on(self, path: &str) -> Self {
        self.routes.lock().unwrap().insert(Self::url(path), Route::Panic);
        self
    }

    pub fn calls(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with("start "))
            .count()
    }

    pub fn calls_for(&self, path: &str) -> usize {
        let needle = format!("start {}", Self::url(path));
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| **entry == needle)
            .count()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> PrefetchResult<Response> {
        let url = request.url.to_string();
        self.log.lock().unwrap().push(format!("start {}", url));
        let route = self.routes.lock().unwrap().get(&url).cloned();

        let result = match route {
            Some(Route::Respond {
                status,
                body,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Response::new(url.clone(), status, body))
            }
            Some(Route::Fail) => Err(PrefetchError::network(url.clone(), "connection reset")),
            Some(Route::Panic) => panic!("fetcher blew up on {}", url),
            None => Ok(Response::new(url.clone(), 404, "not found")),
        };

        self.log.lock().unwrap().push(format!("end {}", url));
        result
    }
}

/// ClientControl that records calls and can be told to fail claiming
#[derive(Default)]
pub struct RecordingClients {
    pub calls: Mutex<Vec<&'static str>>,
    pub fail_claim: bool,
}

#[async_trait]
impl ClientControl for RecordingClients {
    async fn skip_waiting(&self) -> PrefetchResult<()> {
        self.calls.lock().unwrap().push("skip_waiting");
        Ok(())
    }

    async fn claim(&self) -> PrefetchResult<()> {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push("claim");
        if self.fail_claim {
            return Err(PrefetchError::ClientControl("clients unavailable".into()));
        }
        Ok(())
    }
}
