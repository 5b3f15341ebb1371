//! Prefetch cache worker
//!
//! The host delivers three kinds of events to one [`Worker`] per
//! activation:
//!
//! | Event | Handling |
//! |-------|----------|
//! | Fetch | [`resolver::resolve`]: cache hit, fetch-and-store, or pass-through |
//! | Message | Enqueue, then trigger [`drain::drain`] in the background |
//! | Install / Activate | [`lifecycle`] handlers |
//!
//! All events share one [`WorkerState`]: the origin, the injected fetcher,
//! the debounced cache accessor, the bundle registry, and the message queue.

pub mod accessor;
pub mod drain;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod resolver;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use accessor::{AccessorStats, CacheAccessor, DebounceSlot, SlotState};
pub use message::Instruction;
pub use registry::BundleRegistry;
pub use resolver::Resolution;
pub use state::WorkerState;

use crate::error::PrefetchResult;
use crate::host::{ClientControl, Method, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// An event delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WorkerEvent {
    /// Outgoing request from a controlled page
    Fetch {
        #[serde(default)]
        method: Method,
        /// Absolute, or relative to the worker origin
        url: String,
    },
    /// Message posted by a controlled page
    Message { data: Value },
    Install,
    Activate,
}

/// What the host should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Answer the fetch event (or let it through on pass-through)
    Respond(Resolution),
    /// Message accepted; processing continues in the background
    Queued,
    /// Lifecycle transition finished
    Completed,
}

/// Event dispatcher for one worker activation
pub struct Worker {
    state: Arc<WorkerState>,
    clients: Arc<dyn ClientControl>,
}

impl Worker {
    /// Create a worker over freshly built state
    pub fn new(state: WorkerState, clients: Arc<dyn ClientControl>) -> Self {
        Self {
            state: Arc::new(state),
            clients,
        }
    }

    /// Shared state
    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Dispatch one host event
    pub async fn handle(&self, event: WorkerEvent) -> PrefetchResult<EventOutcome> {
        match event {
            WorkerEvent::Fetch { method, url } => {
                let request = Request::new(method, self.state.resolve_url(&url)?);
                Ok(EventOutcome::Respond(self.on_fetch(&request).await?))
            }
            WorkerEvent::Message { data } => {
                self.on_message(data);
                Ok(EventOutcome::Queued)
            }
            WorkerEvent::Install => {
                self.on_install().await?;
                Ok(EventOutcome::Completed)
            }
            WorkerEvent::Activate => {
                self.on_activate().await?;
                Ok(EventOutcome::Completed)
            }
        }
    }

    /// Resolve an intercepted request
    pub async fn on_fetch(&self, request: &Request) -> PrefetchResult<Resolution> {
        resolver::resolve(&self.state, request).await
    }

    /// Queue a message and trigger a background drain
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_message(&self, data: Value) {
        drain::enqueue(&self.state, data);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move { drain::drain(&state).await });
    }

    /// Handle the install transition
    pub async fn on_install(&self) -> PrefetchResult<()> {
        lifecycle::on_install(self.clients.as_ref()).await
    }

    /// Handle the activate transition
    pub async fn on_activate(&self) -> PrefetchResult<()> {
        lifecycle::on_activate(&self.state, self.clients.as_ref()).await
    }

    /// Wait until every queued message has been processed
    pub async fn settled(&self) {
        self.state.queue().wait_idle().await;
    }
}
