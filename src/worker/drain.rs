//! Pending message queue and its drainer
//!
//! Every inbound message triggers a drain, so drains overlap. Only one
//! drain loop runs at a time: a drain that finds another in progress
//! returns immediately and the running loop picks up the new message.
//! Messages are processed one at a time in arrival order, each to
//! completion (including its cache writes) before the next starts.
//! A drain that is cancelled or panics mid-message still releases the loop,
//! so later triggers pick up whatever is left.

use crate::host::Request;
use crate::worker::message::Instruction;
use crate::worker::resolver::fetch_and_store;
use crate::worker::state::WorkerState;
use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Value>,
    draining: bool,
}

/// FIFO of inbound message payloads
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    /// Messages enqueued but not yet fully processed
    outstanding: watch::Sender<usize>,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            outstanding: watch::Sender::new(0),
        }
    }

    /// Append a message payload
    pub fn enqueue(&self, message: Value) {
        self.lock().pending.push_back(message);
        self.outstanding.send_modify(|n| *n += 1);
    }

    /// Messages waiting to be processed
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether no messages are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a drain loop is running
    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    /// Wait until every enqueued message has been processed
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Claim the drain loop. Returns `None` if one is already running.
    fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        let mut inner = self.lock();
        if inner.draining {
            return None;
        }
        inner.draining = true;
        Some(DrainGuard {
            queue: self,
            in_flight: false,
            released: false,
        })
    }

    /// Next message for the running drain loop
    ///
    /// When the queue is empty the loop is released under the same lock,
    /// so a message enqueued concurrently is never stranded.
    fn next(&self) -> Option<Value> {
        let mut inner = self.lock();
        let message = inner.pending.pop_front();
        if message.is_none() {
            inner.draining = false;
        }
        message
    }

    fn complete_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn release(&self) {
        self.lock().draining = false;
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Claim on the drain loop
///
/// Dropping the guard settles the message in flight and releases the loop
/// unless [`MessageQueue::next`] already released it.
struct DrainGuard<'a> {
    queue: &'a MessageQueue,
    in_flight: bool,
    released: bool,
}

impl DrainGuard<'_> {
    /// Settle the previous message and take the next one
    fn next(&mut self) -> Option<Value> {
        let message = self.queue.next();
        self.settle();
        match message {
            Some(_) => self.in_flight = true,
            None => self.released = true,
        }
        message
    }

    fn settle(&mut self) {
        if std::mem::take(&mut self.in_flight) {
            self.queue.complete_one();
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            warn!(
                "Drain interrupted, dropping in-flight message ({} still queued)",
                self.queue.len()
            );
        }
        self.settle();
        if !self.released {
            self.queue.release();
        }
    }
}

/// Append a message to the state's queue
pub fn enqueue(state: &WorkerState, message: Value) {
    state.queue().enqueue(message);
}

/// Process queued messages until the queue is empty
///
/// Safe to call from any number of trigger points; overlapping calls
/// return immediately while another drain is running.
pub async fn drain(state: &WorkerState) {
    let Some(mut guard) = state.queue().begin_drain() else {
        trace!("Drain already in progress");
        return;
    };

    while let Some(message) = guard.next() {
        if let Err(panic) = AssertUnwindSafe(process(state, message)).catch_unwind().await {
            error!("Message processing panicked: {}", panic_message(panic.as_ref()));
        }
    }
    trace!("Message queue drained");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        return s;
    }
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .unwrap_or("unknown panic")
}

async fn process(state: &WorkerState, message: Value) {
    let Some(instruction) = Instruction::from_payload(&message) else {
        debug!("Ignoring unrecognized message: {}", message);
        return;
    };
    trace!("Processing {} message", instruction.kind());

    match instruction {
        Instruction::Prefetch { base, urls } => prefetch_all(state, base.as_deref(), &urls).await,
        Instruction::RegisterBase(base) => {
            if let Err(e) = state.add_base(&base) {
                warn!("Ignoring bundle base {}: {}", base, e);
            }
        }
        Instruction::Ping => info!(
            "Ping ({} messages pending, {} known bundles)",
            state.queue().len(),
            state.known_bundles()
        ),
    }
}

async fn prefetch_all(state: &WorkerState, base: Option<&str>, urls: &[String]) {
    let base_url = match base.map(|b| state.resolve_url(b)).transpose() {
        Ok(base_url) => base_url,
        Err(e) => {
            warn!("Ignoring prefetch with bad base: {}", e);
            return;
        }
    };

    for url in urls {
        let resolved = match &base_url {
            Some(base_url) => base_url.join(url).map_err(|e| (url.as_str(), e.to_string())),
            None => state
                .resolve_url(url)
                .map_err(|e| (url.as_str(), e.to_string())),
        };
        match resolved {
            Ok(resolved) => prefetch_one(state, Request::get(resolved)).await,
            Err((url, reason)) => warn!("Skipping prefetch of {}: {}", url, reason),
        }
    }
}

/// Speculatively populate the cache for one URL. Failures are logged only.
async fn prefetch_one(state: &WorkerState, request: Request) {
    let cache = match state.cache_acquire().await {
        Ok(cache) => cache,
        Err(e) => {
            warn!("Prefetch of {} skipped: {}", request.url, e);
            return;
        }
    };

    if let Ok(Some(_)) = cache.get(request.url.as_str()).await {
        trace!("Already cached {}", request.url);
        state.remember(&request.url);
        return;
    }

    match fetch_and_store(state, cache.as_ref(), &request).await {
        Ok(response) if response.is_success() => debug!("Prefetched {}", request.url),
        Ok(response) => warn!(
            "Prefetch of {} returned status {}",
            request.url, response.status
        ),
        Err(e) => warn!("Prefetch of {} failed: {}", request.url, e),
    }
}
