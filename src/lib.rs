//! Prefetch Worker - background bundle prefetch cache
//!
//! Intercepts bundle requests, serves them from a persistent cache when
//! possible, and fills that cache ahead of time from prefetch messages.

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod worker;

pub use error::{PrefetchError, PrefetchResult};
pub use worker::{EventOutcome, Worker, WorkerEvent, WorkerState};
