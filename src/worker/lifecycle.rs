//! Install and activate handlers

use crate::error::PrefetchResult;
use crate::host::ClientControl;
use crate::worker::state::WorkerState;
use tracing::{info, warn};

/// Install: take over immediately instead of waiting for old clients
pub async fn on_install(clients: &dyn ClientControl) -> PrefetchResult<()> {
    info!("Installing worker");
    clients.skip_waiting().await
}

/// Activate: start from a fresh cache accessor, then claim existing clients
///
/// The fresh open also registers bundles stored by earlier activations. A
/// cache that fails to open is logged and retried on the next acquire.
/// Activation is only complete once the claim resolves; a claim failure is
/// returned to the host.
pub async fn on_activate(state: &WorkerState, clients: &dyn ClientControl) -> PrefetchResult<()> {
    state.cache().reset().await;
    if let Err(e) = state.cache_acquire().await {
        warn!("Activating without stored bundles: {}", e);
    }
    clients.claim().await?;
    info!("Worker activated for {}", state.origin());
    Ok(())
}
