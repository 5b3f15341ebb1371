//! Client control for hosts without controlled pages

use crate::error::PrefetchResult;
use crate::host::ClientControl;
use async_trait::async_trait;
use tracing::info;

/// `ClientControl` that records the transition in the log and succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingClients;

#[async_trait]
impl ClientControl for LoggingClients {
    async fn skip_waiting(&self) -> PrefetchResult<()> {
        info!("Skipping waiting phase");
        Ok(())
    }

    async fn claim(&self) -> PrefetchResult<()> {
        info!("Claimed existing clients");
        Ok(())
    }
}
