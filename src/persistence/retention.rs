//! Retention service for expired store entries.
//!
//! Reads already ignore expired rows; this task reclaims the space.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::kv_store::KvStore;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the expired-entry purge background task.
///
/// The task runs every minute until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(kv: KvStore, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match kv.purge_expired().await {
                        Ok(removed) => debug!(removed, "retention purge completed"),
                        Err(err) => error!(?err, "retention purge failed"),
                    }
                }
            }
        }
    })
}
