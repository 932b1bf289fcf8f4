//! Heartbeat records in the shared store.

use std::time::Duration;

use tracing::warn;

use crate::models::heartbeat::HeartbeatRecord;
use crate::Result;

use super::keys;
use super::kv_store::KvStore;

/// Repository for heartbeat records.
#[derive(Clone)]
pub struct HeartbeatRepo {
    kv: KvStore,
    ttl: Duration,
}

impl HeartbeatRepo {
    /// Create a repository whose writes expire after `ttl`.
    #[must_use]
    pub fn new(kv: KvStore, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Write a record and broadcast it on the heartbeat channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn publish(&self, record: &HeartbeatRecord) -> Result<()> {
        self.kv
            .set(&keys::heartbeat(&record.session_id), record, Some(self.ttl))
            .await?;
        self.kv
            .publish(keys::HEARTBEAT_CHANNEL, serde_json::to_string(record)?);
        Ok(())
    }

    /// Fetch the latest live record for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn latest(&self, session_id: &str) -> Result<Option<HeartbeatRecord>> {
        self.kv.get(&keys::heartbeat(session_id)).await
    }

    /// Fetch the latest record, treating an unreachable store as absence.
    pub async fn latest_or_absent(&self, session_id: &str) -> Option<HeartbeatRecord> {
        match self.latest(session_id).await {
            Ok(record) => record,
            Err(err) => {
                warn!(session_id, %err, "heartbeat read failed, treating as absent");
                None
            }
        }
    }
}
