//! Promise store: at most one completion signal per session.

use std::collections::HashMap;

use tracing::info;

use crate::models::promise::Promise;
use crate::Result;

use super::keys;
use super::kv_store::KvStore;

/// Repository for session promises.
#[derive(Clone)]
pub struct PromiseStore {
    kv: KvStore,
}

impl PromiseStore {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Publish a promise, overwriting any earlier one for the same session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn set_promise(&self, promise: &Promise) -> Result<()> {
        self.kv
            .set(&keys::promise(&promise.session_id), promise, Some(keys::PROMISE_TTL))
            .await?;
        self.kv
            .publish(keys::PROMISE_CHANNEL, serde_json::to_string(promise)?);
        info!(
            session_id = promise.session_id,
            status = ?promise.status,
            "promise published"
        );
        Ok(())
    }

    /// Fetch the live promise for a session. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn get_promise(&self, session_id: &str) -> Result<Option<Promise>> {
        self.kv.get(&keys::promise(session_id)).await
    }

    /// Delete the promise for a session. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_promise(&self, session_id: &str) -> Result<bool> {
        self.kv.delete(&keys::promise(session_id)).await
    }

    /// Every live promise keyed by session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the scan fails.
    pub async fn get_promises(&self) -> Result<HashMap<String, Promise>> {
        let entries: Vec<(String, Promise)> = self.kv.scan_prefix(keys::PROMISE_PREFIX).await?;
        Ok(entries
            .into_iter()
            .map(|(_, promise)| (promise.session_id.clone(), promise))
            .collect())
    }

    /// Mark a session as actively working again.
    ///
    /// Only the logical done-marker is removed; the process is untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn resume(&self, session_id: &str) -> Result<bool> {
        let removed = self.delete_promise(session_id).await?;
        info!(session_id, removed, "session resumed");
        Ok(removed)
    }
}
