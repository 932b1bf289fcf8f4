//! Loop-state persistence.

use chrono::Utc;

use crate::models::loop_state::LoopState;
use crate::Result;

use super::keys;
use super::kv_store::KvStore;

/// Repository for loop scheduler progress. Entries never expire.
#[derive(Clone)]
pub struct LoopStateRepo {
    kv: KvStore,
}

impl LoopStateRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Persist a state snapshot, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn save(&self, state: &mut LoopState) -> Result<()> {
        state.updated_at = Utc::now();
        self.kv.set(&keys::loop_state(&state.loop_id), state, None).await
    }

    /// Load a loop's last persisted state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn load(&self, loop_id: &str) -> Result<Option<LoopState>> {
        self.kv.get(&keys::loop_state(loop_id)).await
    }

    /// Every persisted loop, ordered by loop id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the scan fails.
    pub async fn list(&self) -> Result<Vec<LoopState>> {
        let entries: Vec<(String, LoopState)> = self.kv.scan_prefix(keys::LOOP_PREFIX).await?;
        Ok(entries.into_iter().map(|(_, state)| state).collect())
    }
}
