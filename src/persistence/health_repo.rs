//! Health-check results and the aggregate summary.

use crate::models::health::{HealthCheckResult, HealthSummary};
use crate::Result;

use super::keys;
use super::kv_store::KvStore;

/// Repository for derived health data. Nothing here is a source of truth.
#[derive(Clone)]
pub struct HealthRepo {
    kv: KvStore,
}

impl HealthRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Store the latest check for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn store_check(&self, result: &HealthCheckResult) -> Result<()> {
        self.kv
            .set(
                &keys::health_check(&result.session_id),
                result,
                Some(keys::HEALTH_CHECK_TTL),
            )
            .await
    }

    /// Latest check for a session, if not expired.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn get_check(&self, session_id: &str) -> Result<Option<HealthCheckResult>> {
        self.kv.get(&keys::health_check(session_id)).await
    }

    /// Replace the aggregate summary.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn store_summary(&self, summary: &HealthSummary) -> Result<()> {
        self.kv
            .set(keys::HEALTH_SUMMARY, summary, Some(keys::HEALTH_SUMMARY_TTL))
            .await
    }

    /// Latest aggregate summary, if not expired.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn get_summary(&self) -> Result<Option<HealthSummary>> {
        self.kv.get(keys::HEALTH_SUMMARY).await
    }
}
