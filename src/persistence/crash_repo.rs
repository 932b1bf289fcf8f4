//! Crash-recovery metadata: restart bookkeeping and bounded crash history.

use tracing::warn;

use crate::models::crash::{CrashEvent, SessionState, MAX_CRASH_EVENTS};
use crate::Result;

use super::keys;
use super::kv_store::KvStore;

/// Repository for per-session crash data.
#[derive(Clone)]
pub struct CrashRepo {
    kv: KvStore,
}

impl CrashRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Persist restart bookkeeping for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn save_state(&self, session_id: &str, state: &SessionState) -> Result<()> {
        self.kv
            .set(&keys::session_state(session_id), state, Some(keys::SESSION_STATE_TTL))
            .await
    }

    /// Restart bookkeeping for a session, if recorded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn load_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        self.kv.get(&keys::session_state(session_id)).await
    }

    /// Append a crash event, evicting the oldest beyond [`MAX_CRASH_EVENTS`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the write fails.
    pub async fn record_crash(&self, event: &CrashEvent) -> Result<()> {
        warn!(
            session_id = event.session_id,
            reason = event.reason,
            will_restart = event.will_restart,
            "crash recorded"
        );
        self.kv
            .push_capped(
                &keys::crash_events(&event.session_id),
                event,
                MAX_CRASH_EVENTS,
                Some(keys::CRASH_EVENTS_TTL),
            )
            .await
    }

    /// Crash history for a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Store` if the read fails.
    pub async fn crash_events(&self, session_id: &str) -> Result<Vec<CrashEvent>> {
        self.kv.list(&keys::crash_events(session_id)).await
    }
}
