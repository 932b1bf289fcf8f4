//! Crash-recovery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum crash events retained per session.
pub const MAX_CRASH_EVENTS: usize = 10;

/// One unexpected exit of a session's primary process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CrashEvent {
    /// Session that crashed.
    pub session_id: String,
    /// Time the exit was observed.
    pub timestamp: DateTime<Utc>,
    /// Human-readable reason.
    pub reason: String,
    /// Whether an automatic restart follows.
    pub will_restart: bool,
}

/// Restart bookkeeping kept per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionState {
    /// Restarts performed so far.
    pub restart_count: u32,
    /// Restart budget.
    pub max_restarts: u32,
    /// Tool the session runs.
    pub tool: String,
    /// Task the session runs.
    pub task: String,
}

impl SessionState {
    /// Whether another automatic restart is allowed.
    #[must_use]
    pub fn can_restart(&self) -> bool {
        self.restart_count < self.max_restarts
    }
}
