//! Session model and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a supervised session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Primary process is running.
    Active,
    /// Primary process exited on its own.
    Exited,
    /// Crashed more often than the restart budget allows.
    Failed,
}

/// Inputs required to create a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Tool identifier (key into the configured tool table).
    pub tool: String,
    /// Task text handed to the tool.
    pub task: String,
    /// Working directory for the tool process.
    pub cwd: PathBuf,
    /// Session that spawned this one, for recursive decomposition.
    pub parent_id: Option<String>,
}

/// A terminal-hosted tool process tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique, never-reused identifier.
    pub id: String,
    /// Terminal-session name (`<prefix>-<tool>-<slug>`).
    pub name: String,
    /// Tool identifier.
    pub tool: String,
    /// Task text the tool was launched with.
    pub task: String,
    /// Working directory of the primary process.
    pub cwd: PathBuf,
    /// Parent session, if spawned by another session.
    pub parent_id: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Exit timestamp of the most recent primary process.
    pub exited_at: Option<DateTime<Utc>>,
    /// Exit code of the most recent primary process.
    pub exit_code: Option<u32>,
    /// PID of the current primary process.
    pub pid: Option<u32>,
    /// Automatic restarts performed after crashes.
    pub restart_count: u32,
}

impl Session {
    /// Construct a new active session with a generated identifier.
    #[must_use]
    pub fn new(name: String, request: &SpawnRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            tool: request.tool.clone(),
            task: request.task.clone(),
            cwd: request.cwd.clone(),
            parent_id: request.parent_id.clone(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            exited_at: None,
            exit_code: None,
            pid: None,
            restart_count: 0,
        }
    }

    /// Whether the primary process is believed to be running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Exited -> Active` is the crash-restart path.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (SessionStatus::Active, SessionStatus::Exited)
                | (SessionStatus::Exited, SessionStatus::Active | SessionStatus::Failed)
        )
    }
}
