//! Persisted progress of a loop scheduler run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Loop run status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// Tasks are being dispatched.
    Running,
    /// Interrupted; a relaunch resumes from the todolist.
    Paused,
    /// Every pending task was processed.
    Completed,
    /// Halted by policy or by a fatal error.
    Stopped,
}

impl LoopStatus {
    /// Whether the run will make no further progress on its own.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

/// Loop progress record, persisted after every task transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoopState {
    /// Loop identifier.
    pub loop_id: String,
    /// Todolist driving the run.
    pub todolist: PathBuf,
    /// Working directory for spawned sessions.
    pub cwd: PathBuf,
    /// Index of the task being processed within this run's pending list.
    pub current_index: usize,
    /// Number of pending tasks this run started with.
    pub total: usize,
    /// Tool used for the current and remaining tasks.
    pub active_tool: String,
    /// Run status.
    pub status: LoopStatus,
    /// Session running the current task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<String>,
    /// Reason recorded when the run stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Last persist time.
    pub updated_at: DateTime<Utc>,
}

impl LoopState {
    /// Construct a running state at index zero.
    #[must_use]
    pub fn new(
        loop_id: String,
        todolist: PathBuf,
        cwd: PathBuf,
        total: usize,
        active_tool: String,
    ) -> Self {
        Self {
            loop_id,
            todolist,
            cwd,
            current_index: 0,
            total,
            active_tool,
            status: LoopStatus::Running,
            current_session_id: None,
            reason: None,
            updated_at: Utc::now(),
        }
    }
}
