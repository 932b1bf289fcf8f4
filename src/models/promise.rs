//! Completion promise published by a session's own work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome claimed by a promise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromiseStatus {
    /// Task finished successfully.
    Completed,
    /// Task cannot proceed without outside help.
    Blocked,
    /// Task finished but a human should look at it.
    NeedsReview,
}

impl std::str::FromStr for PromiseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "needs_review" | "needs-review" => Ok(Self::NeedsReview),
            other => Err(format!("invalid promise status: {other}")),
        }
    }
}

/// One-shot completion signal. At most one lives per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Promise {
    /// Session that concluded.
    pub session_id: String,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// Claimed outcome.
    pub status: PromiseStatus,
    /// Free-text summary of the work.
    pub summary: String,
    /// Files touched, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    /// Blockers, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockers: Option<Vec<String>>,
}

impl Promise {
    /// Construct a promise stamped with the current time.
    #[must_use]
    pub fn new(session_id: impl Into<String>, status: PromiseStatus, summary: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            status,
            summary: summary.into(),
            files: None,
            blockers: None,
        }
    }
}
