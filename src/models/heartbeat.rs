//! Heartbeat liveness record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional usage figures reported alongside a heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct UsageMetrics {
    /// Resident memory of the publishing process, in kilobytes.
    pub memory_kb: Option<u64>,
    /// Context-window usage reported by the tool, in percent.
    pub context_percent: Option<u32>,
    /// Tokens consumed so far.
    pub tokens_used: Option<u64>,
}

/// Liveness record written periodically by a supervised process about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatRecord {
    /// Session the record describes.
    pub session_id: String,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// Free-form status tag (`working`, `idle`, ...).
    pub status: String,
    /// Optional usage metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetrics>,
}

impl HeartbeatRecord {
    /// Construct a record stamped with the current time.
    #[must_use]
    pub fn now(session_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            status: status.into(),
            usage: None,
        }
    }

    /// Age of the record at `now`, clamped at zero for clock skew.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}
