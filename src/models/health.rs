//! Health classification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness tier derived from heartbeat age alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatHealth {
    /// Heartbeat younger than the healthy threshold.
    Healthy,
    /// Heartbeat older than healthy but younger than the dead threshold.
    Stale,
    /// Heartbeat at or beyond the dead threshold, or absent.
    Dead,
}

/// Liveness tier derived from output-change sampling alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputHealth {
    /// Output changed within the stuck threshold.
    Active,
    /// Output unchanged beyond the threshold while the terminal lives.
    Stuck,
    /// Output static, terminal alive, and no heartbeat ever arrived.
    Unresponsive,
    /// No sample could be taken (terminal gone or never sampled).
    Unknown,
}

/// Combined classification chosen by a consumer of [`HealthCheckResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Recent heartbeat and changing output.
    Healthy,
    /// Heartbeat aging.
    Stale,
    /// Heartbeat expired or terminal gone.
    Dead,
    /// Output frozen while the terminal lives.
    Stuck,
    /// Terminal alive, never heartbeated, output frozen.
    Unresponsive,
}

impl HealthStatus {
    /// Lowercase label used in logs and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Stale => "stale",
            Self::Dead => "dead",
            Self::Stuck => "stuck",
            Self::Unresponsive => "unresponsive",
        }
    }
}

/// Snapshot of both liveness signals for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthCheckResult {
    /// Session evaluated.
    pub session_id: String,
    /// Evaluation time.
    pub checked_at: DateTime<Utc>,
    /// Heartbeat-derived tier.
    pub heartbeat: HeartbeatHealth,
    /// Output-derived tier.
    pub output: OutputHealth,
    /// Age of the newest heartbeat, if any.
    pub heartbeat_age_secs: Option<u64>,
    /// Whether a heartbeat was ever observed for this session.
    pub heartbeat_seen: bool,
    /// Hex digest of the sampled output tail.
    pub output_hash: Option<String>,
    /// Seconds the sampled output has been unchanged.
    pub unchanged_secs: u64,
    /// Whether the primary process is running.
    pub process_alive: bool,
    /// Whether the terminal session still exists.
    pub terminal_alive: bool,
}

impl HealthCheckResult {
    /// Resolve both signals into one classification.
    ///
    /// Precedence: terminal gone, unresponsive, heartbeat dead, stuck,
    /// stale, healthy. A dead heartbeat always outranks a stuck output.
    #[must_use]
    pub fn resolve(&self) -> HealthStatus {
        if !self.terminal_alive {
            return HealthStatus::Dead;
        }
        match (self.output, self.heartbeat) {
            (OutputHealth::Unresponsive, _) => HealthStatus::Unresponsive,
            (_, HeartbeatHealth::Dead) => HealthStatus::Dead,
            (OutputHealth::Stuck, _) => HealthStatus::Stuck,
            (_, HeartbeatHealth::Stale) => HealthStatus::Stale,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Aggregate counts across every evaluated session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthSummary {
    /// Sessions classified healthy.
    pub healthy: u32,
    /// Sessions classified stale.
    pub stale: u32,
    /// Sessions classified dead.
    pub dead: u32,
    /// Sessions classified stuck.
    pub stuck: u32,
    /// Sessions classified unresponsive.
    pub unresponsive: u32,
    /// Time of the sweep that produced these counts.
    pub updated_at: Option<DateTime<Utc>>,
}

impl HealthSummary {
    /// Count one classification.
    pub fn record(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Stale => self.stale += 1,
            HealthStatus::Dead => self.dead += 1,
            HealthStatus::Stuck => self.stuck += 1,
            HealthStatus::Unresponsive => self.unresponsive += 1,
        }
    }

    /// Total sessions counted.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.healthy + self.stale + self.dead + self.stuck + self.unresponsive
    }
}
