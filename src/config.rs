//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::{AppError, Result};

/// Launch settings for one AI coding tool.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Executable invoked inside the terminal session.
    pub command: String,
    /// Arguments placed before the task text.
    #[serde(default)]
    pub args: Vec<String>,
    /// Regexes matched against recent output to detect capacity exhaustion.
    #[serde(default)]
    pub capacity_patterns: Vec<String>,
    /// Tool to switch to once this one reports capacity exhaustion.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// Heartbeat publishing cadence, record expiry and age thresholds.
///
/// Records expire after `ttl_seconds` (default 150, five publish intervals)
/// rather than two and a half intervals: the record has to outlive
/// `healthy_seconds` for the stale tier to be observable at all, and an
/// expired record reads as dead.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Seconds between published heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_seconds: u64,
    /// Seconds a published record stays readable in the store.
    #[serde(default = "default_heartbeat_ttl")]
    pub ttl_seconds: u64,
    /// Heartbeats younger than this are healthy.
    #[serde(default = "default_healthy_seconds")]
    pub healthy_seconds: u64,
    /// Heartbeats at least this old are dead; between the two they are stale.
    #[serde(default = "default_dead_seconds")]
    pub dead_seconds: u64,
}

/// Output-sampling health checks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Seconds between health-monitor sweeps over the registry.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// Minimum seconds between two output samples of the same session.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
    /// Unchanged-output duration after which a live session is stuck.
    #[serde(default = "default_stuck_seconds")]
    pub stuck_seconds: u64,
    /// Number of trailing output lines hashed per sample.
    #[serde(default = "default_sample_lines")]
    pub sample_lines: usize,
}

/// Loop scheduler behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoopConfig {
    /// Seconds between promise-store polls while a task runs.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Halt the run when a task publishes a `blocked` promise.
    #[serde(default)]
    pub stop_on_blocked: bool,
    /// Per-task wait limit; 0 means wait indefinitely.
    #[serde(default)]
    pub task_timeout_seconds: u64,
}

/// Automatic restart budget for crashed sessions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryConfig {
    /// Restarts allowed per session before it is marked failed.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_ttl() -> u64 {
    150
}

fn default_healthy_seconds() -> u64 {
    60
}

fn default_dead_seconds() -> u64 {
    300
}

fn default_check_interval() -> u64 {
    10
}

fn default_sample_interval() -> u64 {
    5
}

fn default_stuck_seconds() -> u64 {
    300
}

fn default_sample_lines() -> usize {
    40
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_restarts() -> u32 {
    3
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".conductor").join("conductor.db")
}

fn default_session_prefix() -> String {
    "conductor".into()
}

fn default_scrollback_lines() -> usize {
    2000
}

fn default_kill_grace_ms() -> u64 {
    300
}

fn default_tool() -> String {
    "claude".into()
}

fn default_tools() -> HashMap<String, ToolConfig> {
    let mut tools = HashMap::new();
    tools.insert(
        "claude".to_owned(),
        ToolConfig {
            command: "claude".into(),
            args: vec!["--dangerously-skip-permissions".into()],
            capacity_patterns: vec![
                r"(?i)usage limit reached".into(),
                r"(?i)\d+-hour limit reached".into(),
                r"(?i)out of extra usage".into(),
            ],
            fallback: Some("codex".into()),
        },
    );
    tools.insert(
        "codex".to_owned(),
        ToolConfig {
            command: "codex".into(),
            args: Vec::new(),
            capacity_patterns: vec![
                r"(?i)you've hit your usage limit".into(),
                r"(?i)rate limit reached".into(),
            ],
            fallback: None,
        },
    );
    tools
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_heartbeat_interval(),
            ttl_seconds: default_heartbeat_ttl(),
            healthy_seconds: default_healthy_seconds(),
            dead_seconds: default_dead_seconds(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            sample_interval_seconds: default_sample_interval(),
            stuck_seconds: default_stuck_seconds(),
            sample_lines: default_sample_lines(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            stop_on_blocked: false,
            task_timeout_seconds: 0,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
        }
    }
}

/// Global configuration parsed from `conductor.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` file backing the shared keyed store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Prefix for every terminal-session name.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    /// Maximum complete lines kept per session scrollback.
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,
    /// Grace period between SIGTERM and SIGKILL during session kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Tool used when a request or loop names none.
    #[serde(default = "default_tool")]
    pub default_tool: String,
    /// Registry of launchable tools.
    #[serde(default = "default_tools")]
    pub tools: HashMap<String, ToolConfig>,
    /// Heartbeat cadence and thresholds.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Output-sampling health checks.
    #[serde(default)]
    pub health: HealthConfig,
    /// Loop scheduler behavior.
    #[serde(default, rename = "loop")]
    pub task_loop: LoopConfig,
    /// Crash restart budget.
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// An empty string yields the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a tool by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the tool is not configured.
    pub fn tool(&self, name: &str) -> Result<&ToolConfig> {
        self.tools
            .get(name)
            .ok_or_else(|| AppError::Config(format!("unknown tool: {name}")))
    }

    /// Heartbeat publish interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_seconds)
    }

    /// Heartbeat record expiry.
    #[must_use]
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat.ttl_seconds)
    }

    /// Grace period between graceful and forceful termination.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Promise-store poll interval used by the loop scheduler.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.task_loop.poll_interval_seconds)
    }

    /// Per-task wait limit, if one is configured.
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        match self.task_loop.task_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Name reserved for the always-on coordinating session.
    #[must_use]
    pub fn coordinator_name(&self) -> String {
        crate::terminal::naming::coordinator_name(&self.session_prefix)
    }

    fn validate(&self) -> Result<()> {
        if self.session_prefix.trim().is_empty() {
            return Err(AppError::Config("session_prefix must not be empty".into()));
        }
        if self.scrollback_lines == 0 {
            return Err(AppError::Config(
                "scrollback_lines must be greater than zero".into(),
            ));
        }
        if self.heartbeat.interval_seconds == 0 {
            return Err(AppError::Config(
                "heartbeat.interval_seconds must be greater than zero".into(),
            ));
        }
        if self.heartbeat.ttl_seconds <= self.heartbeat.interval_seconds
            || self.heartbeat.ttl_seconds <= self.heartbeat.healthy_seconds
        {
            return Err(AppError::Config(
                "heartbeat.ttl_seconds must exceed heartbeat.interval_seconds and heartbeat.healthy_seconds"
                    .into(),
            ));
        }
        if self.heartbeat.healthy_seconds >= self.heartbeat.dead_seconds {
            return Err(AppError::Config(
                "heartbeat.healthy_seconds must be below heartbeat.dead_seconds".into(),
            ));
        }
        if self.health.check_interval_seconds == 0 || self.health.sample_lines == 0 {
            return Err(AppError::Config(
                "health.check_interval_seconds and health.sample_lines must be greater than zero"
                    .into(),
            ));
        }
        if self.task_loop.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "loop.poll_interval_seconds must be greater than zero".into(),
            ));
        }

        self.tool(&self.default_tool)?;
        for (name, tool) in &self.tools {
            if tool.command.trim().is_empty() {
                return Err(AppError::Config(format!("tool {name} has an empty command")));
            }
            if let Some(ref fallback) = tool.fallback {
                if !self.tools.contains_key(fallback) {
                    return Err(AppError::Config(format!(
                        "tool {name} falls back to unknown tool {fallback}"
                    )));
                }
            }
            for pattern in &tool.capacity_patterns {
                Regex::new(pattern).map_err(|err| {
                    AppError::Config(format!("tool {name} capacity pattern invalid: {err}"))
                })?;
            }
        }

        Ok(())
    }
}
