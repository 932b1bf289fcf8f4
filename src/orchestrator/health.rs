//! Health evaluation from two independent signals.
//!
//! Heartbeat age yields a [`HeartbeatHealth`]; hashing a tail sample of the
//! live output yields an [`OutputHealth`]. Both land side by side in a
//! [`HealthCheckResult`] and are never fused here: consumers call
//! [`HealthCheckResult::resolve`] or apply their own precedence.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::config::GlobalConfig;
use crate::models::health::{HealthCheckResult, HeartbeatHealth, OutputHealth};
use crate::models::heartbeat::HeartbeatRecord;
use crate::persistence::heartbeat_repo::HeartbeatRepo;

/// Age and sampling thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Heartbeats younger than this are healthy.
    pub healthy: Duration,
    /// Heartbeats at least this old are dead.
    pub dead: Duration,
    /// Unchanged output beyond this is stuck.
    pub stuck: Duration,
    /// Minimum spacing between two output samples of one session.
    pub sample_interval: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy: Duration::from_secs(60),
            dead: Duration::from_secs(300),
            stuck: Duration::from_secs(300),
            sample_interval: Duration::from_secs(5),
        }
    }
}

impl HealthThresholds {
    /// Thresholds from the `[heartbeat]` and `[health]` sections.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            healthy: Duration::from_secs(config.heartbeat.healthy_seconds),
            dead: Duration::from_secs(config.heartbeat.dead_seconds),
            stuck: Duration::from_secs(config.health.stuck_seconds),
            sample_interval: Duration::from_secs(config.health.sample_interval_seconds),
        }
    }
}

/// Classify a heartbeat age. `None` means no live record, which is dead.
#[must_use]
pub fn classify_heartbeat(age: Option<Duration>, thresholds: &HealthThresholds) -> HeartbeatHealth {
    match age {
        Some(age) if age < thresholds.healthy => HeartbeatHealth::Healthy,
        Some(age) if age < thresholds.dead => HeartbeatHealth::Stale,
        _ => HeartbeatHealth::Dead,
    }
}

/// Hex SHA-256 digest of an output sample.
#[must_use]
pub fn hash_sample(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Clone)]
struct SampleState {
    hash: String,
    changed_at: DateTime<Utc>,
    sampled_at: DateTime<Utc>,
}

/// Result of offering one output sample to the [`OutputSampler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputObservation {
    /// Digest currently on record.
    pub hash: String,
    /// How long the digest has been unchanged.
    pub unchanged: Duration,
    /// Whether this call actually rehashed the sample.
    pub resampled: bool,
}

/// Tracks per-session output digests and how long each stayed unchanged.
#[derive(Debug, Default)]
pub struct OutputSampler {
    sample_interval: Duration,
    states: HashMap<String, SampleState>,
}

impl OutputSampler {
    /// Sampler that rehashes a session at most once per `sample_interval`.
    #[must_use]
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sample_interval,
            states: HashMap::new(),
        }
    }

    /// Offer the current output of `session_id` at `now`.
    ///
    /// Within the sample interval of the previous sample the text is not
    /// rehashed and the previous digest stands.
    pub fn observe(&mut self, session_id: &str, text: &str, now: DateTime<Utc>) -> OutputObservation {
        let interval = chrono::Duration::from_std(self.sample_interval).unwrap_or_default();

        let mut resampled = false;
        let state = match self.states.entry(session_id.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                resampled = true;
                entry.insert(SampleState {
                    hash: hash_sample(text),
                    changed_at: now,
                    sampled_at: now,
                })
            }
        };
        if !resampled && now - state.sampled_at >= interval {
            let hash = hash_sample(text);
            if hash != state.hash {
                state.hash = hash;
                state.changed_at = now;
            }
            state.sampled_at = now;
            resampled = true;
        }

        OutputObservation {
            hash: state.hash.clone(),
            unchanged: (now - state.changed_at).to_std().unwrap_or_default(),
            resampled,
        }
    }

    /// Drop the history of a session that is gone.
    pub fn forget(&mut self, session_id: &str) {
        self.states.remove(session_id);
    }

    /// Keep only the sessions in `live`.
    pub fn retain(&mut self, live: &HashSet<String>) {
        self.states.retain(|id, _| live.contains(id));
    }
}

/// Inputs for one evaluation.
#[derive(Debug, Clone)]
pub struct HealthInput {
    /// Session evaluated.
    pub session_id: String,
    /// Newest live heartbeat, if any.
    pub heartbeat: Option<HeartbeatRecord>,
    /// Output tail, when the terminal could be sampled.
    pub output_tail: Option<String>,
    /// Whether the primary process is running.
    pub process_alive: bool,
    /// Whether the terminal session exists.
    pub terminal_alive: bool,
}

/// Stateful evaluator combining heartbeat age and output sampling.
#[derive(Debug)]
pub struct HealthEvaluator {
    thresholds: HealthThresholds,
    sampler: OutputSampler,
    heartbeat_seen: HashSet<String>,
}

impl HealthEvaluator {
    /// Evaluator with the given thresholds.
    #[must_use]
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            sampler: OutputSampler::new(thresholds.sample_interval),
            heartbeat_seen: HashSet::new(),
        }
    }

    /// Configured thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Heartbeat-only classification of a session read from the store.
    ///
    /// An unreachable store counts as an absent record.
    pub async fn heartbeat_health(
        &self,
        repo: &HeartbeatRepo,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> (HeartbeatHealth, Option<Duration>) {
        let age = repo
            .latest_or_absent(session_id)
            .await
            .map(|record| record.age_at(now));
        (classify_heartbeat(age, &self.thresholds), age)
    }

    /// Evaluate both signals for one session at `now`.
    pub fn evaluate(&mut self, input: HealthInput, now: DateTime<Utc>) -> HealthCheckResult {
        let age = input.heartbeat.as_ref().map(|record| record.age_at(now));
        if input.heartbeat.is_some() {
            self.heartbeat_seen.insert(input.session_id.clone());
        }
        let heartbeat_seen = self.heartbeat_seen.contains(&input.session_id);
        let heartbeat = classify_heartbeat(age, &self.thresholds);

        let (output, output_hash, unchanged) = match input.output_tail {
            Some(ref tail) if input.terminal_alive => {
                let observation = self.sampler.observe(&input.session_id, tail, now);
                let output = if observation.unchanged <= self.thresholds.stuck {
                    OutputHealth::Active
                } else if heartbeat_seen {
                    OutputHealth::Stuck
                } else {
                    OutputHealth::Unresponsive
                };
                (output, Some(observation.hash), observation.unchanged)
            }
            _ => {
                self.sampler.forget(&input.session_id);
                (OutputHealth::Unknown, None, Duration::ZERO)
            }
        };

        HealthCheckResult {
            session_id: input.session_id,
            checked_at: now,
            heartbeat,
            output,
            heartbeat_age_secs: age.map(|age| age.as_secs()),
            heartbeat_seen,
            output_hash,
            unchanged_secs: unchanged.as_secs(),
            process_alive: input.process_alive,
            terminal_alive: input.terminal_alive,
        }
    }

    /// Drop per-session history for sessions not in `live`.
    pub fn retain(&mut self, live: &HashSet<String>) {
        self.sampler.retain(live);
        self.heartbeat_seen.retain(|id| live.contains(id));
    }
}
