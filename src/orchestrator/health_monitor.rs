//! Periodic health sweep over the session registry.
//!
//! Every sweep evaluates each registry session, stores its
//! [`HealthCheckResult`] and replaces the aggregate [`HealthSummary`].
//! The monitor reads heartbeats through the store only and never calls
//! into the publisher.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::health::{HealthCheckResult, HealthSummary};
use crate::persistence::health_repo::HealthRepo;
use crate::persistence::heartbeat_repo::HeartbeatRepo;

use super::health::{HealthEvaluator, HealthInput};
use super::registry::SessionRegistry;

/// Dependencies and state of the health sweep.
pub struct HealthMonitor {
    registry: SessionRegistry,
    heartbeats: HeartbeatRepo,
    health: HealthRepo,
    evaluator: HealthEvaluator,
    sample_lines: usize,
}

impl HealthMonitor {
    /// Build a monitor sampling `sample_lines` trailing lines per session.
    #[must_use]
    pub fn new(
        registry: SessionRegistry,
        heartbeats: HeartbeatRepo,
        health: HealthRepo,
        evaluator: HealthEvaluator,
        sample_lines: usize,
    ) -> Self {
        Self {
            registry,
            heartbeats,
            health,
            evaluator,
            sample_lines,
        }
    }

    /// Evaluate every session once and persist the results.
    pub async fn sweep(&mut self) -> (Vec<HealthCheckResult>, HealthSummary) {
        let now = Utc::now();
        let sessions = self.registry.list_sessions().await;
        let live: HashSet<String> = sessions.iter().map(|s| s.id.clone()).collect();
        self.evaluator.retain(&live);

        let mut results = Vec::with_capacity(sessions.len());
        let mut summary = HealthSummary::default();

        for session in sessions {
            // A session killed between the listing and the probe is skipped.
            let Ok(probe) = self.registry.probe(&session.id, self.sample_lines).await else {
                continue;
            };
            let heartbeat = self.heartbeats.latest_or_absent(&session.id).await;
            let input = HealthInput {
                session_id: session.id.clone(),
                heartbeat,
                output_tail: Some(probe.tail),
                process_alive: probe.process_alive,
                terminal_alive: probe.terminal_alive,
            };

            let result = self.evaluator.evaluate(input, now);
            let status = result.resolve();
            summary.record(status);
            debug!(session_id = %session.id, status = status.as_str(), "health evaluated");

            if let Err(err) = self.health.store_check(&result).await {
                warn!(session_id = %session.id, %err, "failed to store health check");
            }
            results.push(result);
        }

        summary.updated_at = Some(now);
        if let Err(err) = self.health.store_summary(&summary).await {
            warn!(%err, "failed to store health summary");
        }

        (results, summary)
    }
}

/// Spawn the periodic health sweep.
///
/// Sweeps every `interval` until `cancel` fires.
#[must_use]
pub fn spawn_health_monitor(
    mut monitor: HealthMonitor,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("health monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let (results, summary) = monitor.sweep().await;
                        debug!(
                            sessions = results.len(),
                            healthy = summary.healthy,
                            dead = summary.dead,
                            stuck = summary.stuck,
                            "health sweep finished"
                        );
                    }
                }
            }
        }
        .instrument(info_span!("health_monitor")),
    )
}
