//! Heartbeat publisher.
//!
//! Runs inside the supervised process and periodically writes a
//! [`HeartbeatRecord`] about that process. Store failures never stop the
//! publisher: it backs off exponentially with jitter, capped at
//! [`MAX_BACKOFF`], and keeps trying until cancelled.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::heartbeat::{HeartbeatRecord, UsageMetrics};
use crate::persistence::heartbeat_repo::HeartbeatRepo;
use crate::Result;

/// First retry delay after a failure.
pub const BASE_BACKOFF: Duration = Duration::from_millis(500);
/// Upper bound on any retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (0-based).
///
/// `jitter` in `[0, 1)` adds up to half the exponential delay on top.
/// The result never exceeds [`MAX_BACKOFF`].
#[must_use]
pub fn backoff_delay(attempt: u32, jitter: f64) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(2_u32.saturating_pow(attempt.min(16)));
    let exp = exp.min(MAX_BACKOFF);
    let jitter = if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let extra = exp.mul_f64(jitter / 2.0);
    exp.saturating_add(extra).min(MAX_BACKOFF)
}

fn jittered_backoff(attempt: u32) -> Duration {
    backoff_delay(attempt, rand::thread_rng().gen_range(0.0..1.0))
}

/// Run `op` until it succeeds or `cancel` fires, backing off between
/// failures. Returns `None` only when cancelled.
pub async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(what, attempts = attempt + 1, "store reachable again");
                }
                return Some(value);
            }
            Err(err) => {
                let delay = jittered_backoff(attempt);
                warn!(what, %err, attempt, ?delay, "store operation failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    () = cancel.cancelled() => return None,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Periodic writer of one session's heartbeat.
pub struct HeartbeatPublisher {
    repo: HeartbeatRepo,
    session_id: String,
    status: String,
    interval: Duration,
}

impl HeartbeatPublisher {
    /// Create a publisher for `session_id` tagging records with `status`.
    #[must_use]
    pub fn new(
        repo: HeartbeatRepo,
        session_id: impl Into<String>,
        status: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            repo,
            session_id: session_id.into(),
            status: status.into(),
            interval,
        }
    }

    /// Build the next record, with this process's resident memory when
    /// the platform exposes it.
    #[must_use]
    pub fn record(&self) -> HeartbeatRecord {
        let mut record = HeartbeatRecord::now(&self.session_id, &self.status);
        if let Some(memory_kb) = resident_memory_kb() {
            record.usage = Some(UsageMetrics {
                memory_kb: Some(memory_kb),
                ..UsageMetrics::default()
            });
        }
        record
    }

    /// Publish one heartbeat, retrying through store failures.
    ///
    /// Returns `false` if cancelled before the write succeeded.
    pub async fn publish_once(&self, cancel: &CancellationToken) -> bool {
        let published = retry_with_backoff("heartbeat publish", cancel, || {
            let record = self.record();
            async move { self.repo.publish(&record).await }
        })
        .await;
        if published.is_some() {
            debug!(session_id = self.session_id, "heartbeat published");
        }
        published.is_some()
    }

    /// Publish immediately and then every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            session_id = self.session_id,
            interval_secs = self.interval.as_secs(),
            "heartbeat publisher started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.publish_once(&cancel).await {
                        break;
                    }
                }
            }
        }
        info!(session_id = self.session_id, "heartbeat publisher stopped");
    }
}

#[cfg(target_os = "linux")]
fn resident_memory_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_kb() -> Option<u64> {
    None
}
