//! Key shapes and expiries of the shared keyed store.

use std::time::Duration;

/// Notification channel carrying heartbeat JSON.
pub const HEARTBEAT_CHANNEL: &str = "heartbeats";
/// Notification channel carrying promise JSON.
pub const PROMISE_CHANNEL: &str = "promises";

/// Singleton key for the aggregate health counts.
pub const HEALTH_SUMMARY: &str = "health-summary";

/// Promise expiry.
pub const PROMISE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Health-check expiry.
pub const HEALTH_CHECK_TTL: Duration = Duration::from_secs(10 * 60);
/// Health-summary expiry.
pub const HEALTH_SUMMARY_TTL: Duration = Duration::from_secs(5 * 60);
/// Session-state expiry.
pub const SESSION_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Crash-event list expiry.
pub const CRASH_EVENTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Prefix shared by every promise key.
pub const PROMISE_PREFIX: &str = "promise:";
/// Prefix shared by every loop-state key.
pub const LOOP_PREFIX: &str = "loop:";

/// Heartbeat key for a session.
#[must_use]
pub fn heartbeat(session_id: &str) -> String {
    format!("heartbeat:{session_id}")
}

/// Promise key for a session.
#[must_use]
pub fn promise(session_id: &str) -> String {
    format!("{PROMISE_PREFIX}{session_id}")
}

/// Health-check key for a session.
#[must_use]
pub fn health_check(session_id: &str) -> String {
    format!("health:{session_id}")
}

/// Crash-recovery metadata key for a session.
#[must_use]
pub fn session_state(session_id: &str) -> String {
    format!("session-state:{session_id}")
}

/// Crash-event list key for a session.
#[must_use]
pub fn crash_events(session_id: &str) -> String {
    format!("crash-events:{session_id}")
}

/// Loop-state key.
#[must_use]
pub fn loop_state(loop_id: &str) -> String {
    format!("{LOOP_PREFIX}{loop_id}")
}
