//! Unit tests for heartbeat retry backoff.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_conductor::orchestrator::heartbeat::{
    backoff_delay, retry_with_backoff, BASE_BACKOFF, MAX_BACKOFF,
};
use agent_conductor::AppError;

#[test]
fn delay_doubles_without_jitter() {
    assert_eq!(backoff_delay(0, 0.0), BASE_BACKOFF);
    assert_eq!(backoff_delay(1, 0.0), BASE_BACKOFF * 2);
    assert_eq!(backoff_delay(3, 0.0), BASE_BACKOFF * 8);
}

#[test]
fn jitter_adds_at_most_half() {
    let base = backoff_delay(2, 0.0);
    let jittered = backoff_delay(2, 0.999);
    assert!(jittered >= base);
    assert!(jittered <= base + base / 2);
}

#[test]
fn delay_is_capped() {
    for attempt in [6, 10, 31, u32::MAX] {
        assert!(backoff_delay(attempt, 0.99) <= MAX_BACKOFF, "attempt {attempt}");
    }
    assert_eq!(backoff_delay(40, 0.0), MAX_BACKOFF);
}

#[test]
fn non_finite_jitter_is_ignored() {
    assert_eq!(backoff_delay(1, f64::NAN), backoff_delay(1, 0.0));
    assert!(backoff_delay(1, f64::INFINITY) <= MAX_BACKOFF);
}

#[tokio::test(start_paused = true)]
async fn retry_succeeds_after_failures() {
    let cancel = CancellationToken::new();
    let mut calls = 0_u32;
    let value = retry_with_backoff("test op", &cancel, || {
        calls += 1;
        let attempt = calls;
        async move {
            if attempt < 3 {
                Err(AppError::Db("unreachable".into()))
            } else {
                Ok(attempt)
            }
        }
    })
    .await;
    assert_eq!(value, Some(3));
}

#[tokio::test(start_paused = true)]
async fn retry_stops_when_cancelled() {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
    });

    let value: Option<()> = retry_with_backoff("always failing", &cancel, || async {
        Err(AppError::Db("down".into()))
    })
    .await;
    assert!(value.is_none());
}
