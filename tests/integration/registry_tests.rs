//! Integration tests for PTY-hosted sessions.
//!
//! Each test drives `/bin/sh -c <task>` through the registry, so they only
//! run on Unix.
//!
//! Validates:
//! - Output reaches the scrollback and input reaches the process
//! - Kill removes the session without recording a crash
//! - Crashes restart until the budget is spent, then fail
//! - A loop whose task session fails stops instead of waiting forever
//! - An exit after a promise is a normal finish
//! - Health sweeps classify live sessions from the store

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use agent_conductor::models::health::{HealthStatus, HeartbeatHealth};
use agent_conductor::models::heartbeat::HeartbeatRecord;
use agent_conductor::models::promise::{Promise, PromiseStatus};
use agent_conductor::models::session::{SessionStatus, SpawnRequest};
use agent_conductor::models::loop_state::LoopStatus;
use agent_conductor::orchestrator::capacity::PatternClassifier;
use agent_conductor::orchestrator::health::{HealthEvaluator, HealthThresholds};
use agent_conductor::orchestrator::health_monitor::HealthMonitor;
use agent_conductor::orchestrator::registry::SessionRegistry;
use agent_conductor::orchestrator::task_loop::{LoopOptions, LoopScheduler};
use agent_conductor::persistence::crash_repo::CrashRepo;
use agent_conductor::persistence::health_repo::HealthRepo;
use agent_conductor::persistence::heartbeat_repo::HeartbeatRepo;
use agent_conductor::persistence::kv_store::KvStore;
use agent_conductor::persistence::loop_state_repo::LoopStateRepo;
use agent_conductor::persistence::promise_repo::PromiseStore;
use agent_conductor::terminal::PsProcessTree;
use agent_conductor::AppError;

use super::test_helpers::{eventually, memory_store, shell_config};

const WAIT: Duration = Duration::from_secs(10);

struct Fixture {
    kv: KvStore,
    registry: SessionRegistry,
    cancel: CancellationToken,
    dir: tempfile::TempDir,
}

impl Fixture {
    async fn new(max_restarts: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let kv = memory_store().await;
        let cancel = CancellationToken::new();
        let (registry, _monitor) = SessionRegistry::start(
            Arc::new(shell_config(dir.path(), max_restarts)),
            Arc::new(PsProcessTree),
            PromiseStore::new(kv.clone()),
            CrashRepo::new(kv.clone()),
            cancel.clone(),
        );
        Self {
            kv,
            registry,
            cancel,
            dir,
        }
    }

    async fn shutdown(self) {
        self.registry.close().await;
        self.cancel.cancel();
    }
}

fn shell(task: &str) -> SpawnRequest {
    SpawnRequest {
        tool: "sh".into(),
        task: task.into(),
        cwd: std::env::temp_dir(),
        parent_id: None,
    }
}

async fn output_contains(registry: &SessionRegistry, session_id: &str, needle: &str) -> bool {
    eventually(WAIT, || async {
        registry
            .output_lines(session_id, 200)
            .await
            .ok()
            .filter(|lines| lines.iter().any(|line| line.contains(needle)))
    })
    .await
    .is_some()
}

async fn status_becomes(registry: &SessionRegistry, session_id: &str, status: SessionStatus) -> bool {
    eventually(WAIT, || async {
        registry
            .get_session(session_id)
            .await
            .ok()
            .filter(|session| session.status == status)
    })
    .await
    .is_some()
}

#[tokio::test]
async fn session_output_is_captured() {
    let fx = Fixture::new(0).await;
    let session = fx
        .registry
        .create_session(shell("echo conductor-ready; sleep 30"))
        .await
        .expect("spawn");

    assert!(session.name.starts_with("conductor-sh-"));
    assert!(session.pid.is_some());
    assert!(output_contains(&fx.registry, &session.id, "conductor-ready").await);

    let probe = fx.registry.probe(&session.id, 10).await.expect("probe");
    assert!(probe.process_alive);
    assert!(probe.terminal_alive);
    assert!(probe.tail.contains("conductor-ready"));

    fx.shutdown().await;
}

#[tokio::test]
async fn input_reaches_the_process() {
    let fx = Fixture::new(0).await;
    let session = fx
        .registry
        .create_session(shell("read line; echo got-$line; sleep 30"))
        .await
        .expect("spawn");

    fx.registry
        .write(&session.id, b"ping\n")
        .await
        .expect("write");
    assert!(output_contains(&fx.registry, &session.id, "got-ping").await);

    fx.shutdown().await;
}

#[tokio::test]
async fn kill_forgets_session_without_crash() {
    let fx = Fixture::new(3).await;
    let session = fx
        .registry
        .create_session(shell("sleep 30"))
        .await
        .expect("spawn");

    fx.registry.kill_session(&session.id).await.expect("kill");
    assert!(matches!(
        fx.registry.get_session(&session.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        fx.registry.kill_session(&session.id).await,
        Err(AppError::NotFound(_))
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let crashes = CrashRepo::new(fx.kv.clone());
    assert!(crashes.crash_events(&session.id).await.expect("events").is_empty());

    fx.shutdown().await;
}

#[tokio::test]
async fn crash_restarts_then_fails() {
    let fx = Fixture::new(1).await;
    let session = fx
        .registry
        .create_session(shell("exit 3"))
        .await
        .expect("spawn");

    assert!(status_becomes(&fx.registry, &session.id, SessionStatus::Failed).await);
    let failed = fx.registry.get_session(&session.id).await.expect("session");
    assert_eq!(failed.restart_count, 1);

    let crashes = CrashRepo::new(fx.kv.clone());
    let events = crashes.crash_events(&session.id).await.expect("events");
    assert_eq!(events.len(), 2);
    assert!(events[0].will_restart);
    assert!(!events[1].will_restart);
    assert!(events[0].reason.contains("before publishing a promise"));

    let state = crashes
        .load_state(&session.id)
        .await
        .expect("state")
        .expect("present");
    assert_eq!(state.restart_count, 1);
    assert_eq!(state.max_restarts, 1);

    fx.shutdown().await;
}

#[tokio::test]
async fn failed_task_session_stops_the_loop() {
    let fx = Fixture::new(0).await;
    let todo = fx.dir.path().join("todo.md");
    std::fs::write(&todo, "- [ ] exit 1\n- [ ] echo never\n").expect("write todolist");
    let options = LoopOptions {
        loop_id: "loop-crash".into(),
        todolist: todo.clone(),
        cwd: std::env::temp_dir(),
        tool: "sh".into(),
        parent_session_id: None,
        stop_on_blocked: false,
        poll_interval: Duration::from_millis(20),
        task_timeout: None,
    };
    let scheduler = LoopScheduler::new(
        Arc::new(fx.registry.clone()),
        PromiseStore::new(fx.kv.clone()),
        LoopStateRepo::new(fx.kv.clone()),
        Arc::new(PatternClassifier::default()),
    );

    let err = tokio::time::timeout(WAIT, scheduler.run(&options, &CancellationToken::new()))
        .await
        .expect("scheduler settles the failed session")
        .expect_err("failed session");
    assert!(matches!(err, AppError::Loop(_)));

    let sessions = fx.registry.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);

    let state = LoopStateRepo::new(fx.kv.clone())
        .load("loop-crash")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(state.status, LoopStatus::Stopped);
    assert_eq!(state.current_index, 0);
    let content = std::fs::read_to_string(&todo).expect("read");
    assert!(content.contains("- [ ] exit 1"));
    assert!(content.contains("- [ ] echo never"));

    fx.shutdown().await;
}

#[tokio::test]
async fn exit_after_promise_is_not_a_crash() {
    let fx = Fixture::new(3).await;
    let session = fx
        .registry
        .create_session(shell("sleep 1"))
        .await
        .expect("spawn");
    PromiseStore::new(fx.kv.clone())
        .set_promise(&Promise::new(&session.id, PromiseStatus::Completed, "done"))
        .await
        .expect("promise");

    assert!(status_becomes(&fx.registry, &session.id, SessionStatus::Exited).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let exited = fx.registry.get_session(&session.id).await.expect("session");
    assert_eq!(exited.status, SessionStatus::Exited);
    assert_eq!(exited.restart_count, 0);
    assert!(CrashRepo::new(fx.kv.clone())
        .crash_events(&session.id)
        .await
        .expect("events")
        .is_empty());

    fx.shutdown().await;
}

#[tokio::test]
async fn same_name_replaces_previous_session() {
    let fx = Fixture::new(0).await;
    let first = fx
        .registry
        .create_session(shell("sleep 30"))
        .await
        .expect("spawn");
    let second = fx
        .registry
        .create_session(shell("sleep 30"))
        .await
        .expect("respawn");

    assert_eq!(first.name, second.name);
    let ids: Vec<String> = fx
        .registry
        .list_sessions()
        .await
        .into_iter()
        .map(|session| session.id)
        .collect();
    assert_eq!(ids, vec![second.id]);

    fx.shutdown().await;
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let fx = Fixture::new(0).await;

    let mut unknown = shell("x");
    unknown.tool = "missing".into();
    assert!(matches!(
        fx.registry.create_session(unknown).await,
        Err(AppError::Config(_))
    ));

    let mut reserved = shell("anything");
    reserved.tool = "coordinator".into();
    assert!(matches!(
        fx.registry.create_session(reserved).await,
        Err(AppError::Spawn(_))
    ));

    let mut bad_cwd = shell("true");
    bad_cwd.cwd = PathBuf::from("/nonexistent/conductor/cwd");
    assert!(fx.registry.create_session(bad_cwd).await.is_err());

    assert!(fx.registry.list_sessions().await.is_empty());
    fx.shutdown().await;
}

#[tokio::test]
async fn health_sweep_classifies_live_session() {
    let fx = Fixture::new(0).await;
    let session = fx
        .registry
        .create_session(shell("echo hi; sleep 30"))
        .await
        .expect("spawn");
    let heartbeats = HeartbeatRepo::new(fx.kv.clone(), Duration::from_secs(600));
    let health = HealthRepo::new(fx.kv.clone());
    let mut monitor = HealthMonitor::new(
        fx.registry.clone(),
        heartbeats.clone(),
        health.clone(),
        HealthEvaluator::new(HealthThresholds::default()),
        20,
    );

    let (results, summary) = monitor.sweep().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].heartbeat, HeartbeatHealth::Dead);
    assert_eq!(results[0].resolve(), HealthStatus::Dead);
    assert_eq!(summary.dead, 1);

    heartbeats
        .publish(&HeartbeatRecord::now(&session.id, "working"))
        .await
        .expect("heartbeat");
    let (results, summary) = monitor.sweep().await;
    assert_eq!(results[0].resolve(), HealthStatus::Healthy);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.total(), 1);

    let stored = health.get_check(&session.id).await.expect("read").expect("stored");
    assert_eq!(stored.heartbeat, HeartbeatHealth::Healthy);
    assert!(health.get_summary().await.expect("read").is_some_and(|s| s.healthy == 1));
    assert!(stored.checked_at <= Utc::now());

    assert_eq!(fx.registry.close().await, 1);
    fx.cancel.cancel();
}
