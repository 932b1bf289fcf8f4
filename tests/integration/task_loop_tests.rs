//! Integration tests for the loop scheduler.
//!
//! Validates:
//! - Tasks run strictly in todolist order and are ticked off
//! - The next task waits for a promise that arrives late
//! - Blocked promises halt or continue per policy
//! - Capacity exhaustion moves the rest of the run to the fallback tool
//! - Spawn failures, failed sessions, timeouts and cancellation persist
//!   the right status
//! - A paused loop resumes with the tool it had switched to

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_conductor::models::loop_state::{LoopState, LoopStatus};
use agent_conductor::models::promise::PromiseStatus;
use agent_conductor::orchestrator::capacity::PatternClassifier;
use agent_conductor::orchestrator::task_loop::{
    loop_id_for, wait_for_loop, LoopOptions, LoopScheduler, LoopStop,
};
use agent_conductor::persistence::kv_store::KvStore;
use agent_conductor::persistence::loop_state_repo::LoopStateRepo;
use agent_conductor::persistence::promise_repo::PromiseStore;
use agent_conductor::AppError;

use super::test_helpers::{memory_store, ScriptedLauncher};

const TODO: &str = "# Plan\n\n- [ ] A\n- [x] already done\n- [ ] B\n- [ ] C\n";

fn write_todo(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("todo.md");
    std::fs::write(&path, content).expect("write todolist");
    path
}

fn options(loop_id: &str, todolist: PathBuf) -> LoopOptions {
    LoopOptions {
        loop_id: loop_id.to_owned(),
        todolist,
        cwd: std::env::temp_dir(),
        tool: "claude".into(),
        parent_session_id: Some("host-session".into()),
        stop_on_blocked: false,
        poll_interval: Duration::from_millis(10),
        task_timeout: Some(Duration::from_secs(10)),
    }
}

fn classifier() -> Arc<PatternClassifier> {
    let mut classifier = PatternClassifier::default();
    classifier.add("claude", "(?i)usage limit reached").expect("pattern");
    classifier.add("codex", "(?i)rate limit reached").expect("pattern");
    Arc::new(classifier)
}

fn scheduler(kv: &KvStore, launcher: Arc<ScriptedLauncher>) -> LoopScheduler {
    LoopScheduler::new(
        launcher,
        PromiseStore::new(kv.clone()),
        LoopStateRepo::new(kv.clone()),
        classifier(),
    )
}

fn tasks(launcher: &ScriptedLauncher) -> Vec<String> {
    launcher.dispatches().into_iter().map(|(task, _)| task).collect()
}

#[tokio::test]
async fn runs_pending_tasks_in_order() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(ScriptedLauncher::new(PromiseStore::new(kv.clone())));

    let outcome = scheduler(&kv, Arc::clone(&launcher))
        .run(&options("loop-order", todo.clone()), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(outcome.tasks_done, 3);
    assert_eq!(outcome.total, 3);
    assert_eq!(tasks(&launcher), vec!["A", "B", "C"]);
    assert!(launcher
        .launched()
        .iter()
        .all(|request| request.parent_id.as_deref() == Some("host-session")));

    let content = std::fs::read_to_string(&todo).expect("read");
    assert_eq!(content, "# Plan\n\n- [x] A\n- [x] already done\n- [x] B\n- [x] C\n");

    let state = LoopStateRepo::new(kv)
        .load("loop-order")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(state.status, LoopStatus::Completed);
    assert_eq!(state.current_index, 3);
    assert!(state.current_session_id.is_none());

    let promise = outcome.host_promise("host-session").expect("promise");
    assert_eq!(promise.status, PromiseStatus::Completed);
    assert_eq!(promise.session_id, "host-session");
}

#[tokio::test]
async fn next_task_waits_for_late_promise() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let promises = PromiseStore::new(kv.clone());
    let launcher = Arc::new(
        ScriptedLauncher::new(promises.clone()).with_delay("A", Duration::from_millis(400)),
    );
    let scheduler = scheduler(&kv, Arc::clone(&launcher));
    let opts = options("loop-late", todo.clone());
    let cancel = CancellationToken::new();

    let midway = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let promised = promises.get_promises().await.expect("promises").len();
        (tasks(&launcher), promised)
    };
    let (outcome, (launched_midway, promised_midway)) =
        tokio::join!(scheduler.run(&opts, &cancel), midway);

    assert_eq!(launched_midway, vec!["A"]);
    assert_eq!(promised_midway, 0);
    let outcome = outcome.expect("run");
    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(tasks(&launcher), vec!["A", "B", "C"]);
    assert_eq!(promises.get_promises().await.expect("promises").len(), 3);
}

#[tokio::test]
async fn empty_todolist_completes_immediately() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), "- [x] nothing left\n");
    let launcher = Arc::new(ScriptedLauncher::new(PromiseStore::new(kv.clone())));

    let outcome = scheduler(&kv, Arc::clone(&launcher))
        .run(&options("loop-empty", todo), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(outcome.total, 0);
    assert!(launcher.launched().is_empty());
}

#[tokio::test]
async fn blocked_task_halts_when_configured() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone()))
            .with_outcome("B", PromiseStatus::Blocked),
    );
    let mut opts = options("loop-blocked", todo.clone());
    opts.stop_on_blocked = true;

    let outcome = scheduler(&kv, Arc::clone(&launcher))
        .run(&opts, &CancellationToken::new())
        .await
        .expect("run");

    match outcome.stop {
        LoopStop::Blocked { ref task, .. } => assert_eq!(task, "B"),
        ref other => panic!("expected blocked stop, got {other:?}"),
    }
    assert_eq!(outcome.tasks_done, 1);
    assert_eq!(tasks(&launcher), vec!["A", "B"]);

    let content = std::fs::read_to_string(&todo).expect("read");
    assert!(content.contains("- [x] A"));
    assert!(content.contains("- [ ] B"));
    assert!(content.contains("- [ ] C"));

    let state = LoopStateRepo::new(kv)
        .load("loop-blocked")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(state.status, LoopStatus::Stopped);
    assert!(state.reason.as_deref().is_some_and(|r| r.contains("\"B\"")));

    let host = outcome.host_promise("host").expect("promise");
    assert_eq!(host.status, PromiseStatus::Blocked);
    assert_eq!(host.blockers.map(|b| b.len()), Some(1));
}

#[tokio::test]
async fn blocked_task_is_skipped_when_not_halting() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone()))
            .with_outcome("B", PromiseStatus::Blocked),
    );

    let outcome = scheduler(&kv, Arc::clone(&launcher))
        .run(&options("loop-continue", todo.clone()), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(tasks(&launcher), vec!["A", "B", "C"]);
    let content = std::fs::read_to_string(&todo).expect("read");
    assert!(!content.contains("[ ]"));
}

#[tokio::test]
async fn capacity_exhaustion_switches_remaining_tasks_to_fallback() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone()))
            .with_transcript("claude", "Claude usage limit reached, resets at 5pm"),
    );

    let outcome = scheduler(&kv, Arc::clone(&launcher))
        .with_fallback("claude", "codex")
        .run(&options("loop-capacity", todo), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(
        launcher.dispatches(),
        vec![
            ("A".to_owned(), "claude".to_owned()),
            ("B".to_owned(), "codex".to_owned()),
            ("C".to_owned(), "codex".to_owned()),
        ]
    );
    assert_eq!(outcome.active_tool, "codex");
}

#[tokio::test]
async fn exhausted_tools_are_never_switched_back_to() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone()))
            .with_transcript("claude", "usage limit reached")
            .with_transcript("codex", "rate limit reached"),
    );

    let outcome = scheduler(&kv, Arc::clone(&launcher))
        .with_fallback("claude", "codex")
        .with_fallback("codex", "claude")
        .run(&options("loop-cycle", todo), &CancellationToken::new())
        .await
        .expect("run");

    let tools: Vec<String> = launcher.dispatches().into_iter().map(|(_, tool)| tool).collect();
    assert_eq!(tools, vec!["claude", "codex", "codex"]);
    assert_eq!(outcome.active_tool, "codex");
}

#[tokio::test]
async fn spawn_failure_stops_the_loop() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone())).with_failure("B"),
    );

    let err = scheduler(&kv, Arc::clone(&launcher))
        .run(&options("loop-spawn", todo.clone()), &CancellationToken::new())
        .await
        .expect_err("spawn failure");

    assert!(matches!(err, AppError::Loop(_)));
    assert_eq!(tasks(&launcher), vec!["A", "B"]);
    let state = LoopStateRepo::new(kv)
        .load("loop-spawn")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(state.status, LoopStatus::Stopped);
    assert_eq!(state.current_index, 1);
    assert!(std::fs::read_to_string(&todo).expect("read").contains("- [ ] B"));
}

#[tokio::test]
async fn failed_session_stops_the_loop_without_timeout() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone())).with_failed_session("B"),
    );
    let mut opts = options("loop-failed", todo.clone());
    opts.task_timeout = None;

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler(&kv, Arc::clone(&launcher)).run(&opts, &CancellationToken::new()),
    )
    .await
    .expect("scheduler settles a failed session")
    .expect_err("failed session");

    assert!(matches!(err, AppError::Loop(_)));
    assert_eq!(tasks(&launcher), vec!["A", "B"]);
    let state = LoopStateRepo::new(kv)
        .load("loop-failed")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(state.status, LoopStatus::Stopped);
    assert_eq!(state.current_index, 1);
    assert!(state.reason.expect("reason").contains("failed without a promise"));
    assert!(std::fs::read_to_string(&todo).expect("read").contains("- [ ] B"));
}

#[tokio::test]
async fn silent_task_times_out() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), "- [ ] quiet\n");
    let launcher = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone())).with_silent("quiet"),
    );
    let mut opts = options("loop-timeout", todo);
    opts.task_timeout = Some(Duration::from_millis(100));

    let err = scheduler(&kv, launcher)
        .run(&opts, &CancellationToken::new())
        .await
        .expect_err("timeout");

    assert!(matches!(err, AppError::Timeout(_)));
    let state = LoopStateRepo::new(kv)
        .load("loop-timeout")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(state.status, LoopStatus::Stopped);
    assert!(state.current_session_id.is_some());
}

#[tokio::test]
async fn cancelled_loop_pauses_and_resumes_with_switched_tool() {
    let kv = memory_store().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let todo = write_todo(dir.path(), TODO);

    // First run: A exhausts claude, B never answers, the run is cancelled.
    let first = Arc::new(
        ScriptedLauncher::new(PromiseStore::new(kv.clone()))
            .with_transcript("claude", "usage limit reached")
            .with_silent("B"),
    );
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });
    let outcome = scheduler(&kv, Arc::clone(&first))
        .with_fallback("claude", "codex")
        .run(&options("loop-resume", todo.clone()), &cancel)
        .await
        .expect("first run");

    assert_eq!(outcome.stop, LoopStop::Interrupted);
    assert!(outcome.host_promise("host").is_none());
    let paused = LoopStateRepo::new(kv.clone())
        .load("loop-resume")
        .await
        .expect("load")
        .expect("persisted");
    assert_eq!(paused.status, LoopStatus::Paused);
    assert_eq!(paused.active_tool, "codex");

    // Second run picks up at B with the fallback tool.
    let second = Arc::new(ScriptedLauncher::new(PromiseStore::new(kv.clone())));
    let outcome = scheduler(&kv, Arc::clone(&second))
        .with_fallback("claude", "codex")
        .run(&options("loop-resume", todo.clone()), &CancellationToken::new())
        .await
        .expect("second run");

    assert_eq!(outcome.stop, LoopStop::Completed);
    assert_eq!(
        second.dispatches(),
        vec![
            ("B".to_owned(), "codex".to_owned()),
            ("C".to_owned(), "codex".to_owned()),
        ]
    );
    assert!(!std::fs::read_to_string(&todo).expect("read").contains("[ ]"));
}

#[tokio::test]
async fn wait_for_loop_returns_once_terminal() {
    let kv = memory_store().await;
    let states = LoopStateRepo::new(kv.clone());

    let waiter = {
        let states = states.clone();
        tokio::spawn(async move {
            wait_for_loop(
                &states,
                "loop-wait",
                Duration::from_millis(10),
                &CancellationToken::new(),
            )
            .await
        })
    };

    let mut state = LoopState::new(
        "loop-wait".into(),
        PathBuf::from("todo.md"),
        PathBuf::from("."),
        1,
        "claude".into(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    states.save(&mut state).await.expect("save running");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    state.status = LoopStatus::Completed;
    states.save(&mut state).await.expect("save completed");

    let finished = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter finished")
        .expect("join")
        .expect("terminal state");
    assert_eq!(finished.status, LoopStatus::Completed);
}

#[tokio::test]
async fn wait_for_loop_honours_cancellation() {
    let kv = memory_store().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = wait_for_loop(
        &LoopStateRepo::new(kv),
        "never-started",
        Duration::from_millis(10),
        &cancel,
    )
    .await;
    assert!(result.is_none());
}

#[test]
fn loop_id_is_stable_per_path() {
    let a = loop_id_for(Path::new("/work/todo.md"));
    assert_eq!(a, loop_id_for(Path::new("/work/todo.md")));
    assert_ne!(a, loop_id_for(Path::new("/work/other.md")));
    assert!(a.starts_with("loop-"));
    assert_eq!(a.len(), "loop-".len() + 12);
}
