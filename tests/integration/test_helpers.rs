//! Shared helpers for integration tests.
//!
//! Provides an in-memory store, a shell-backed test configuration and a
//! scripted [`SessionLauncher`] that publishes promises without spawning
//! any process.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_conductor::config::GlobalConfig;
use agent_conductor::models::promise::{Promise, PromiseStatus};
use agent_conductor::models::session::{Session, SessionStatus, SpawnRequest};
use agent_conductor::orchestrator::task_loop::SessionLauncher;
use agent_conductor::persistence::db;
use agent_conductor::persistence::kv_store::KvStore;
use agent_conductor::persistence::promise_repo::PromiseStore;
use agent_conductor::{AppError, Result};

/// Fresh private in-memory store.
pub async fn memory_store() -> KvStore {
    KvStore::new(Arc::new(db::connect_memory().await.expect("in-memory db")))
}

/// Configuration whose default tool runs its task through `/bin/sh -c`.
pub fn shell_config(store_dir: &Path, max_restarts: u32) -> GlobalConfig {
    let toml = format!(
        r#"
store_path = '{store}'
default_tool = "sh"
scrollback_lines = 200
kill_grace_ms = 100

[tools.sh]
command = "/bin/sh"
args = ["-c"]

[tools.coordinator]
command = "/bin/sh"
args = ["-c"]

[recovery]
max_restarts = {max_restarts}
"#,
        store = store_dir.join("store.db").display(),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// Poll `check` every 20ms until it returns `Some` or `limit` elapses.
pub async fn eventually<T, F, Fut>(limit: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Launcher that answers every task with a promise from a script.
pub struct ScriptedLauncher {
    promises: PromiseStore,
    outcomes: HashMap<String, PromiseStatus>,
    silent: HashSet<String>,
    failing: HashSet<String>,
    failed: HashSet<String>,
    delays: HashMap<String, Duration>,
    transcripts: HashMap<String, String>,
    sessions: Mutex<HashMap<String, SpawnRequest>>,
    launched: Mutex<Vec<SpawnRequest>>,
}

impl ScriptedLauncher {
    /// Every task completes unless scripted otherwise.
    pub fn new(promises: PromiseStore) -> Self {
        Self {
            promises,
            outcomes: HashMap::new(),
            silent: HashSet::new(),
            failing: HashSet::new(),
            failed: HashSet::new(),
            delays: HashMap::new(),
            transcripts: HashMap::new(),
            sessions: Mutex::new(HashMap::new()),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Answer `task` with `status` instead of `completed`.
    pub fn with_outcome(mut self, task: &str, status: PromiseStatus) -> Self {
        self.outcomes.insert(task.to_owned(), status);
        self
    }

    /// Never publish a promise for `task`.
    pub fn with_silent(mut self, task: &str) -> Self {
        self.silent.insert(task.to_owned());
        self
    }

    /// Fail to launch `task`.
    pub fn with_failure(mut self, task: &str) -> Self {
        self.failing.insert(task.to_owned());
        self
    }

    /// The session for `task` ends up `failed` and never publishes.
    pub fn with_failed_session(mut self, task: &str) -> Self {
        self.failed.insert(task.to_owned());
        self
    }

    /// Publish the promise for `task` from a background task after `delay`.
    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_owned(), delay);
        self
    }

    /// Every session run by `tool` prints `text`.
    pub fn with_transcript(mut self, tool: &str, text: &str) -> Self {
        self.transcripts.insert(tool.to_owned(), text.to_owned());
        self
    }

    /// Requests received so far, in order.
    pub fn launched(&self) -> Vec<SpawnRequest> {
        self.launched.lock().expect("lock").clone()
    }

    /// `(task, tool)` pairs received so far, in order.
    pub fn dispatches(&self) -> Vec<(String, String)> {
        self.launched()
            .into_iter()
            .map(|request| (request.task, request.tool))
            .collect()
    }
}

impl SessionLauncher for ScriptedLauncher {
    fn launch(
        &self,
        request: SpawnRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>> {
        Box::pin(async move {
            self.launched.lock().expect("lock").push(request.clone());
            if self.failing.contains(&request.task) {
                return Err(AppError::Spawn(format!("cannot start {}", request.task)));
            }

            let session = Session::new(format!("test-{}", request.task), &request);
            self.sessions
                .lock()
                .expect("lock")
                .insert(session.id.clone(), request.clone());

            if self.silent.contains(&request.task) || self.failed.contains(&request.task) {
                return Ok(session);
            }
            let status = self
                .outcomes
                .get(&request.task)
                .copied()
                .unwrap_or(PromiseStatus::Completed);
            let summary = format!("{} finished as {status:?}", request.task);
            let promise = Promise::new(&session.id, status, summary);
            match self.delays.get(&request.task).copied() {
                Some(delay) => {
                    let promises = self.promises.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        promises.set_promise(&promise).await.expect("deferred promise");
                    });
                }
                None => self.promises.set_promise(&promise).await?,
            }
            Ok(session)
        })
    }

    fn recent_output(
        &self,
        session_id: &str,
        _lines: usize,
    ) -> Pin<Box<dyn Future<Output = Vec<String>> + Send + '_>> {
        let tool = self
            .sessions
            .lock()
            .expect("lock")
            .get(session_id)
            .map(|request| request.tool.clone());
        let text = tool.and_then(|tool| self.transcripts.get(&tool).cloned());
        Box::pin(async move { text.into_iter().collect() })
    }

    fn session_status(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Option<SessionStatus>> + Send + '_>> {
        let status = self
            .sessions
            .lock()
            .expect("lock")
            .get(session_id)
            .map(|request| {
                if self.failed.contains(&request.task) {
                    SessionStatus::Failed
                } else {
                    SessionStatus::Active
                }
            });
        Box::pin(async move { status })
    }
}
