//! Loop scheduler: one session per pending todolist task, strictly in order.
//!
//! For each unchecked task the scheduler persists its progress, launches a
//! session, and waits for that session's promise. The promise wait is the
//! only suspension point; it ends on a promise, on cancellation (the run
//! is persisted as `paused`), on the optional per-task timeout, or when the
//! session fails for good without having published anything. Once a
//! task is settled its checkbox is ticked and its transcript is scanned
//! for capacity exhaustion, which permanently moves the rest of the run to
//! the tool's fallback.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::loop_state::{LoopState, LoopStatus};
use crate::models::promise::{Promise, PromiseStatus};
use crate::models::session::{Session, SessionStatus, SpawnRequest};
use crate::persistence::loop_state_repo::LoopStateRepo;
use crate::persistence::promise_repo::PromiseStore;
use crate::{AppError, Result};

use super::capacity::TranscriptClassifier;
use super::health::hash_sample;
use super::registry::SessionRegistry;
use super::todolist;

/// Trailing output lines scanned for capacity-exhaustion messages.
pub const CAPACITY_SCAN_LINES: usize = 200;

/// Stable loop id for a todolist, derived from its absolute path so a
/// relaunch against the same file resumes the same loop.
#[must_use]
pub fn loop_id_for(todolist: &Path) -> String {
    let path = std::path::absolute(todolist).unwrap_or_else(|_| todolist.to_path_buf());
    let digest = hash_sample(&path.to_string_lossy());
    format!("loop-{}", digest.get(..12).unwrap_or(&digest))
}

/// Starts sessions on behalf of the scheduler.
pub trait SessionLauncher: Send + Sync {
    /// Spawn a session for `request`.
    ///
    /// # Errors
    ///
    /// Returns the spawn failure; the scheduler aborts its run on it.
    fn launch(&self, request: SpawnRequest) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>>;

    /// The last `lines` output lines of a session; empty when unknown.
    fn recent_output(
        &self,
        session_id: &str,
        lines: usize,
    ) -> Pin<Box<dyn Future<Output = Vec<String>> + Send + '_>>;

    /// Current status of a session; `None` once it is no longer tracked.
    fn session_status(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Option<SessionStatus>> + Send + '_>>;
}

impl SessionLauncher for SessionRegistry {
    fn launch(&self, request: SpawnRequest) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + '_>> {
        Box::pin(self.create_session(request))
    }

    fn recent_output(
        &self,
        session_id: &str,
        lines: usize,
    ) -> Pin<Box<dyn Future<Output = Vec<String>> + Send + '_>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.output_lines(&session_id, lines)
                .await
                .unwrap_or_default()
        })
    }

    fn session_status(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = Option<SessionStatus>> + Send + '_>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            self.get_session(&session_id)
                .await
                .ok()
                .map(|session| session.status)
        })
    }
}

/// Parameters of one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOptions {
    /// Identifier under which progress is persisted.
    pub loop_id: String,
    /// Todolist driving the run.
    pub todolist: PathBuf,
    /// Working directory for spawned sessions.
    pub cwd: PathBuf,
    /// Tool for the first task.
    pub tool: String,
    /// Session hosting this scheduler, recorded as every child's parent.
    pub parent_session_id: Option<String>,
    /// Halt on the first `blocked` promise.
    pub stop_on_blocked: bool,
    /// Promise-store poll interval.
    pub poll_interval: Duration,
    /// Per-task wait limit.
    pub task_timeout: Option<Duration>,
}

impl LoopOptions {
    /// Options seeded from the `[loop]` section and the default tool.
    #[must_use]
    pub fn from_config(
        config: &GlobalConfig,
        loop_id: impl Into<String>,
        todolist: impl Into<PathBuf>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            loop_id: loop_id.into(),
            todolist: todolist.into(),
            cwd: cwd.into(),
            tool: config.default_tool.clone(),
            parent_session_id: None,
            stop_on_blocked: config.task_loop.stop_on_blocked,
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
        }
    }
}

/// Why a run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every pending task was settled.
    Completed,
    /// A task reported `blocked` while stop-on-blocked was set.
    Blocked {
        /// Task text.
        task: String,
        /// Session that reported the block.
        session_id: String,
        /// Promise summary.
        summary: String,
    },
    /// Cancelled while waiting; persisted as `paused`.
    Interrupted,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Loop identifier.
    pub loop_id: String,
    /// Tasks settled in this run.
    pub tasks_done: usize,
    /// Pending tasks the run started with.
    pub total: usize,
    /// Tool active when the run ended.
    pub active_tool: String,
    /// Stop reason.
    pub stop: LoopStop,
}

impl LoopOutcome {
    /// Promise a nested run publishes for its hosting session.
    ///
    /// Interrupted runs publish nothing; they are expected to be resumed.
    #[must_use]
    pub fn host_promise(&self, session_id: &str) -> Option<Promise> {
        match self.stop {
            LoopStop::Completed => Some(Promise::new(
                session_id,
                PromiseStatus::Completed,
                format!(
                    "loop {} completed {} of {} tasks",
                    self.loop_id, self.tasks_done, self.total
                ),
            )),
            LoopStop::Blocked {
                ref task,
                ref summary,
                ..
            } => {
                let mut promise = Promise::new(
                    session_id,
                    PromiseStatus::Blocked,
                    format!("loop {} stopped at blocked task: {task}", self.loop_id),
                );
                promise.blockers = Some(vec![summary.clone()]);
                Some(promise)
            }
            LoopStop::Interrupted => None,
        }
    }
}

/// Sequential task-loop scheduler.
pub struct LoopScheduler {
    launcher: Arc<dyn SessionLauncher>,
    promises: PromiseStore,
    states: LoopStateRepo,
    classifier: Arc<dyn TranscriptClassifier>,
    fallbacks: HashMap<String, String>,
}

impl LoopScheduler {
    /// Create a scheduler with no tool fallbacks.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        promises: PromiseStore,
        states: LoopStateRepo,
        classifier: Arc<dyn TranscriptClassifier>,
    ) -> Self {
        Self {
            launcher,
            promises,
            states,
            classifier,
            fallbacks: HashMap::new(),
        }
    }

    /// Use each configured tool's `fallback` on capacity exhaustion.
    #[must_use]
    pub fn with_fallbacks_from(mut self, config: &GlobalConfig) -> Self {
        self.fallbacks = config
            .tools
            .iter()
            .filter_map(|(name, tool)| tool.fallback.clone().map(|next| (name.clone(), next)))
            .collect();
        self
    }

    /// Register one fallback edge.
    #[must_use]
    pub fn with_fallback(mut self, tool: impl Into<String>, fallback: impl Into<String>) -> Self {
        self.fallbacks.insert(tool.into(), fallback.into());
        self
    }

    /// Run every pending task of `options.todolist` in order.
    ///
    /// A paused run of the same loop id resumes with the tool it had
    /// switched to; checked tasks are never revisited.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Todolist` if the list cannot be read,
    /// `AppError::Loop` if a task cannot be spawned or its session fails
    /// or disappears without a promise, `AppError::Timeout`
    /// if a task outlives the timeout, or `AppError::Db`/`AppError::Store`
    /// if progress cannot be persisted. Spawn failures, failed sessions and
    /// timeouts leave the run persisted as `stopped`.
    pub async fn run(&self, options: &LoopOptions, cancel: &CancellationToken) -> Result<LoopOutcome> {
        let span = info_span!("loop_run", loop_id = %options.loop_id);
        self.run_inner(options, cancel).instrument(span).await
    }

    async fn run_inner(&self, options: &LoopOptions, cancel: &CancellationToken) -> Result<LoopOutcome> {
        let tasks = todolist::load_pending(&options.todolist).await?;
        let active_tool = self.resumed_tool(&options.loop_id).await.unwrap_or_else(|| options.tool.clone());

        let mut state = LoopState::new(
            options.loop_id.clone(),
            options.todolist.clone(),
            options.cwd.clone(),
            tasks.len(),
            active_tool,
        );
        let mut exhausted: HashSet<String> = HashSet::new();
        info!(total = tasks.len(), tool = %state.active_tool, "loop started");

        for (index, task) in tasks.iter().enumerate() {
            state.current_index = index;
            state.status = LoopStatus::Running;
            state.current_session_id = None;
            self.states.save(&mut state).await?;

            let request = SpawnRequest {
                tool: state.active_tool.clone(),
                task: task.text.clone(),
                cwd: options.cwd.clone(),
                parent_id: options.parent_session_id.clone(),
            };
            let session = match self.launcher.launch(request).await {
                Ok(session) => session,
                Err(err) => {
                    let reason = format!("spawn failed for task {:?}: {err}", task.text);
                    self.halt(&mut state, LoopStatus::Stopped, &reason).await;
                    return Err(AppError::Loop(reason));
                }
            };
            state.current_session_id = Some(session.id.clone());
            self.states.save(&mut state).await?;
            info!(index, task = %task.text, session_id = %session.id, "task dispatched");

            let promise = match self.wait_for_promise(&session.id, options, cancel).await {
                Ok(Some(promise)) => promise,
                Ok(None) => {
                    self.halt(&mut state, LoopStatus::Paused, "interrupted").await;
                    info!(index, "loop interrupted");
                    return Ok(Self::outcome(&state, index, LoopStop::Interrupted));
                }
                Err(err) => {
                    self.halt(&mut state, LoopStatus::Stopped, &err.to_string()).await;
                    return Err(err);
                }
            };

            if promise.status == PromiseStatus::Blocked {
                if options.stop_on_blocked {
                    let reason = format!("task {:?} blocked: {}", task.text, promise.summary);
                    self.halt(&mut state, LoopStatus::Stopped, &reason).await;
                    info!(index, "loop stopped on blocked task");
                    return Ok(Self::outcome(
                        &state,
                        index,
                        LoopStop::Blocked {
                            task: task.text.clone(),
                            session_id: session.id,
                            summary: promise.summary,
                        },
                    ));
                }
                warn!(index, task = %task.text, summary = %promise.summary, "task blocked, continuing");
            }

            if !todolist::mark_done_in_file(&options.todolist, &task.text).await? {
                warn!(task = %task.text, "unchecked marker not found, todolist left unchanged");
            }

            self.switch_tool_if_exhausted(&mut state, &session.id, &mut exhausted)
                .await;

            state.current_index = index + 1;
            self.states.save(&mut state).await?;
        }

        state.status = LoopStatus::Completed;
        state.current_session_id = None;
        self.states.save(&mut state).await?;
        info!(total = tasks.len(), "loop completed");
        Ok(Self::outcome(&state, tasks.len(), LoopStop::Completed))
    }

    async fn resumed_tool(&self, loop_id: &str) -> Option<String> {
        match self.states.load(loop_id).await {
            Ok(Some(prior)) if !prior.status.is_terminal() => {
                info!(tool = %prior.active_tool, "resuming paused loop");
                Some(prior.active_tool)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(%err, "failed to load prior loop state");
                None
            }
        }
    }

    /// Poll for the session's promise until one appears.
    ///
    /// `Ok(None)` means `cancel` fired first. A failed store read counts as
    /// no promise yet. A session that is `failed` or no longer tracked will
    /// never publish, so it ends the wait with `AppError::Loop`.
    async fn wait_for_promise(
        &self,
        session_id: &str,
        options: &LoopOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<Promise>> {
        let deadline = options.task_timeout.map(|limit| Instant::now() + limit);
        let mut ticker = tokio::time::interval(options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                () = until(deadline) => {
                    return Err(AppError::Timeout(format!(
                        "no promise from session {session_id} within {:?}",
                        options.task_timeout.unwrap_or_default()
                    )));
                }
                _ = ticker.tick() => {
                    match self.promises.get_promise(session_id).await {
                        Ok(Some(promise)) => return Ok(Some(promise)),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(session_id, %err, "promise poll failed");
                            continue;
                        }
                    }
                    match self.launcher.session_status(session_id).await {
                        Some(SessionStatus::Failed) => {
                            return Err(AppError::Loop(format!(
                                "session {session_id} failed without a promise"
                            )));
                        }
                        None => {
                            return Err(AppError::Loop(format!(
                                "session {session_id} is gone without a promise"
                            )));
                        }
                        Some(SessionStatus::Active | SessionStatus::Exited) => {}
                    }
                }
            }
        }
    }

    async fn switch_tool_if_exhausted(
        &self,
        state: &mut LoopState,
        session_id: &str,
        exhausted: &mut HashSet<String>,
    ) {
        let output = self
            .launcher
            .recent_output(session_id, CAPACITY_SCAN_LINES)
            .await
            .join("\n");
        let signal = self.classifier.classify(&state.active_tool, &output);
        if !signal.is_exhausted() {
            return;
        }

        exhausted.insert(state.active_tool.clone());
        match self.fallbacks.get(&state.active_tool) {
            Some(next) if !exhausted.contains(next) => {
                info!(from = %state.active_tool, to = %next, ?signal, "capacity exhausted, switching tool");
                state.active_tool.clone_from(next);
            }
            _ => warn!(tool = %state.active_tool, ?signal, "capacity exhausted, no fallback left"),
        }
    }

    async fn halt(&self, state: &mut LoopState, status: LoopStatus, reason: &str) {
        state.status = status;
        state.reason = Some(reason.to_owned());
        if let Err(err) = self.states.save(state).await {
            warn!(%err, ?status, "failed to persist loop state");
        }
    }

    fn outcome(state: &LoopState, tasks_done: usize, stop: LoopStop) -> LoopOutcome {
        LoopOutcome {
            loop_id: state.loop_id.clone(),
            tasks_done,
            total: state.total,
            active_tool: state.active_tool.clone(),
            stop,
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Block until the persisted loop `loop_id` reaches `completed` or
/// `stopped`.
///
/// A loop that has not persisted anything yet is waited for. Returns
/// `None` if `cancel` fires first.
pub async fn wait_for_loop(
    states: &LoopStateRepo,
    loop_id: &str,
    poll: Duration,
    cancel: &CancellationToken,
) -> Option<LoopState> {
    loop {
        match states.load(loop_id).await {
            Ok(Some(state)) if state.status.is_terminal() => return Some(state),
            Ok(_) => {}
            Err(err) => warn!(loop_id, %err, "loop state read failed"),
        }
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(poll) => {}
        }
    }
}
