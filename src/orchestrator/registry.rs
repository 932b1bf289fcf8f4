//! Session registry.
//!
//! The registry is the single owner of every session record, output buffer
//! and live process handle in this process. One async lock guards the
//! whole map; callers only ever receive clones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::config::GlobalConfig;
use crate::models::session::{Session, SessionStatus, SpawnRequest};
use crate::persistence::crash_repo::CrashRepo;
use crate::persistence::promise_repo::PromiseStore;
use crate::terminal::naming;
use crate::terminal::{ExitEvent, OutputBuffer, ProcessTree, SupervisedProcess, Supervisor};
use crate::{AppError, Result};

use super::exit_monitor::{spawn_exit_monitor, ExitMonitor};

struct Entry {
    session: Session,
    buffer: Arc<StdMutex<OutputBuffer>>,
    process: Option<SupervisedProcess>,
    generation: u64,
}

/// Point-in-time view of one session for health sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProbe {
    /// Session record copy.
    pub session: Session,
    /// Newest output lines plus the partial line.
    pub tail: String,
    /// Whether the primary process is still running.
    pub process_alive: bool,
    /// Whether the PTY is still held open.
    pub terminal_alive: bool,
}

/// Catalog of sessions owned by this process.
#[derive(Clone)]
pub struct SessionRegistry {
    config: Arc<GlobalConfig>,
    supervisor: Arc<Supervisor>,
    sessions: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SessionRegistry {
    /// Create an empty registry whose processes report exits on `exits`.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        tree: Arc<dyn ProcessTree>,
        exits: mpsc::UnboundedSender<ExitEvent>,
    ) -> Self {
        let supervisor = Arc::new(Supervisor::new(Arc::clone(&config), tree, exits));
        Self {
            config,
            supervisor,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a registry together with its exit monitor task.
    ///
    /// The monitor runs until `cancel` fires.
    #[must_use]
    pub fn start(
        config: Arc<GlobalConfig>,
        tree: Arc<dyn ProcessTree>,
        promises: PromiseStore,
        crashes: CrashRepo,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self::new(Arc::clone(&config), tree, tx);
        let monitor = ExitMonitor::new(
            registry.clone(),
            promises,
            crashes,
            config.recovery.max_restarts,
        );
        let handle = spawn_exit_monitor(monitor, rx, cancel);
        (registry, handle)
    }

    /// Spawn a new session for `request`.
    ///
    /// A live session already holding the same terminal name is killed
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown tool, `AppError::Spawn` if
    /// the name is reserved or the process cannot be started.
    pub async fn create_session(&self, request: SpawnRequest) -> Result<Session> {
        let span = info_span!(
            "create_session",
            tool = %request.tool,
            parent_id = ?request.parent_id
        );

        async move {
            self.config.tool(&request.tool)?;
            let name =
                naming::session_name(&self.config.session_prefix, &request.tool, &request.task);
            if naming::is_reserved(&self.config.session_prefix, &name) {
                return Err(AppError::Spawn(format!(
                    "session name {name} is reserved for the coordinator"
                )));
            }

            let replaced: Vec<SupervisedProcess> = {
                let mut sessions = self.sessions.lock().await;
                let ids: Vec<String> = sessions
                    .values()
                    .filter(|entry| entry.session.name == name)
                    .map(|entry| entry.session.id.clone())
                    .collect();
                ids.iter()
                    .filter_map(|id| sessions.remove(id))
                    .filter_map(|entry| entry.process)
                    .collect()
            };
            for process in replaced {
                info!(name, "replacing session with the same name");
                self.supervisor.kill(process).await;
            }

            let mut session = Session::new(name, &request);
            let buffer = Arc::new(StdMutex::new(OutputBuffer::new(
                self.config.scrollback_lines,
            )));

            // Held across the spawn so an instant exit cannot beat the insert.
            let mut sessions = self.sessions.lock().await;
            let process = self.supervisor.spawn(&session, 0, Arc::clone(&buffer))?;
            session.pid = process.pid();
            sessions.insert(
                session.id.clone(),
                Entry {
                    session: session.clone(),
                    buffer,
                    process: Some(process),
                    generation: 0,
                },
            );
            drop(sessions);

            info!(session_id = %session.id, name = %session.name, "session created");
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Copy of one session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the id is unknown.
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    /// Snapshot of every session, oldest first.
    pub async fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    /// Kill a session's process tree and forget the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the id is unknown.
    pub async fn kill_session(&self, session_id: &str) -> Result<()> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;

        if let Some(process) = entry.process {
            self.supervisor.kill(process).await;
        }
        Ok(())
    }

    /// Forward keystrokes to a session's terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id and
    /// `AppError::Terminal` if the terminal is gone or rejects the write.
    pub async fn write(&self, session_id: &str, bytes: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        match entry.process {
            Some(ref mut process) => process.write(bytes),
            None => Err(AppError::Terminal(format!(
                "session {session_id} has no live terminal"
            ))),
        }
    }

    /// The last `n` complete output lines of a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the id is unknown.
    pub async fn output_lines(&self, session_id: &str, n: usize) -> Result<Vec<String>> {
        let buffer = self.buffer(session_id).await?;
        let lines = buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_lines(n);
        Ok(lines)
    }

    /// Sample a session for health evaluation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the id is unknown.
    pub async fn probe(&self, session_id: &str, lines: usize) -> Result<SessionProbe> {
        let (session, buffer, process_alive, terminal_alive) = {
            let sessions = self.sessions.lock().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
            (
                entry.session.clone(),
                Arc::clone(&entry.buffer),
                entry.process.as_ref().is_some_and(SupervisedProcess::is_running),
                entry.process.is_some(),
            )
        };
        let tail = buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tail_text(lines);

        Ok(SessionProbe {
            session,
            tail,
            process_alive,
            terminal_alive,
        })
    }

    /// Kill every tracked session. Returns how many were killed.
    pub async fn close(&self) -> usize {
        let entries: Vec<Entry> = self.sessions.lock().await.drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for entry in entries {
            if let Some(process) = entry.process {
                self.supervisor.kill(process).await;
            }
        }
        info!(count, "session registry closed");
        count
    }

    async fn buffer(&self, session_id: &str) -> Result<Arc<StdMutex<OutputBuffer>>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|entry| Arc::clone(&entry.buffer))
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    /// Apply a natural exit to the current generation of a session.
    ///
    /// Returns the updated record, or `None` when the event is stale, was
    /// caused by a kill, or names a forgotten session.
    pub(crate) async fn record_exit(&self, event: &ExitEvent) -> Option<Session> {
        if event.killed {
            return None;
        }
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(&event.session_id)?;
        if entry.generation != event.generation
            || !entry.session.can_transition_to(SessionStatus::Exited)
        {
            return None;
        }

        entry.process = None;
        entry.session.status = SessionStatus::Exited;
        entry.session.exited_at = Some(event.exited_at);
        entry.session.exit_code = event.exit_code;
        entry.session.pid = None;
        Some(entry.session.clone())
    }

    /// Relaunch an exited session under the same id and name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id or `AppError::Spawn`
    /// if the process cannot be started again.
    pub(crate) async fn restart(&self, session_id: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        if !entry.session.can_transition_to(SessionStatus::Active) {
            return Err(AppError::Spawn(format!(
                "session {session_id} is not in a restartable state"
            )));
        }

        let generation = entry.generation + 1;
        let process = self
            .supervisor
            .spawn(&entry.session, generation, Arc::clone(&entry.buffer))?;

        entry.generation = generation;
        entry.session.restart_count += 1;
        entry.session.status = SessionStatus::Active;
        entry.session.pid = process.pid();
        entry.session.exited_at = None;
        entry.session.exit_code = None;
        entry.process = Some(process);
        Ok(entry.session.clone())
    }

    /// Mark an exited session as permanently failed.
    pub(crate) async fn mark_failed(&self, session_id: &str, at: DateTime<Utc>) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(session_id)?;
        if !entry.session.can_transition_to(SessionStatus::Failed) {
            return None;
        }
        entry.session.status = SessionStatus::Failed;
        entry.session.exited_at.get_or_insert(at);
        Some(entry.session.clone())
    }
}
