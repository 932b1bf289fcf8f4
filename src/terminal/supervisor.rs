//! Process supervisor.
//!
//! Each session's tool runs as the primary process of its own PTY. A
//! dedicated OS thread drains the PTY into the session's [`OutputBuffer`]
//! and, once the stream ends, reaps the process and reports an
//! [`ExitEvent`] on the supervisor's exit channel. Killing a session walks
//! the whole process tree so helpers started by the tool do not outlive it.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use portable_pty::{ChildKiller, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::session::Session;
use crate::{AppError, Result};

use super::buffer::OutputBuffer;
use super::process_tree::ProcessTree;
use super::pty::{pump_output, spawn_in_pty, PtyCommand};
use super::signals::{self, TerminationReport};

/// Environment variable carrying the session id into the tool process.
pub const ENV_SESSION_ID: &str = "CONDUCTOR_SESSION_ID";
/// Environment variable carrying the terminal-session name.
pub const ENV_SESSION_NAME: &str = "CONDUCTOR_SESSION_NAME";
/// Environment variable carrying the parent session id, when there is one.
pub const ENV_PARENT_SESSION_ID: &str = "CONDUCTOR_PARENT_SESSION_ID";
/// Environment variable carrying the tool identifier.
pub const ENV_TOOL: &str = "CONDUCTOR_TOOL";
/// Environment variable pointing at the shared store.
pub const ENV_STORE: &str = "CONDUCTOR_STORE";

/// Reported once per primary process after its output stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    /// Session whose process exited.
    pub session_id: String,
    /// Spawn generation of the process; restarts bump it.
    pub generation: u64,
    /// Exit code, if the process could be reaped.
    pub exit_code: Option<u32>,
    /// Time the exit was observed.
    pub exited_at: DateTime<Utc>,
    /// Whether the exit followed an explicit kill.
    pub killed: bool,
}

/// Live handle to one PTY-hosted primary process.
pub struct SupervisedProcess {
    session_id: String,
    generation: u64,
    pid: Option<u32>,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    running: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SupervisedProcess {
    /// PID of the primary process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawn generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the primary process has not been reaped yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Forward raw input to the controlling terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Terminal` if the PTY rejects the write.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .and_then(|()| self.writer.flush())
            .map_err(|err| AppError::Terminal(format!("pty write failed: {err}")))
    }

    /// Change the terminal window size seen by the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Terminal` if the PTY rejects the resize.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AppError::Terminal(format!("pty resize failed: {err}")))
    }
}

/// Spawns tool processes and tears down their process trees.
pub struct Supervisor {
    config: Arc<GlobalConfig>,
    tree: Arc<dyn ProcessTree>,
    exits: mpsc::UnboundedSender<ExitEvent>,
    store_path: PathBuf,
}

impl Supervisor {
    /// Create a supervisor reporting exits on `exits`.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        tree: Arc<dyn ProcessTree>,
        exits: mpsc::UnboundedSender<ExitEvent>,
    ) -> Self {
        // Tools run in their own cwd, so hand them an absolute store path.
        let store_path = std::path::absolute(&config.store_path)
            .unwrap_or_else(|_| config.store_path.clone());
        Self {
            config,
            tree,
            exits,
            store_path,
        }
    }

    /// Build the PTY command that launches `session`'s tool on its task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the session's tool is not configured.
    pub fn command_for(&self, session: &Session) -> Result<PtyCommand> {
        let tool = self.config.tool(&session.tool)?;

        let mut args = tool.args.clone();
        if !session.task.trim().is_empty() {
            args.push(session.task.clone());
        }

        let mut env = vec![
            (ENV_SESSION_ID.to_owned(), session.id.clone()),
            (ENV_SESSION_NAME.to_owned(), session.name.clone()),
            (ENV_TOOL.to_owned(), session.tool.clone()),
            (
                ENV_STORE.to_owned(),
                self.store_path.to_string_lossy().into_owned(),
            ),
        ];
        if let Some(ref parent) = session.parent_id {
            env.push((ENV_PARENT_SESSION_ID.to_owned(), parent.clone()));
        }

        Ok(PtyCommand {
            program: tool.command.clone(),
            args,
            cwd: session.cwd.clone(),
            env,
        })
    }

    /// Start `session`'s tool in a fresh PTY feeding `buffer`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the tool cannot be started. No retry is
    /// attempted.
    pub fn spawn(
        &self,
        session: &Session,
        generation: u64,
        buffer: Arc<Mutex<OutputBuffer>>,
    ) -> Result<SupervisedProcess> {
        let span = info_span!(
            "spawn_process",
            session_id = %session.id,
            name = %session.name,
            tool = %session.tool,
            generation
        );
        let _guard = span.enter();

        let command = self.command_for(session)?;
        let parts = spawn_in_pty(&command)?;
        let mut killer = parts.killer;
        let mut child = parts.child;
        let reader = parts.reader;

        let running = Arc::new(AtomicBool::new(true));
        let killed = Arc::new(AtomicBool::new(false));
        let thread_running = Arc::clone(&running);
        let thread_killed = Arc::clone(&killed);
        let exits = self.exits.clone();
        let session_id = session.id.clone();

        let reader_thread = std::thread::Builder::new()
            .name(format!("pty-reader-{}", session.name))
            .spawn(move || {
                let bytes = pump_output(reader, &buffer);
                let exit_code = match child.wait() {
                    Ok(status) => Some(status.exit_code()),
                    Err(err) => {
                        warn!(session_id, %err, "failed to reap primary process");
                        None
                    }
                };
                thread_running.store(false, Ordering::SeqCst);

                debug!(session_id, generation, bytes, ?exit_code, "output stream ended");
                let event = ExitEvent {
                    session_id,
                    generation,
                    exit_code,
                    exited_at: Utc::now(),
                    killed: thread_killed.load(Ordering::SeqCst),
                };
                // Receiver gone means the registry is shutting down.
                let _ = exits.send(event);
            });

        if let Err(err) = reader_thread {
            let _ = killer.kill();
            return Err(AppError::Spawn(format!(
                "failed to start output reader: {err}"
            )));
        }

        info!(pid = ?parts.pid, program = %command.program, "tool process spawned");

        Ok(SupervisedProcess {
            session_id: session.id.clone(),
            generation,
            pid: parts.pid,
            master: parts.master,
            writer: parts.writer,
            killer,
            running,
            killed,
        })
    }

    /// Two-phase termination of the process tree rooted at `process`.
    ///
    /// Already-exited processes are not an error. The PTY is hung up when
    /// `process` is dropped at the end.
    pub async fn kill(&self, mut process: SupervisedProcess) -> TerminationReport {
        let span = info_span!(
            "kill_session",
            session_id = %process.session_id,
            pid = ?process.pid
        );

        async move {
            process.killed.store(true, Ordering::SeqCst);

            let report = match process.pid {
                Some(root) => {
                    let pids = self.tree.descendants(&[root]).unwrap_or_else(|err| {
                        warn!(%err, "process tree unavailable, signalling root only");
                        vec![root]
                    });
                    signals::terminate(&pids, self.config.kill_grace()).await
                }
                None => TerminationReport::default(),
            };

            if process.is_running() {
                if let Err(err) = process.killer.kill() {
                    debug!(%err, "pty killer found nothing to kill");
                }
            }

            info!(
                signalled = report.signalled.len(),
                force_killed = report.force_killed.len(),
                "session killed"
            );
            report
        }
        .instrument(span)
        .await
    }
}
