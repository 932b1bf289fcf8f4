//! Exit monitor: turns process exits into session updates and restarts.
//!
//! An exit that was not caused by an explicit kill and that left no
//! promise behind is a crash. Crashes are restarted in place until the
//! restart budget is spent; the session is then marked failed and stays
//! down.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::models::crash::{CrashEvent, SessionState};
use crate::models::session::Session;
use crate::persistence::crash_repo::CrashRepo;
use crate::persistence::promise_repo::PromiseStore;
use crate::terminal::ExitEvent;

use super::registry::SessionRegistry;

/// What the monitor did with one exit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Stale generation, explicit kill, or unknown session.
    Ignored,
    /// The session published a promise before exiting.
    Finished,
    /// Crash followed by an automatic restart.
    Restarted {
        /// Restarts performed so far, this one included.
        restart_count: u32,
    },
    /// Crash with the restart budget spent (or the restart failed).
    Failed,
}

/// Consumer of supervisor exit events.
pub struct ExitMonitor {
    registry: SessionRegistry,
    promises: PromiseStore,
    crashes: CrashRepo,
    max_restarts: u32,
}

impl ExitMonitor {
    /// Build a monitor with a per-session restart budget.
    #[must_use]
    pub fn new(
        registry: SessionRegistry,
        promises: PromiseStore,
        crashes: CrashRepo,
        max_restarts: u32,
    ) -> Self {
        Self {
            registry,
            promises,
            crashes,
            max_restarts,
        }
    }

    /// Apply one exit event.
    pub async fn handle(&self, event: ExitEvent) -> ExitDisposition {
        let Some(session) = self.registry.record_exit(&event).await else {
            return ExitDisposition::Ignored;
        };

        let promised = match self.promises.get_promise(&session.id).await {
            Ok(promise) => promise.is_some(),
            Err(err) => {
                warn!(session_id = %session.id, %err, "promise lookup failed, treating exit as a crash");
                false
            }
        };
        if promised {
            info!(
                session_id = %session.id,
                exit_code = ?event.exit_code,
                "session exited after publishing its promise"
            );
            return ExitDisposition::Finished;
        }

        self.recover(&session, &event).await
    }

    async fn recover(&self, session: &Session, event: &ExitEvent) -> ExitDisposition {
        let reason = event.exit_code.map_or_else(
            || "exited with unknown status before publishing a promise".to_owned(),
            |code| format!("exited with code {code} before publishing a promise"),
        );
        let mut state = SessionState {
            restart_count: session.restart_count,
            max_restarts: self.max_restarts,
            tool: session.tool.clone(),
            task: session.task.clone(),
        };
        let will_restart = state.can_restart();
        self.record(session, reason, will_restart, event).await;

        if will_restart {
            match self.registry.restart(&session.id).await {
                Ok(restarted) => {
                    state.restart_count = restarted.restart_count;
                    self.save_state(&session.id, &state).await;
                    info!(
                        session_id = %session.id,
                        restart_count = restarted.restart_count,
                        "crashed session restarted"
                    );
                    return ExitDisposition::Restarted {
                        restart_count: restarted.restart_count,
                    };
                }
                Err(err) => {
                    error!(session_id = %session.id, %err, "restart failed");
                    self.record(session, format!("restart failed: {err}"), false, event)
                        .await;
                }
            }
        }

        self.registry.mark_failed(&session.id, event.exited_at).await;
        self.save_state(&session.id, &state).await;
        warn!(
            session_id = %session.id,
            restart_count = state.restart_count,
            "session marked failed"
        );
        ExitDisposition::Failed
    }

    async fn record(&self, session: &Session, reason: String, will_restart: bool, event: &ExitEvent) {
        let crash = CrashEvent {
            session_id: session.id.clone(),
            timestamp: event.exited_at,
            reason,
            will_restart,
        };
        if let Err(err) = self.crashes.record_crash(&crash).await {
            error!(session_id = %session.id, %err, "failed to record crash event");
        }
    }

    async fn save_state(&self, session_id: &str, state: &SessionState) {
        if let Err(err) = self.crashes.save_state(session_id, state).await {
            error!(session_id, %err, "failed to persist session state");
        }
    }
}

/// Spawn the exit monitor task.
///
/// Runs until `cancel` fires or every exit sender is gone.
#[must_use]
pub fn spawn_exit_monitor(
    monitor: ExitMonitor,
    mut exits: mpsc::UnboundedReceiver<ExitEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("exit monitor shutting down");
                        break;
                    }
                    event = exits.recv() => {
                        let Some(event) = event else { break };
                        let disposition = monitor.handle(event).await;
                        tracing::debug!(?disposition, "exit event handled");
                    }
                }
            }
        }
        .instrument(info_span!("exit_monitor")),
    )
}
