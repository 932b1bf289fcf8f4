//! Two-phase termination of a collected PID set.

use std::time::Duration;

use tracing::{debug, warn};

/// Outcome of [`terminate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// PIDs that received the graceful signal.
    pub signalled: Vec<u32>,
    /// PIDs still alive after the grace period and force-killed.
    pub force_killed: Vec<u32>,
}

/// Send SIGTERM to every PID, wait `grace`, then SIGKILL the survivors.
///
/// PIDs that vanished in the meantime are skipped silently.
#[cfg(unix)]
pub async fn terminate(pids: &[u32], grace: Duration) -> TerminationReport {
    use nix::sys::signal::Signal;

    let signalled: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|&pid| send(pid, Signal::SIGTERM))
        .collect();
    debug!(count = signalled.len(), "sent SIGTERM");

    tokio::time::sleep(grace).await;

    let force_killed: Vec<u32> = alive(&signalled)
        .into_iter()
        .filter(|&pid| send(pid, Signal::SIGKILL))
        .collect();
    if !force_killed.is_empty() {
        warn!(pids = ?force_killed, "processes survived grace period, sent SIGKILL");
    }

    TerminationReport {
        signalled,
        force_killed,
    }
}

/// Without POSIX signals the caller's PTY killer does the work.
#[cfg(not(unix))]
pub async fn terminate(_pids: &[u32], _grace: Duration) -> TerminationReport {
    TerminationReport::default()
}

/// PIDs from `pids` that still exist.
#[cfg(unix)]
#[must_use]
pub fn alive(pids: &[u32]) -> Vec<u32> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    pids.iter()
        .copied()
        .filter(|&pid| {
            i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), None).is_ok())
        })
        .collect()
}

/// Without POSIX signals liveness cannot be probed.
#[cfg(not(unix))]
#[must_use]
pub fn alive(_pids: &[u32]) -> Vec<u32> {
    Vec::new()
}

/// Deliver `signal`; returns whether the PID existed.
#[cfg(unix)]
fn send(pid: u32, signal: nix::sys::signal::Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 1 {
        return false;
    }
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            warn!(pid, %err, ?signal, "signal delivery failed");
            false
        }
    }
}
