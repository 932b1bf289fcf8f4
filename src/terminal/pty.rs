//! Pseudo-terminal spawning and the output pump.

use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::{AppError, Result};

use super::buffer::OutputBuffer;

/// Bytes read from the PTY master per syscall.
const READ_CHUNK: usize = 4096;

const DEFAULT_ROWS: u16 = 40;
const DEFAULT_COLS: u16 = 120;

/// Program, arguments and environment for a PTY-hosted process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtyCommand {
    /// Executable (resolved against `PATH`).
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Handles produced by a successful PTY spawn.
pub struct PtyParts {
    /// Master side; dropping it hangs up the terminal.
    pub master: Box<dyn MasterPty + Send>,
    /// Output side of the master, drained by the reader thread.
    pub reader: Box<dyn Read + Send>,
    /// Input side of the master.
    pub writer: Box<dyn std::io::Write + Send>,
    /// Primary process, waited on by the reader thread after EOF.
    pub child: Box<dyn Child + Send + Sync>,
    /// Independent kill handle for the primary process.
    pub killer: Box<dyn ChildKiller + Send + Sync>,
    /// PID of the primary process, when the platform reports one.
    pub pid: Option<u32>,
}

/// Open a PTY pair and start `command` on its slave side.
///
/// The slave handle is released once the child holds it, so EOF on the
/// master tracks the child's lifetime.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the PTY cannot be opened or the program
/// cannot be started (missing binary, bad working directory).
pub fn spawn_in_pty(command: &PtyCommand) -> Result<PtyParts> {
    // portable-pty would silently fall back to $HOME.
    if !command.cwd.is_dir() {
        return Err(AppError::Spawn(format!(
            "working directory {} does not exist",
            command.cwd.display()
        )));
    }

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| AppError::Spawn(format!("failed to open pty: {err}")))?;

    let mut builder = CommandBuilder::new(&command.program);
    builder.args(&command.args);
    builder.cwd(&command.cwd);
    for (key, value) in &command.env {
        builder.env(key, value);
    }

    let child = pair.slave.spawn_command(builder).map_err(|err| {
        AppError::Spawn(format!("failed to start {}: {err}", command.program))
    })?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| AppError::Terminal(format!("failed to clone pty reader: {err}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| AppError::Terminal(format!("failed to take pty writer: {err}")))?;
    let killer = child.clone_killer();
    let pid = child.process_id();

    Ok(PtyParts {
        master: pair.master,
        reader,
        writer,
        child,
        killer,
        pid,
    })
}

/// Drain `reader` into `buffer` until EOF. Returns the bytes consumed.
///
/// A read error ends the stream: Linux reports a hung-up PTY master as
/// `EIO` rather than a zero-length read.
pub fn pump_output(mut reader: impl Read, buffer: &Mutex<OutputBuffer>) -> usize {
    let mut chunk = [0_u8; READ_CHUNK];
    let mut total = 0_usize;
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .append(&chunk[..n]);
                total = total.saturating_add(n);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(%err, "pty read ended");
                break;
            }
        }
    }
    total
}
