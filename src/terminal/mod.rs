//! Terminal hosting: PTY-backed tool processes, scrollback and tree kill.

pub mod buffer;
pub mod naming;
pub mod process_tree;
pub mod pty;
pub mod signals;
pub mod supervisor;

pub use buffer::OutputBuffer;
pub use process_tree::{ProcessTree, PsProcessTree};
pub use supervisor::{ExitEvent, SupervisedProcess, Supervisor};
