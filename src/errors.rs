//! Crate-wide error type and `Result` alias.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Keyed-store failure (serialization, missing connection).
    Store(String),
    /// Tool process could not be started.
    Spawn(String),
    /// PTY read/write or signal delivery failure.
    Terminal(String),
    /// Todolist file could not be parsed or rewritten.
    Todolist(String),
    /// Loop scheduler run aborted.
    Loop(String),
    /// A bounded wait elapsed before its condition was met.
    Timeout(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Terminal(msg) => write!(f, "terminal: {msg}"),
            Self::Todolist(msg) => write!(f, "todolist: {msg}"),
            Self::Loop(msg) => write!(f, "loop: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
