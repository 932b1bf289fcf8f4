#![forbid(unsafe_code)]

//! Supervision and coordination of terminal-hosted AI coding agents.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod terminal;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
