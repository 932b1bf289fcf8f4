//! Persistence layer modules.

pub mod crash_repo;
pub mod db;
pub mod health_repo;
pub mod heartbeat_repo;
pub mod keys;
pub mod kv_store;
pub mod loop_state_repo;
pub mod promise_repo;
pub mod retention;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
