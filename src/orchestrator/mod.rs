//! Session orchestration.
//!
//! Covers the session registry and its exit monitor (crash recovery),
//! heartbeat publishing, health evaluation, and the task-loop scheduler.

pub mod capacity;
pub mod exit_monitor;
pub mod health;
pub mod health_monitor;
pub mod heartbeat;
pub mod registry;
pub mod task_loop;
pub mod todolist;
