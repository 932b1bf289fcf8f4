//! Domain model module declarations.

pub mod crash;
pub mod health;
pub mod heartbeat;
pub mod loop_state;
pub mod promise;
pub mod session;
