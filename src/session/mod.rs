//! Session Manager: saves and restores orchestrator state so a task survives
//! restarts.
//!
//! The most recent completed phases are kept in full; older ones are
//! compressed to status, key outputs and critical gotchas, which bounds the
//! size of a session independent of task length.

mod manager;
mod summary;

pub use manager::{ComponentState, Session, SessionConfig, SessionManager, next_steps};
pub use summary::{PhaseDetail, PhaseRecord, ResourceUsage, compress_history};
