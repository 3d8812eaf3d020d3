//! Shared, read-only state of one task run.

use crate::checkpoint::{BackoffPolicy, CheckpointManager};
use crate::consensus::{ConsensusResolver, EscalationPolicy};
use crate::orchestrator::events::EventSink;
use crate::review::gate::ValidationGate;
use crate::worker::Workers;
use std::sync::Arc;

/// Everything a phase executor needs, shared across the executors of a
/// wave. Holds no mutable task state; each executor owns its component.
pub struct ExecutionContext {
    pub task_id: String,
    pub requirements: String,
    pub approach: String,
    pub workers: Workers,
    pub gate: Arc<ValidationGate>,
    pub resolver: Arc<ConsensusResolver>,
    pub checkpoints: Arc<CheckpointManager>,
    /// Budget for component units.
    pub component_policy: EscalationPolicy,
    /// Budget for the task-level unit.
    pub task_policy: EscalationPolicy,
    pub backoff: BackoffPolicy,
    pub events: EventSink,
}
