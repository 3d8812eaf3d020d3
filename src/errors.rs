//! Typed error taxonomy for the conductor engine.
//!
//! One enum covers every subsystem so that failures keep their structure all
//! the way up to the caller:
//! - graph construction (`CycleDetected`, `UnknownDependency`, ...)
//! - the fix loop (`ValidationFailed`, `RetryBudgetExhausted`)
//! - consensus (`ConsensusNoMajority`)
//! - checkpoints (`CheckpointUnavailable`, `RollbackTargetMissing`, ...)

use crate::consensus::VotingRecord;
use crate::lifecycle::{Stage, StageEvent};
use crate::worker::WorkerRole;
use thiserror::Error;

/// Errors produced by the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cycle detected in component dependencies: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Component '{component}' depends on unknown component '{dependency}'")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    #[error("Duplicate component name: {0}")]
    DuplicateComponent(String),

    #[error("Validation failed for {unit}: {critical} critical, {important} important issue(s)")]
    ValidationFailed {
        unit: String,
        critical: usize,
        important: usize,
    },

    #[error("Retry budget exhausted for {unit} after {attempts} fix attempt(s)")]
    RetryBudgetExhausted {
        unit: String,
        attempts: u32,
        fingerprints: Vec<String>,
    },

    #[error("No consensus majority for {unit}: {}", record.tally_summary())]
    ConsensusNoMajority {
        unit: String,
        record: Box<VotingRecord>,
    },

    #[error("Checkpoint store unavailable: {reason}")]
    CheckpointUnavailable { reason: String },

    #[error("Work tree has conflicted paths: {}", paths.join(", "))]
    WorkTreeConflicted { paths: Vec<String> },

    #[error("Checkpoint '{checkpoint_id}' not found for task {task_id}")]
    RollbackTargetMissing {
        task_id: String,
        checkpoint_id: String,
    },

    #[error("Invalid stage transition from {from} on {event}")]
    InvalidTransition { from: Stage, event: StageEvent },

    #[error("Invariant violated for component '{component}': {message}")]
    InvariantViolation { component: String, message: String },

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task {task_id} cannot complete: pending components {}", pending.join(", "))]
    IncompleteTask {
        task_id: String,
        pending: Vec<String>,
    },

    #[error("Invalid task specification: {0}")]
    InvalidSpec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{role} worker failed: {message}")]
    Worker { role: WorkerRole, message: String },

    #[error("Artifact store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether this error ends the task (or the component) without any
    /// automatic recovery path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected { .. }
                | Self::UnknownDependency { .. }
                | Self::DuplicateComponent(_)
                | Self::ConsensusNoMajority { .. }
                | Self::RollbackTargetMissing { .. }
                | Self::InvalidSpec(_)
                | Self::InvalidConfig(_)
                | Self::InvariantViolation { .. }
        )
    }

    /// Whether the same operation may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CheckpointUnavailable { .. })
    }

    /// Whether the error is recoverable through the fix-and-revalidate loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ValidationFailed { .. })
    }

    /// Short machine-readable name of the variant, used in escalation records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CycleDetected { .. } => "cycle_detected",
            Self::UnknownDependency { .. } => "unknown_dependency",
            Self::DuplicateComponent(_) => "duplicate_component",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
            Self::ConsensusNoMajority { .. } => "consensus_no_majority",
            Self::CheckpointUnavailable { .. } => "checkpoint_unavailable",
            Self::WorkTreeConflicted { .. } => "work_tree_conflicted",
            Self::RollbackTargetMissing { .. } => "rollback_target_missing",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::TaskNotFound(_) => "task_not_found",
            Self::IncompleteTask { .. } => "incomplete_task",
            Self::InvalidSpec(_) => "invalid_spec",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Worker { .. } => "worker_failed",
            Self::Store(_) => "store",
            Self::Other(_) => "other",
        }
    }
}
