//! Phase Executor and Task Orchestrator.
//!
//! The orchestrator runs one [`PhaseExecutor`] per component of a wave,
//! concurrently, and waits for all of them before looking at the next wave.
//! Each executor owns its component for the duration of the wave and hands
//! the final state back as a [`ComponentOutcome`]; nothing else mutates a
//! component while it runs.

pub mod context;
pub mod events;
pub mod executor;
pub mod outcome;
pub(crate) mod remediation;
pub mod runner;

pub use context::ExecutionContext;
pub use events::{EventSink, OrchestratorEvent};
pub use executor::PhaseExecutor;
pub use outcome::{
    ComponentOutcome, EscalationKind, EscalationRecord, HaltedComponent, TaskOutcome, WaveResult,
};
pub use runner::{TaskGateRun, TaskOrchestrator, WaveRun};
