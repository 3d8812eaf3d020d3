//! Component lifecycle stages and the transition table driven by the phase
//! executor.
//!
//! ```text
//! SKELETON -> IMPLEMENT -> VALIDATE -> TEST -> DOCUMENT -> COMPLETE
//!                ^            |          |
//!                +--- fail ---+----------+
//! ```
//!
//! `BLOCKED` is reachable from every non-terminal stage on unrecoverable
//! failure. Any pair not listed in [`transition`] is rejected.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage in the life of a component (or of the task-level unit).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    Skeleton,
    Implement,
    Validate,
    Test,
    Document,
    Complete,
    Blocked,
}

impl Stage {
    /// Lowercase label used in checkpoint names and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Skeleton => "skeleton",
            Stage::Implement => "implement",
            Stage::Validate => "validate",
            Stage::Test => "test",
            Stage::Document => "document",
            Stage::Complete => "complete",
            Stage::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Blocked)
    }

    /// Ordered list of the stages a component passes through on the happy path.
    pub fn pipeline() -> [Stage; 6] {
        [
            Stage::Skeleton,
            Stage::Implement,
            Stage::Validate,
            Stage::Test,
            Stage::Document,
            Stage::Complete,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label().to_uppercase())
    }
}

/// Outcome of running a stage, fed into [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    /// The stage's worker produced its artifact.
    ArtifactReady,
    /// The validation gate returned zero blocking issues.
    GatePassed,
    /// The gate (or the test run) reported blocking issues.
    GateFailed,
    /// Nothing further can be done without external input.
    Unrecoverable,
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageEvent::ArtifactReady => "artifact_ready",
            StageEvent::GatePassed => "gate_passed",
            StageEvent::GateFailed => "gate_failed",
            StageEvent::Unrecoverable => "unrecoverable",
        };
        write!(f, "{}", name)
    }
}

/// Look up the next stage for `(from, event)`.
pub fn transition(from: Stage, event: StageEvent) -> Result<Stage, EngineError> {
    use Stage::*;
    use StageEvent::*;

    let next = match (from, event) {
        (Skeleton, ArtifactReady) => Implement,
        (Implement, ArtifactReady) => Validate,
        (Validate, GatePassed) => Test,
        (Validate, GateFailed) => Implement,
        (Test, ArtifactReady) => Document,
        (Test, GateFailed) => Implement,
        (Document, ArtifactReady) => Complete,
        (stage, Unrecoverable) if !stage.is_terminal() => Blocked,
        _ => return Err(EngineError::InvalidTransition { from, event }),
    };
    Ok(next)
}
