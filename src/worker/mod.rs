//! Worker capability interfaces.
//!
//! Workers do the actual work of a stage; the engine only sees their
//! input/output contract. Roles form a fixed set ([`WorkerRole`]) and each
//! capability is its own trait so a role can be backed by a different
//! implementation:
//!
//! | Trait          | Roles                                        |
//! |----------------|----------------------------------------------|
//! | [`StageWorker`]| Skeleton, Implementer, Tester, Documenter    |
//! | [`Reviewer`]   | Reviewer (one instance per roster entry)     |
//! | [`Fixer`]      | Fixer                                        |
//! | [`Judge`]      | Judge (one instance per consensus seat)      |
//!
//! [`CommandWorker`] backs every role with one external command;
//! [`ScriptedWorker`] answers from a script for dry runs and tests.

mod command;
mod scripted;

pub use command::{CommandWorker, CommandWorkerConfig, extract_json};
pub use scripted::ScriptedWorker;

use crate::consensus::{Ballot, Vote};
use crate::lifecycle::Stage;
use crate::review::findings::Issue;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the task-level unit. Component names may not take it.
pub const TASK_UNIT_NAME: &str = "task";
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Skeleton,
    Implementer,
    Tester,
    Documenter,
    Reviewer,
    Fixer,
    Judge,
}

impl WorkerRole {
    /// Role that produces the artifact of `stage`, if any.
    pub fn for_stage(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Skeleton => Some(Self::Skeleton),
            Stage::Implement => Some(Self::Implementer),
            Stage::Test => Some(Self::Tester),
            Stage::Document => Some(Self::Documenter),
            Stage::Validate | Stage::Complete | Stage::Blocked => None,
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Skeleton => "skeleton",
            Self::Implementer => "implementer",
            Self::Tester => "tester",
            Self::Documenter => "documenter",
            Self::Reviewer => "reviewer",
            Self::Fixer => "fixer",
            Self::Judge => "judge",
        };
        write!(f, "{}", s)
    }
}

/// What a unit of work covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum UnitScope {
    Component(String),
    /// The merged result of every component.
    Task,
}

/// Everything a worker is told about the unit it works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub task_id: String,
    pub scope: UnitScope,
    pub stage: Stage,
    pub requirements: String,
    pub approach: String,
    #[serde(default)]
    pub description: String,
    /// Path prefixes the unit may touch.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Components covered (one entry for a component unit).
    #[serde(default)]
    pub components: Vec<String>,
    /// Guidance from a binding consensus decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl WorkUnit {
    /// Name used in logs, issue records and escalation keys.
    pub fn name(&self) -> &str {
        match &self.scope {
            UnitScope::Component(name) => name,
            UnitScope::Task => TASK_UNIT_NAME,
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self.scope, UnitScope::Task)
    }

    pub fn with_guidance(mut self, guidance: Option<String>) -> Self {
        self.guidance = guidance;
        self
    }
}

/// Result of a stage worker or fixer run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Files or other artifacts produced.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub summary: String,
    /// Problems the worker found in its own output, e.g. failing tests.
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl StageOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(Issue::is_blocking)
    }
}

/// Produces the artifact of a stage.
#[async_trait]
pub trait StageWorker: Send + Sync {
    async fn run_stage(&self, role: WorkerRole, unit: &WorkUnit) -> Result<StageOutput>;
}

/// One independent reviewer.
#[async_trait]
pub trait Reviewer: Send + Sync {
    fn name(&self) -> String;
    async fn review(&self, unit: &WorkUnit) -> Result<Vec<Issue>>;
}

/// Attempts to resolve the given blocking issues.
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix(&self, unit: &WorkUnit, issues: &[Issue]) -> Result<StageOutput>;
}

/// One independent judge in a consensus round.
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> String;
    async fn vote(&self, ballot: &Ballot) -> Result<Vote>;
}

/// The worker set an engine runs with.
#[derive(Clone)]
pub struct Workers {
    pub stage: Arc<dyn StageWorker>,
    /// Ordered roster; the gate takes a prefix sized by risk tier.
    pub reviewers: Vec<Arc<dyn Reviewer>>,
    pub fixer: Arc<dyn Fixer>,
    pub judges: Vec<Arc<dyn Judge>>,
}

impl fmt::Debug for Workers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workers")
            .field(
                "reviewers",
                &self.reviewers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field(
                "judges",
                &self.judges.iter().map(|j| j.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(scope: UnitScope) -> WorkUnit {
        WorkUnit {
            task_id: "t1".into(),
            scope,
            stage: Stage::Implement,
            requirements: "r".into(),
            approach: "a".into(),
            description: String::new(),
            paths: vec![],
            components: vec![],
            guidance: None,
        }
    }

    #[test]
    fn test_role_for_stage() {
        assert_eq!(WorkerRole::for_stage(Stage::Skeleton), Some(WorkerRole::Skeleton));
        assert_eq!(WorkerRole::for_stage(Stage::Test), Some(WorkerRole::Tester));
        assert_eq!(WorkerRole::for_stage(Stage::Validate), None);
        assert_eq!(WorkerRole::Implementer.to_string(), "implementer");
    }

    #[test]
    fn test_unit_name() {
        assert_eq!(unit(UnitScope::Component("api".into())).name(), "api");
        let task = unit(UnitScope::Task);
        assert_eq!(task.name(), "task");
        assert!(task.is_task());
    }

    #[test]
    fn test_unit_scope_serialization() {
        let json = serde_json::to_value(UnitScope::Component("api".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "component", "name": "api"}));
        let json = serde_json::to_value(UnitScope::Task).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "task"}));
    }

    #[test]
    fn test_stage_output_defaults_from_partial_json() {
        let output: StageOutput = serde_json::from_str(r#"{"summary":"done"}"#).unwrap();
        assert_eq!(output.summary, "done");
        assert!(output.artifacts.is_empty());
        assert!(!output.has_blocking_issues());
    }
}
