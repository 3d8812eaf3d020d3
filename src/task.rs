//! Task, component and task-specification types.
//!
//! A [`TaskSpec`] is what a caller submits: immutable requirements, an
//! evolvable approach and the declared components. A [`Task`] is the owned
//! aggregate the orchestrator mutates as waves complete.

use crate::errors::EngineError;
use crate::lifecycle::Stage;
use crate::review::findings::Issue;
use crate::review::risk::RiskProfile;
use crate::worker::TASK_UNIT_NAME;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub type TaskId = String;

/// A component as declared in the task specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Path prefixes this component exclusively owns while it runs.
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "RiskProfile::is_default")]
    pub risk: RiskProfile,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, depends_on: &[&str]) -> Self {
        Self {
            name: name.into(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            scope: Vec::new(),
            description: String::new(),
            risk: RiskProfile::default(),
        }
    }

    pub fn with_scope(mut self, scope: &[&str]) -> Self {
        self.scope = scope.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_risk(mut self, risk: RiskProfile) -> Self {
        self.risk = risk;
        self
    }
}

/// A task specification, loaded from JSON or YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub requirements: String,
    #[serde(default)]
    pub approach: String,
    pub components: Vec<ComponentSpec>,
}

impl TaskSpec {
    pub fn new(requirements: impl Into<String>, components: Vec<ComponentSpec>) -> Self {
        Self {
            requirements: requirements.into(),
            approach: String::new(),
            components,
        }
    }

    pub fn with_approach(mut self, approach: impl Into<String>) -> Self {
        self.approach = approach.into();
        self
    }

    /// Load a specification file. `.yaml`/`.yml` files are parsed as YAML,
    /// everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task spec: {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::parse_yaml(&content)
                .with_context(|| format!("Failed to parse YAML task spec: {}", path.display()))
        } else {
            Self::parse_json(&content)
                .with_context(|| format!("Failed to parse JSON task spec: {}", path.display()))
        }
    }

    pub fn parse_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn parse_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Structural checks that do not need the dependency graph.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.requirements.trim().is_empty() {
            return Err(EngineError::InvalidSpec(
                "requirements must not be empty".to_string(),
            ));
        }
        if self.components.is_empty() {
            return Err(EngineError::InvalidSpec(
                "at least one component is required".to_string(),
            ));
        }
        if let Some(unnamed) = self.components.iter().position(|c| c.name.trim().is_empty()) {
            return Err(EngineError::InvalidSpec(format!(
                "component #{} has an empty name",
                unnamed + 1
            )));
        }
        if let Some(reserved) = self
            .components
            .iter()
            .find(|c| c.name.trim() == TASK_UNIT_NAME)
        {
            return Err(EngineError::InvalidSpec(format!(
                "component name '{}' is reserved for the task-level gate",
                reserved.name.trim()
            )));
        }
        Ok(())
    }
}

/// Status of a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentStatus {
    #[default]
    NotStarted,
    InProgress,
    Validating,
    Complete,
    Blocked,
}

impl ComponentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked)
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Validating => "VALIDATING",
            Self::Complete => "COMPLETE",
            Self::Blocked => "BLOCKED",
        };
        write!(f, "{}", s)
    }
}

/// Runtime state of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub risk: RiskProfile,
    pub stage: Stage,
    pub status: ComponentStatus,
    /// Issues from the most recent gate or test run.
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<String>,
    /// Stage the component was in when it became blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<Stage>,
    /// Set on a never-started component whose dependency chain is blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
}

impl Component {
    pub fn from_spec(spec: &ComponentSpec) -> Self {
        Self {
            name: spec.name.clone(),
            depends_on: spec.depends_on.clone(),
            scope: spec.scope.clone(),
            description: spec.description.clone(),
            risk: spec.risk.clone(),
            stage: Stage::Skeleton,
            status: ComponentStatus::NotStarted,
            issues: Vec::new(),
            last_checkpoint: None,
            halted_at: None,
            blocked_by: None,
        }
    }

    pub fn to_spec(&self) -> ComponentSpec {
        ComponentSpec {
            name: self.name.clone(),
            depends_on: self.depends_on.clone(),
            scope: self.scope.clone(),
            description: self.description.clone(),
            risk: self.risk.clone(),
        }
    }

    /// Not yet run and not cancelled by a blocked dependency.
    pub fn is_runnable(&self) -> bool {
        self.status == ComponentStatus::NotStarted && self.blocked_by.is_none()
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(Issue::is_blocking)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Blocked,
    Escalated,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Blocked => "BLOCKED",
            Self::Escalated => "ESCALATED",
        };
        write!(f, "{}", s)
    }
}

/// The task aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    requirements: String,
    pub approach: String,
    pub work_dir: PathBuf,
    pub components: Vec<Component>,
    pub status: TaskStatus,
    #[serde(default)]
    pub waves_run: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(spec: &TaskSpec, work_dir: PathBuf) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), spec, work_dir)
    }

    pub fn with_id(id: impl Into<String>, spec: &TaskSpec, work_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            requirements: spec.requirements.clone(),
            approach: spec.approach.clone(),
            work_dir,
            components: spec.components.iter().map(Component::from_spec).collect(),
            status: TaskStatus::Pending,
            waves_run: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Requirements are fixed at task creation.
    pub fn requirements(&self) -> &str {
        &self.requirements
    }

    /// Specification equivalent to the one this task was started from, with
    /// the current approach.
    pub fn spec(&self) -> TaskSpec {
        TaskSpec {
            requirements: self.requirements.clone(),
            approach: self.approach.clone(),
            components: self.components.iter().map(Component::to_spec).collect(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.name == name)
    }

    pub fn completed(&self) -> BTreeSet<String> {
        self.components
            .iter()
            .filter(|c| c.status == ComponentStatus::Complete)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn pending(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| c.status != ComponentStatus::Complete)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn all_complete(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.status == ComponentStatus::Complete)
    }

    /// Store the state a phase executor handed back for one component.
    ///
    /// Rejects a `COMPLETE` component whose dependencies are not all
    /// complete or that still carries blocking issues.
    pub fn apply_outcome(&mut self, component: Component) -> Result<(), EngineError> {
        if component.status == ComponentStatus::Complete {
            let incomplete: Vec<&String> = component
                .depends_on
                .iter()
                .filter(|dep| {
                    self.component(dep)
                        .is_none_or(|c| c.status != ComponentStatus::Complete)
                })
                .collect();
            if !incomplete.is_empty() {
                return Err(EngineError::InvariantViolation {
                    component: component.name.clone(),
                    message: format!(
                        "marked complete before dependencies {:?}",
                        incomplete
                    ),
                });
            }
            if component.has_blocking_issues() {
                return Err(EngineError::InvariantViolation {
                    component: component.name.clone(),
                    message: "marked complete with open critical/important issues".to_string(),
                });
            }
        }

        let slot = self
            .component_mut(&component.name)
            .ok_or_else(|| EngineError::InvariantViolation {
                component: component.name.clone(),
                message: "not part of this task".to_string(),
            })?;
        *slot = component;
        self.touch();
        Ok(())
    }

    /// Mark a never-started component as cancelled by `root`.
    pub fn cancel(&mut self, name: &str, root: &str) -> bool {
        match self.component_mut(name) {
            Some(component) if component.status == ComponentStatus::NotStarted => {
                component.blocked_by = Some(root.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::findings::Severity;
    use tempfile::tempdir;

    fn sample_spec() -> TaskSpec {
        TaskSpec::new(
            "Build a login flow",
            vec![
                ComponentSpec::new("A", &[]),
                ComponentSpec::new("B", &[]),
                ComponentSpec::new("C", &["A", "B"]),
            ],
        )
        .with_approach("Server-side sessions")
    }

    #[test]
    fn test_spec_parse_json() {
        let spec = TaskSpec::parse_json(
            r#"{
                "requirements": "r",
                "components": [
                    {"name": "api", "depends_on": ["db"], "scope": ["src/api"]},
                    {"name": "db", "risk": {"data_mutation": "persistent"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(spec.components.len(), 2);
        assert_eq!(spec.components[0].depends_on, vec!["db"]);
        assert_eq!(spec.components[0].scope, vec!["src/api"]);
        assert_eq!(spec.approach, "");
    }

    #[test]
    fn test_spec_load_yaml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task.yml");
        std::fs::write(
            &path,
            "requirements: add caching\napproach: lru\ncomponents:\n  - name: cache\n  - name: api\n    depends_on: [cache]\n",
        )
        .unwrap();

        let spec = TaskSpec::load(&path).unwrap();
        assert_eq!(spec.approach, "lru");
        assert_eq!(spec.components[1].depends_on, vec!["cache"]);
    }

    #[test]
    fn test_spec_load_missing_file_has_context() {
        let err = TaskSpec::load(Path::new("/nonexistent/task.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read task spec"));
    }

    #[test]
    fn test_spec_validate() {
        assert!(sample_spec().validate().is_ok());

        let empty = TaskSpec::new("r", vec![]);
        assert!(matches!(empty.validate(), Err(EngineError::InvalidSpec(_))));

        let unnamed = TaskSpec::new("r", vec![ComponentSpec::new(" ", &[])]);
        assert!(matches!(unnamed.validate(), Err(EngineError::InvalidSpec(_))));

        let no_requirements = TaskSpec::new("", vec![ComponentSpec::new("A", &[])]);
        assert!(no_requirements.validate().is_err());
    }

    #[test]
    fn test_spec_rejects_reserved_task_name() {
        let spec = TaskSpec::new(
            "r",
            vec![ComponentSpec::new("A", &[]), ComponentSpec::new("task", &["A"])],
        );
        match spec.validate() {
            Err(EngineError::InvalidSpec(msg)) => assert!(msg.contains("reserved")),
            other => panic!("expected InvalidSpec, got {:?}", other),
        }

        // Only the exact unit name is reserved
        let spec = TaskSpec::new("r", vec![ComponentSpec::new("tasks", &[])]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_task_new_starts_everything_not_started() {
        let task = Task::new(&sample_spec(), PathBuf::from("/tmp/work"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.requirements(), "Build a login flow");
        assert!(task.components.iter().all(|c| c.is_runnable()));
        assert!(task.components.iter().all(|c| c.stage == Stage::Skeleton));
        assert_eq!(task.spec(), sample_spec());
    }

    #[test]
    fn test_apply_outcome_rejects_complete_before_dependencies() {
        let mut task = Task::with_id("t", &sample_spec(), PathBuf::from("."));
        let mut c = task.component("C").unwrap().clone();
        c.status = ComponentStatus::Complete;
        c.stage = Stage::Complete;

        let err = task.apply_outcome(c).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation { .. }));
        assert_eq!(
            task.component("C").unwrap().status,
            ComponentStatus::NotStarted
        );
    }

    #[test]
    fn test_apply_outcome_rejects_complete_with_blocking_issues() {
        let mut task = Task::with_id("t", &sample_spec(), PathBuf::from("."));
        let mut a = task.component("A").unwrap().clone();
        a.status = ComponentStatus::Complete;
        a.issues = vec![Issue::new(Severity::Important, "src/a.rs", "bug")];
        assert!(task.apply_outcome(a).is_err());
    }

    #[test]
    fn test_apply_outcome_accepts_valid_completion() {
        let mut task = Task::with_id("t", &sample_spec(), PathBuf::from("."));
        for name in ["A", "B", "C"] {
            let mut c = task.component(name).unwrap().clone();
            c.status = ComponentStatus::Complete;
            c.stage = Stage::Complete;
            c.issues = vec![Issue::new(Severity::Minor, "x", "nit")];
            task.apply_outcome(c).unwrap();
        }
        assert!(task.all_complete());
        assert_eq!(task.completed().len(), 3);
        assert!(task.pending().is_empty());
    }

    #[test]
    fn test_cancel_only_touches_not_started() {
        let mut task = Task::with_id("t", &sample_spec(), PathBuf::from("."));
        task.component_mut("B").unwrap().status = ComponentStatus::Complete;

        assert!(task.cancel("C", "A"));
        assert!(!task.cancel("B", "A"));
        assert_eq!(task.component("C").unwrap().blocked_by.as_deref(), Some("A"));
        assert!(!task.component("C").unwrap().is_runnable());
    }

    #[test]
    fn test_component_status_serialization() {
        let json = serde_json::to_string(&ComponentStatus::NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
        assert_eq!(ComponentStatus::Validating.to_string(), "VALIDATING");
    }
}
