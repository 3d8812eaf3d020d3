//! Session persistence.

use crate::errors::EngineError;
use crate::lifecycle::Stage;
use crate::session::summary::{PhaseRecord, ResourceUsage, compress_history};
use crate::store::{JsonStore, keys};
use crate::task::{ComponentStatus, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// Resumable state of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub status: ComponentStatus,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub task_id: String,
    pub work_dir: PathBuf,
    pub status: TaskStatus,
    /// Approach at the time of saving; it may evolve between waves.
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub waves_run: usize,
    pub components: BTreeMap<String, ComponentState>,
    /// Oldest first.
    #[serde(default)]
    pub completed_phases: Vec<PhaseRecord>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
    pub saved_at: DateTime<Utc>,
}

impl Session {
    pub fn new(task: &Task) -> Self {
        let mut session = Self {
            task_id: task.id.clone(),
            work_dir: task.work_dir.clone(),
            status: task.status,
            approach: task.approach.clone(),
            waves_run: 0,
            components: BTreeMap::new(),
            completed_phases: Vec::new(),
            next_steps: Vec::new(),
            resource_usage: ResourceUsage::default(),
            saved_at: Utc::now(),
        };
        session.capture(task);
        session
    }

    /// Refresh everything derived from the task aggregate.
    pub fn capture(&mut self, task: &Task) {
        self.status = task.status;
        self.approach = task.approach.clone();
        self.waves_run = task.waves_run;
        self.components = task
            .components
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    ComponentState {
                        status: c.status,
                        stage: c.stage,
                        halted_at: c.halted_at,
                        blocked_by: c.blocked_by.clone(),
                        last_checkpoint: c.last_checkpoint.clone(),
                    },
                )
            })
            .collect();
        self.next_steps = next_steps(task);
    }

    pub fn record_phases(&mut self, records: impl IntoIterator<Item = PhaseRecord>) {
        self.completed_phases.extend(records);
    }

    pub fn completed_components(&self) -> BTreeSet<String> {
        self.components
            .iter()
            .filter(|(_, state)| state.status == ComponentStatus::Complete)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Human-readable pending steps for a task.
pub fn next_steps(task: &Task) -> Vec<String> {
    if task.all_complete() {
        return vec!["Run the task-level validation gate and complete the task".to_string()];
    }
    let mut steps = Vec::new();
    for component in &task.components {
        match (component.status, &component.blocked_by) {
            (ComponentStatus::Complete, _) => {}
            (ComponentStatus::Blocked, _) => steps.push(format!(
                "Resolve {} (blocked at {})",
                component.name,
                component.halted_at.unwrap_or(component.stage)
            )),
            (_, Some(root)) => {
                steps.push(format!("{} waits on blocked {}", component.name, root))
            }
            (ComponentStatus::NotStarted, None) => {
                steps.push(format!("Run {}", component.name))
            }
            (status, None) => steps.push(format!("Resume {} ({})", component.name, status)),
        }
    }
    steps
}

/// How much phase detail a saved session keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub keep_full_phases: usize,
    pub max_key_outputs: usize,
    pub max_gotchas: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_full_phases: 3,
            max_key_outputs: 3,
            max_gotchas: 3,
        }
    }
}

pub struct SessionManager {
    store: JsonStore,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: JsonStore, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// Persist `session`, compressing phases older than the most recent
    /// `keep_full_phases`. Returns the session as stored.
    pub fn save(&self, session: &Session) -> Result<Session, EngineError> {
        let mut stored = session.clone();
        compress_history(
            &mut stored.completed_phases,
            self.config.keep_full_phases,
            self.config.max_key_outputs,
            self.config.max_gotchas,
        );
        stored.saved_at = Utc::now();
        self.store.put(&keys::session(&session.task_id), &stored)?;
        debug!(
            task = %session.task_id,
            phases = stored.completed_phases.len(),
            "Session saved"
        );
        Ok(stored)
    }

    pub fn load(&self, task_id: &str) -> Result<Option<Session>, EngineError> {
        self.store.get(&keys::session(task_id))
    }

    pub fn delete(&self, task_id: &str) -> Result<bool, EngineError> {
        let existed = self.store.delete(&keys::session(task_id))?;
        if existed {
            info!(task = task_id, "Session deleted");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ComponentSpec, TaskSpec};
    use crate::worker::StageOutput;

    fn task() -> Task {
        let spec = TaskSpec::new(
            "Build it",
            vec![
                ComponentSpec::new("A", &[]),
                ComponentSpec::new("B", &[]),
                ComponentSpec::new("C", &["A", "B"]),
            ],
        );
        Task::with_id("t1", &spec, PathBuf::from("/work"))
    }

    fn manager(keep_full: usize) -> SessionManager {
        SessionManager::new(
            JsonStore::in_memory(),
            SessionConfig {
                keep_full_phases: keep_full,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_round_trip_preserves_component_statuses() {
        let mut task = task();
        if let Some(a) = task.component_mut("A") {
            a.status = ComponentStatus::Complete;
            a.stage = Stage::Complete;
        }
        if let Some(b) = task.component_mut("B") {
            b.status = ComponentStatus::Blocked;
            b.stage = Stage::Blocked;
            b.halted_at = Some(Stage::Validate);
        }
        task.cancel("C", "B");

        let manager = manager(3);
        let session = Session::new(&task);
        manager.save(&session).unwrap();
        let loaded = manager.load("t1").unwrap().unwrap();

        assert_eq!(loaded.components, session.components);
        assert_eq!(loaded.completed_components(), BTreeSet::from(["A".to_string()]));
        assert_eq!(
            loaded.next_steps,
            vec!["Resolve B (blocked at VALIDATE)", "C waits on blocked B"]
        );
    }

    #[test]
    fn test_save_compresses_older_phases() {
        let mut session = Session::new(&task());
        let output = StageOutput::new("done");
        session.record_phases(
            Stage::pipeline()
                .into_iter()
                .take(4)
                .map(|s| PhaseRecord::full("A", s, &output)),
        );

        let stored = manager(1).save(&session).unwrap();
        let compressed: Vec<bool> = stored
            .completed_phases
            .iter()
            .map(PhaseRecord::is_compressed)
            .collect();
        assert_eq!(compressed, vec![true, true, true, false]);
        assert!(!session.completed_phases[0].is_compressed());
    }

    #[test]
    fn test_load_missing_and_delete() {
        let manager = manager(3);
        assert!(manager.load("nope").unwrap().is_none());
        manager.save(&Session::new(&task())).unwrap();
        assert!(manager.delete("t1").unwrap());
        assert!(!manager.delete("t1").unwrap());
        assert!(manager.load("t1").unwrap().is_none());
    }

    #[test]
    fn test_next_steps_when_all_complete() {
        let mut task = task();
        for component in &mut task.components {
            component.status = ComponentStatus::Complete;
        }
        assert_eq!(next_steps(&task).len(), 1);
        assert!(next_steps(&task)[0].contains("task-level"));
    }
}
