//! Caller-facing operations of the orchestration engine.
//!
//! [`Engine`] owns the artifact store, checkpoint manager and session
//! manager, and drives a [`TaskOrchestrator`] one wave at a time. Every
//! operation takes a task id and reloads the task aggregate from the store,
//! so a CLI invocation per wave behaves the same as one long-lived engine.

use crate::checkpoint::{BackoffPolicy, Checkpoint, CheckpointManager, SnapshotBackend};
use crate::consensus::{ConsensusResolver, EscalationPolicy};
use crate::dag;
use crate::errors::EngineError;
use crate::lifecycle::Stage;
use crate::orchestrator::{
    EscalationKind, EscalationRecord, EventSink, ExecutionContext, HaltedComponent,
    OrchestratorEvent, TaskOrchestrator, TaskOutcome, WaveResult,
};
use crate::review::gate::{GateConfig, ValidationGate};
use crate::session::{PhaseRecord, ResourceUsage, Session, SessionConfig, SessionManager};
use crate::store::{JsonStore, keys};
use crate::task::{ComponentStatus, Task, TaskSpec, TaskStatus};
use crate::worker::Workers;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Tunables of one engine, usually built from `conductor.toml`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Upper bound on executors running at once inside a wave.
    pub max_parallel: usize,
    pub component_policy: EscalationPolicy,
    pub task_policy: EscalationPolicy,
    pub backoff: BackoffPolicy,
    pub gate: GateConfig,
    pub session: SessionConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            component_policy: EscalationPolicy::new(2, 6),
            task_policy: EscalationPolicy::new(3, 6),
            backoff: BackoffPolicy::default(),
            gate: GateConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

pub struct Engine {
    store: JsonStore,
    checkpoints: Arc<CheckpointManager>,
    sessions: SessionManager,
    workers: Workers,
    gate: Arc<ValidationGate>,
    resolver: Arc<ConsensusResolver>,
    settings: EngineSettings,
    events: EventSink,
}

impl Engine {
    pub fn new(
        store: JsonStore,
        backend: Arc<dyn SnapshotBackend>,
        workers: Workers,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let resolver = Arc::new(ConsensusResolver::new(workers.judges.clone())?);
        let gate = Arc::new(ValidationGate::new(
            workers.reviewers.clone(),
            settings.gate.clone(),
        ));
        Ok(Self {
            checkpoints: Arc::new(CheckpointManager::new(backend, store.clone())),
            sessions: SessionManager::new(store.clone(), settings.session),
            store,
            workers,
            gate,
            resolver,
            settings,
            events: EventSink::disabled(),
        })
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate `spec`, build its dependency graph and register a new task.
    ///
    /// A dependency cycle fails here, before anything is stored.
    pub fn start_task(
        &self,
        spec: &TaskSpec,
        work_dir: impl Into<PathBuf>,
    ) -> Result<String, EngineError> {
        spec.validate()?;
        let (_graph, plan) = dag::plan(&spec.components)?;

        let task = Task::new(spec, work_dir.into());
        self.store.put(&keys::spec(&task.id), spec)?;
        self.store.put(&keys::task(&task.id), &task)?;
        self.sessions.save(&Session::new(&task))?;

        info!(
            task = %task.id,
            components = task.components.len(),
            waves = plan.len(),
            "Task started"
        );
        Ok(task.id)
    }

    /// Current state of a task; archived tasks are still readable.
    pub fn get_state(&self, task_id: &str) -> Result<Task, EngineError> {
        if let Some(task) = self.store.get::<Task>(&keys::task(task_id))? {
            return Ok(task);
        }
        self.store
            .get::<Task>(&keys::archive(task_id))?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    /// Change the evolvable part of the specification. Requirements are
    /// fixed for the life of the task.
    pub fn set_approach(&self, task_id: &str, approach: &str) -> Result<Task, EngineError> {
        let mut task = self.active_task(task_id)?;
        task.approach = approach.to_string();
        task.touch();
        self.store.put(&keys::task(task_id), &task)?;
        let mut session = self.session_for(&task)?;
        session.capture(&task);
        self.sessions.save(&session)?;
        Ok(task)
    }

    /// Run the next wave to its barrier. `None` when no component can run.
    pub async fn run_wave(&self, task_id: &str) -> Result<Option<WaveResult>, EngineError> {
        let mut task = self.active_task(task_id)?;
        let orchestrator = self.orchestrator(&task)?;

        let Some(run) = orchestrator.run_wave(&mut task).await else {
            self.settle(&mut task, &orchestrator)?;
            self.store.put(&keys::task(task_id), &task)?;
            return Ok(None);
        };

        for record in &run.escalations {
            self.store
                .put(&keys::escalation(task_id, &record.unit), record)?;
            warn!(task = task_id, "{}", record);
        }
        self.settle(&mut task, &orchestrator)?;
        self.store.put(&keys::task(task_id), &task)?;
        self.record_progress(&task, run.records, &run.usage)?;
        Ok(Some(run.result))
    }

    /// Run waves until nothing can run, then complete the task if every
    /// component finished.
    pub async fn run_task(&self, task_id: &str) -> Result<TaskOutcome, EngineError> {
        if self.store.get::<Task>(&keys::archive(task_id))?.is_some() {
            return Ok(TaskOutcome::Complete {
                task_id: task_id.to_string(),
            });
        }
        while self.run_wave(task_id).await?.is_some() {}

        let task = self.active_task(task_id)?;
        if task.all_complete() {
            return self.complete_task(task_id).await;
        }
        let outcome = self.outcome(&task)?;
        info!(task = task_id, outcome = %outcome, "Task halted");
        Ok(outcome)
    }

    /// Run the task-level gate and, when it passes, archive the task and
    /// delete its session. Completing an archived task is a no-op.
    pub async fn complete_task(&self, task_id: &str) -> Result<TaskOutcome, EngineError> {
        let Some(mut task) = self.store.get::<Task>(&keys::task(task_id))? else {
            return match self.store.get::<Task>(&keys::archive(task_id))? {
                Some(_) => Ok(TaskOutcome::Complete {
                    task_id: task_id.to_string(),
                }),
                None => Err(EngineError::TaskNotFound(task_id.to_string())),
            };
        };
        if !task.all_complete() {
            return Err(EngineError::IncompleteTask {
                task_id: task_id.to_string(),
                pending: task.pending(),
            });
        }

        let orchestrator = self.orchestrator(&task)?;
        let gate = orchestrator.validate_task(&task).await;
        let outcome = match gate.escalation {
            None => {
                task.status = TaskStatus::Complete;
                task.touch();
                self.store.put(&keys::archive(task_id), &task)?;
                self.store.delete(&keys::task(task_id))?;
                self.sessions.delete(task_id)?;
                info!(task = task_id, summary = %gate.report.summary(), "Task complete");
                TaskOutcome::Complete {
                    task_id: task_id.to_string(),
                }
            }
            Some(record) => {
                self.store
                    .put(&keys::escalation(task_id, &record.unit), &record)?;
                task.status = match record.kind {
                    EscalationKind::Escalated => TaskStatus::Escalated,
                    EscalationKind::Blocked => TaskStatus::Blocked,
                };
                task.touch();
                self.store.put(&keys::task(task_id), &task)?;
                self.record_progress(&task, gate.records, &gate.usage)?;
                warn!(task = task_id, "{}", record);
                TaskOutcome::halted(HaltedComponent::from_record(record, Vec::new()), Vec::new())
            }
        };

        self.events
            .emit(OrchestratorEvent::TaskFinished {
                task_id: task_id.to_string(),
                outcome: outcome.to_string(),
            })
            .await;
        Ok(outcome)
    }

    pub async fn create_checkpoint(
        &self,
        task_id: &str,
        phase_label: &str,
    ) -> Result<Checkpoint, EngineError> {
        self.get_state(task_id)?;
        self.checkpoints
            .create_with_retry(task_id, phase_label, self.settings.backoff)
            .await
    }

    pub fn rollback(&self, task_id: &str, checkpoint_id: &str) -> Result<Checkpoint, EngineError> {
        self.checkpoints.rollback(task_id, checkpoint_id)
    }

    pub fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        self.checkpoints.list(task_id)
    }

    pub fn cleanup_checkpoints(&self, task_id: &str) -> Result<usize, EngineError> {
        self.checkpoints.cleanup(task_id)
    }

    pub fn save_session(&self, session: &Session) -> Result<Session, EngineError> {
        self.sessions.save(session)
    }

    pub fn load_session(&self, task_id: &str) -> Result<Option<Session>, EngineError> {
        self.sessions.load(task_id)
    }

    /// Rebuild the task from its stored specification and saved session.
    ///
    /// Completed components stay complete and blocked ones stay blocked.
    /// Components that were mid-flight restart from the beginning. Resuming
    /// twice yields the same task.
    pub fn resume_task(&self, task_id: &str) -> Result<Task, EngineError> {
        let spec: TaskSpec = self
            .store
            .get(&keys::spec(task_id))?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        let stored: Option<Task> = self.store.get(&keys::task(task_id))?;
        let session = self.sessions.load(task_id)?;
        if stored.is_none() && session.is_none() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }
        let orchestrator_plan = dag::plan(&spec.components)?;

        let work_dir = session
            .as_ref()
            .map(|s| s.work_dir.clone())
            .or_else(|| stored.as_ref().map(|t| t.work_dir.clone()))
            .unwrap_or_default();
        let mut task = Task::with_id(task_id, &spec, work_dir);
        if let Some(ref stored) = stored {
            task.created_at = stored.created_at;
            task.approach = stored.approach.clone();
            task.waves_run = stored.waves_run;
        }

        let states = match session {
            Some(ref session) => {
                if !session.approach.is_empty() {
                    task.approach = session.approach.clone();
                }
                task.waves_run = task.waves_run.max(session.waves_run);
                session.components.clone()
            }
            None => Session::new(stored.as_ref().unwrap_or(&task)).components,
        };

        for component in &mut task.components {
            let Some(state) = states.get(&component.name) else {
                continue;
            };
            match state.status {
                ComponentStatus::Complete => {
                    component.status = ComponentStatus::Complete;
                    component.stage = Stage::Complete;
                    component.last_checkpoint = state.last_checkpoint.clone();
                }
                ComponentStatus::Blocked => {
                    component.status = ComponentStatus::Blocked;
                    component.stage = Stage::Blocked;
                    component.halted_at = state.halted_at;
                    component.last_checkpoint = state.last_checkpoint.clone();
                }
                ComponentStatus::NotStarted => {
                    component.blocked_by = state.blocked_by.clone();
                }
                ComponentStatus::InProgress | ComponentStatus::Validating => {
                    info!(
                        task = task_id,
                        component = %component.name,
                        stage = %state.stage,
                        "Restarting in-flight component"
                    );
                }
            }
        }

        let (graph, plan) = orchestrator_plan;
        let orchestrator = TaskOrchestrator::new(self.context(&task), graph, plan, self.settings.max_parallel);
        self.settle(&mut task, &orchestrator)?;
        self.store.put(&keys::task(task_id), &task)?;

        let mut session = session.unwrap_or_else(|| Session::new(&task));
        session.capture(&task);
        self.sessions.save(&session)?;
        info!(
            task = task_id,
            completed = task.completed().len(),
            pending = task.pending().len(),
            "Task resumed"
        );
        Ok(task)
    }

    /// Make a blocked component runnable again after a human resolved the
    /// problem. It restarts at the stage it halted in, with a fresh retry
    /// budget, and its cancelled dependents become runnable.
    pub fn unblock(&self, task_id: &str, component: &str) -> Result<Task, EngineError> {
        let mut task = self.active_task(task_id)?;
        let target = task
            .component_mut(component)
            .ok_or_else(|| EngineError::InvalidSpec(format!("unknown component '{}'", component)))?;
        if target.status != ComponentStatus::Blocked {
            return Err(EngineError::InvalidSpec(format!(
                "component '{}' is {}, not BLOCKED",
                component, target.status
            )));
        }
        target.status = ComponentStatus::NotStarted;
        target.issues.clear();
        for other in &mut task.components {
            if other.blocked_by.as_deref() == Some(component) {
                other.blocked_by = None;
            }
        }
        task.status = TaskStatus::Running;
        task.touch();
        self.store.delete(&keys::escalation(task_id, component))?;
        self.store.put(&keys::task(task_id), &task)?;

        let mut session = self.session_for(&task)?;
        session.capture(&task);
        self.sessions.save(&session)?;
        info!(task = task_id, component, "Component unblocked");
        Ok(task)
    }

    /// Escalation records of the task, ordered by unit name.
    pub fn escalations(&self, task_id: &str) -> Result<Vec<EscalationRecord>, EngineError> {
        let mut records = Vec::new();
        for key in self.store.list(&keys::escalations(task_id))? {
            if let Some(record) = self.store.get::<EscalationRecord>(&key)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.unit.cmp(&b.unit));
        Ok(records)
    }

    /// Terminal (or pending) outcome of a task in its current state.
    pub fn outcome(&self, task: &Task) -> Result<TaskOutcome, EngineError> {
        if task.status == TaskStatus::Complete {
            return Ok(TaskOutcome::Complete {
                task_id: task.id.clone(),
            });
        }
        let mut halted = Vec::new();
        for blocked in task
            .components
            .iter()
            .filter(|c| c.status == ComponentStatus::Blocked)
        {
            let chain: Vec<String> = task
                .components
                .iter()
                .filter(|c| c.blocked_by.as_deref() == Some(blocked.name.as_str()))
                .map(|c| c.name.clone())
                .collect();
            let record = self
                .store
                .get::<EscalationRecord>(&keys::escalation(&task.id, &blocked.name))?;
            halted.push(match record {
                Some(record) => HaltedComponent::from_record(record, chain),
                None => HaltedComponent {
                    component: blocked.name.clone(),
                    reason: format!("blocked at {}", blocked.halted_at.unwrap_or(blocked.stage)),
                    chain,
                    record: None,
                },
            });
        }
        if halted.is_empty() {
            return Ok(TaskOutcome::Pending {
                pending: task.pending(),
            });
        }
        let first = halted.remove(0);
        Ok(TaskOutcome::halted(first, halted))
    }

    fn active_task(&self, task_id: &str) -> Result<Task, EngineError> {
        self.store
            .get::<Task>(&keys::task(task_id))?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    fn session_for(&self, task: &Task) -> Result<Session, EngineError> {
        Ok(self
            .sessions
            .load(&task.id)?
            .unwrap_or_else(|| Session::new(task)))
    }

    fn context(&self, task: &Task) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            task_id: task.id.clone(),
            requirements: task.requirements().to_string(),
            approach: task.approach.clone(),
            workers: self.workers.clone(),
            gate: self.gate.clone(),
            resolver: self.resolver.clone(),
            checkpoints: self.checkpoints.clone(),
            component_policy: self.settings.component_policy,
            task_policy: self.settings.task_policy,
            backoff: self.settings.backoff,
            events: self.events.clone(),
        })
    }

    fn orchestrator(&self, task: &Task) -> Result<TaskOrchestrator, EngineError> {
        let spec: TaskSpec = self
            .store
            .get(&keys::spec(&task.id))?
            .unwrap_or_else(|| task.spec());
        let (graph, plan) = dag::plan(&spec.components)?;
        Ok(TaskOrchestrator::new(
            self.context(task),
            graph,
            plan,
            self.settings.max_parallel,
        ))
    }

    /// Task status after a wave: running while work remains, otherwise
    /// blocked or escalated after whatever halted it.
    fn settle(&self, task: &mut Task, orchestrator: &TaskOrchestrator) -> Result<(), EngineError> {
        if task.status == TaskStatus::Complete {
            return Ok(());
        }
        if task.all_complete() || orchestrator.next_wave(task).is_some() {
            task.status = TaskStatus::Running;
            return Ok(());
        }
        let escalated = self
            .escalations(&task.id)?
            .iter()
            .any(|r| r.kind == EscalationKind::Escalated);
        task.status = if escalated {
            TaskStatus::Escalated
        } else {
            TaskStatus::Blocked
        };
        Ok(())
    }

    fn record_progress(
        &self,
        task: &Task,
        records: Vec<PhaseRecord>,
        usage: &ResourceUsage,
    ) -> Result<(), EngineError> {
        let mut session = self.session_for(task)?;
        session.record_phases(records);
        session.resource_usage.add(usage);
        session.capture(task);
        self.sessions.save(&session)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryBackend;
    use crate::consensus::Strategy;
    use crate::review::findings::{Issue, Severity};
    use crate::task::ComponentSpec;
    use crate::worker::ScriptedWorker;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            backoff: BackoffPolicy {
                retries: 1,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        }
    }

    fn engine(worker: ScriptedWorker) -> (Engine, JsonStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = JsonStore::in_memory();
        let workers = worker.with_tree(backend.clone()).into_workers(6, 3);
        let engine = Engine::new(store.clone(), backend, workers, settings()).unwrap();
        (engine, store)
    }

    fn diamond() -> TaskSpec {
        TaskSpec::new(
            "Build a login flow",
            vec![
                ComponentSpec::new("A", &[]),
                ComponentSpec::new("B", &[]),
                ComponentSpec::new("C", &["A", "B"]),
            ],
        )
        .with_approach("Session cookies")
    }

    fn critical() -> Issue {
        Issue::new(Severity::Critical, "src/auth.rs:40", "Password compared in plain text")
    }

    #[tokio::test]
    async fn test_waves_then_completion() {
        let worker = ScriptedWorker::passing();
        let (engine, store) = engine(worker.clone());
        let id = engine.start_task(&diamond(), ".").unwrap();

        let first = engine.run_wave(&id).await.unwrap().unwrap();
        assert_eq!(first.components, vec!["A", "B"]);
        let second = engine.run_wave(&id).await.unwrap().unwrap();
        assert_eq!(second.components, vec!["C"]);
        assert!(engine.run_wave(&id).await.unwrap().is_none());

        let outcome = engine.complete_task(&id).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Complete { task_id: id.clone() });
        assert!(store.get::<Task>(&keys::task(&id)).unwrap().is_none());
        assert!(engine.load_session(&id).unwrap().is_none());

        let archived = engine.get_state(&id).unwrap();
        assert_eq!(archived.status, TaskStatus::Complete);
        assert_eq!(worker.calls_matching("review:task:"), 2);

        // Completing again is a no-op.
        assert!(matches!(
            engine.complete_task(&id).await.unwrap(),
            TaskOutcome::Complete { .. }
        ));
    }

    #[test]
    fn test_cycle_rejected_at_start() {
        let (engine, store) = engine(ScriptedWorker::passing());
        let spec = TaskSpec::new(
            "Loop",
            vec![ComponentSpec::new("A", &["B"]), ComponentSpec::new("B", &["A"])],
        );
        let err = engine.start_task(&spec, ".").unwrap_err();
        match &err {
            EngineError::CycleDetected { path } => assert_eq!(path, &["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(err.is_fatal());
        assert!(store.list("tasks/").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_dependency_is_never_started() {
        let worker = ScriptedWorker::passing().with_stage_error("A", Stage::Implement, "compiler crashed");
        let (engine, _store) = engine(worker.clone());
        let id = engine.start_task(&diamond(), ".").unwrap();

        let outcome = engine.run_task(&id).await.unwrap();
        match outcome {
            TaskOutcome::Blocked {
                ref component,
                ref chain,
                ref record,
                ..
            } => {
                assert_eq!(component, "A");
                assert_eq!(chain, &["C"]);
                assert_eq!(record.as_ref().unwrap().error_kind, "worker_failed");
            }
            ref other => panic!("expected BLOCKED, got {other}"),
        }
        assert!(outcome.to_string().starts_with("BLOCKED(A, "));

        let task = engine.get_state(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(task.component("B").unwrap().status, ComponentStatus::Complete);
        assert_eq!(task.component("C").unwrap().status, ComponentStatus::NotStarted);
        assert_eq!(worker.calls_matching("skeleton:C"), 0);
        assert_eq!(engine.escalations(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_reports_every_blocked_component() {
        let worker = ScriptedWorker::passing()
            .with_stage_error("A", Stage::Implement, "compiler crashed")
            .with_stage_error("B", Stage::Test, "test runner missing");
        let (engine, _store) = engine(worker);
        let spec = TaskSpec::new(
            "Two pipelines",
            vec![
                ComponentSpec::new("A", &[]),
                ComponentSpec::new("B", &[]),
                ComponentSpec::new("C", &["A"]),
                ComponentSpec::new("D", &["B"]),
            ],
        );
        let id = engine.start_task(&spec, ".").unwrap();

        let outcome = engine.run_task(&id).await.unwrap();
        assert_eq!(outcome.halted_components(), vec!["A", "B"]);
        let TaskOutcome::Blocked {
            component,
            chain,
            others,
            ..
        } = &outcome
        else {
            panic!("expected BLOCKED, got {outcome}");
        };
        assert_eq!(component, "A");
        assert_eq!(chain, &["C"]);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].component, "B");
        assert_eq!(others[0].chain, vec!["D"]);
        assert_eq!(others[0].record.as_ref().unwrap().error_kind, "worker_failed");
        assert!(outcome.to_string().ends_with("and 1 more: B"));
    }

    #[tokio::test]
    async fn test_split_vote_escalates_with_record() {
        let worker = ScriptedWorker::passing()
            .with_review_rounds("A", "correctness-auditor", vec![vec![critical()]; 5])
            .with_votes(vec![Strategy::FixInPlace, Strategy::Refactor, Strategy::Escalate]);
        let (engine, _store) = engine(worker);
        let spec = TaskSpec::new("Auth", vec![ComponentSpec::new("A", &[])]);
        let id = engine.start_task(&spec, ".").unwrap();

        let outcome = engine.run_task(&id).await.unwrap();
        let TaskOutcome::Escalated {
            component, record, ..
        } = outcome
        else {
            panic!("expected ESCALATED");
        };
        assert_eq!(component, "A");
        assert_eq!(record.error_kind, "consensus_no_majority");
        let voting = record.voting.as_ref().unwrap();
        assert_eq!(voting.decision, None);
        assert_eq!(
            voting.tally_summary(),
            "FIX_IN_PLACE=1 REFACTOR=1 ESCALATE=1 (abstained=0 of 3)"
        );
        assert_eq!(record.fingerprints, vec![critical().fingerprint()]);
        assert_eq!(engine.get_state(&id).unwrap().status, TaskStatus::Escalated);
    }

    #[tokio::test]
    async fn test_session_round_trip_preserves_completed_components() {
        let worker = ScriptedWorker::passing();
        let (engine, _store) = engine(worker);
        let id = engine.start_task(&diamond(), ".").unwrap();
        engine.run_wave(&id).await.unwrap();

        let session = engine.load_session(&id).unwrap().unwrap();
        assert_eq!(
            session.completed_components(),
            ["A", "B"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
        );
        assert_eq!(session.resource_usage.waves_run, 1);
        assert_eq!(session.completed_phases.len(), 10);
        assert_eq!(
            session.completed_phases.iter().filter(|p| !p.is_compressed()).count(),
            3
        );

        let saved = engine.save_session(&session).unwrap();
        let loaded = engine.load_session(&id).unwrap().unwrap();
        assert_eq!(loaded.components, saved.components);
        assert_eq!(loaded.completed_components(), session.completed_components());
    }

    #[tokio::test]
    async fn test_resume_is_idempotent_and_skips_completed() {
        let worker = ScriptedWorker::passing();
        let (engine, _store) = engine(worker.clone());
        let id = engine.start_task(&diamond(), ".").unwrap();
        engine.run_wave(&id).await.unwrap();

        let once = engine.resume_task(&id).unwrap();
        let twice = engine.resume_task(&id).unwrap();
        assert_eq!(once.components, twice.components);
        assert_eq!(once.completed(), twice.completed());
        assert_eq!(once.component("A").unwrap().status, ComponentStatus::Complete);

        engine.run_wave(&id).await.unwrap();
        assert_eq!(worker.calls_matching("skeleton:A"), 1);
        assert_eq!(worker.calls_matching("skeleton:C"), 1);
    }

    #[tokio::test]
    async fn test_resume_restarts_in_flight_components() {
        let (engine, store) = engine(ScriptedWorker::passing());
        let id = engine.start_task(&diamond(), ".").unwrap();

        let mut session = engine.load_session(&id).unwrap().unwrap();
        if let Some(state) = session.components.get_mut("A") {
            state.status = ComponentStatus::Validating;
            state.stage = Stage::Validate;
        }
        engine.save_session(&session).unwrap();

        let task = engine.resume_task(&id).unwrap();
        let a = task.component("A").unwrap();
        assert_eq!(a.status, ComponentStatus::NotStarted);
        assert_eq!(a.stage, Stage::Skeleton);
        let stored = store.get::<Task>(&keys::task(&id)).unwrap().unwrap();
        assert_eq!(stored.components, task.components);
    }

    #[tokio::test]
    async fn test_complete_requires_every_component() {
        let (engine, _store) = engine(ScriptedWorker::passing());
        let id = engine.start_task(&diamond(), ".").unwrap();
        engine.run_wave(&id).await.unwrap();

        let err = engine.complete_task(&id).await.unwrap_err();
        match err {
            EngineError::IncompleteTask { pending, .. } => assert_eq!(pending, vec!["C"]),
            other => panic!("expected IncompleteTask, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unblock_restarts_at_halted_stage() {
        let worker = ScriptedWorker::passing()
            .with_review_rounds("A", "correctness-auditor", vec![vec![critical()]; 4]);
        let (engine, _store) = engine(worker.clone());
        let id = engine.start_task(&diamond(), ".").unwrap();
        engine.run_task(&id).await.unwrap();

        let blocked = engine.get_state(&id).unwrap();
        assert_eq!(blocked.component("A").unwrap().halted_at, Some(Stage::Validate));
        assert_eq!(blocked.component("C").unwrap().blocked_by.as_deref(), Some("A"));

        let task = engine.unblock(&id, "A").unwrap();
        assert!(task.component("A").unwrap().is_runnable());
        assert!(task.component("C").unwrap().is_runnable());
        assert!(engine.escalations(&id).unwrap().is_empty());

        let outcome = engine.run_task(&id).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Complete { .. }));
        assert_eq!(worker.calls_matching("skeleton:A"), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_operations() {
        let (engine, _store) = engine(ScriptedWorker::passing());
        let id = engine.start_task(&diamond(), ".").unwrap();
        let cp = engine.create_checkpoint(&id, "manual").await.unwrap();
        assert_eq!(engine.list_checkpoints(&id).unwrap(), vec![cp.clone()]);
        engine.rollback(&id, &cp.id).unwrap();
        assert!(matches!(
            engine.rollback(&id, "missing"),
            Err(EngineError::RollbackTargetMissing { .. })
        ));
        assert_eq!(engine.cleanup_checkpoints(&id).unwrap(), 1);
        assert!(matches!(
            engine.create_checkpoint("nope", "x").await,
            Err(EngineError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_even_judge_count_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let workers = ScriptedWorker::passing().into_workers(2, 2);
        let result = Engine::new(JsonStore::in_memory(), backend, workers, settings());
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_set_approach_keeps_requirements() {
        let (engine, _store) = engine(ScriptedWorker::passing());
        let id = engine.start_task(&diamond(), ".").unwrap();
        let task = engine.set_approach(&id, "JWT").unwrap();
        assert_eq!(task.approach, "JWT");
        assert_eq!(task.requirements(), "Build a login flow");
        assert_eq!(engine.load_session(&id).unwrap().unwrap().approach, "JWT");
    }
}
