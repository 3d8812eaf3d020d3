//! Task Orchestrator: runs waves of phase executors behind a wave barrier
//! and runs the task-level gate once every component is complete.

use crate::dag::{ComponentGraph, WavePlan};
use crate::errors::EngineError;
use crate::lifecycle::Stage;
use crate::orchestrator::context::ExecutionContext;
use crate::orchestrator::events::OrchestratorEvent;
use crate::orchestrator::executor::PhaseExecutor;
use crate::orchestrator::outcome::{ComponentOutcome, EscalationKind, EscalationRecord, WaveResult};
use crate::orchestrator::remediation::{Remediation, Verdict};
use crate::review::findings::Severity;
use crate::review::gate::GateReport;
use crate::session::{PhaseRecord, ResourceUsage};
use crate::task::{Component, ComponentSpec, ComponentStatus, Task};
use crate::worker::{StageOutput, UnitScope, WorkUnit, WorkerRole};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Everything one wave produced.
#[derive(Debug, Clone)]
pub struct WaveRun {
    pub result: WaveResult,
    pub records: Vec<PhaseRecord>,
    pub escalations: Vec<EscalationRecord>,
    pub usage: ResourceUsage,
}

/// Result of the task-level gate.
#[derive(Debug, Clone)]
pub struct TaskGateRun {
    pub passed: bool,
    pub report: GateReport,
    pub escalation: Option<EscalationRecord>,
    pub records: Vec<PhaseRecord>,
    pub usage: ResourceUsage,
}

pub struct TaskOrchestrator {
    ctx: Arc<ExecutionContext>,
    graph: ComponentGraph,
    plan: WavePlan,
    max_parallel: usize,
}

impl TaskOrchestrator {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        graph: ComponentGraph,
        plan: WavePlan,
        max_parallel: usize,
    ) -> Self {
        Self {
            ctx,
            graph,
            plan,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn plan(&self) -> &WavePlan {
        &self.plan
    }

    /// The first planned wave with components that can start now: not yet
    /// run, not cancelled, and with every dependency complete.
    pub fn next_wave(&self, task: &Task) -> Option<(usize, Vec<String>)> {
        let done: BTreeSet<usize> = task
            .completed()
            .iter()
            .filter_map(|name| self.graph.index_of(name))
            .collect();
        self.plan.waves().iter().enumerate().find_map(|(index, wave)| {
            let ready: Vec<String> = wave
                .iter()
                .filter(|name| {
                    task.component(name).is_some_and(|c| c.is_runnable())
                        && self
                            .graph
                            .index_of(name)
                            .is_some_and(|idx| self.graph.dependencies_satisfied(idx, &done))
                })
                .cloned()
                .collect();
            (!ready.is_empty()).then_some((index, ready))
        })
    }

    /// Run the next wave to its barrier and fold the outcomes into `task`.
    /// Returns `None` when nothing can run.
    pub async fn run_wave(&self, task: &mut Task) -> Option<WaveRun> {
        let (index, names) = self.next_wave(task)?;
        let start = Instant::now();
        info!(task = %task.id, wave = index, components = ?names, "Wave started");
        self.ctx
            .events
            .emit(OrchestratorEvent::WaveStarted {
                task_id: task.id.clone(),
                wave: index,
                components: names.clone(),
            })
            .await;

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles = Vec::new();
        for name in &names {
            let Some(component) = task.component(name).cloned() else {
                continue;
            };
            let ctx = self.ctx.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                PhaseExecutor::new(ctx, component, index).run().await
            }));
        }
        let joined = join_all(handles).await;

        let mut run = WaveRun {
            result: WaveResult {
                task_id: task.id.clone(),
                index,
                components: names.clone(),
                completed: Vec::new(),
                blocked: Vec::new(),
                escalated: Vec::new(),
                cancelled: Vec::new(),
                duration_ms: 0,
            },
            records: Vec::new(),
            escalations: Vec::new(),
            usage: ResourceUsage::default(),
        };

        for (name, joined) in names.iter().zip(joined) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(component = %name, error = %e, "Phase executor panicked");
                    self.lost_executor(task, name, &e.to_string())
                }
            };
            self.fold(task, outcome, &mut run);
        }

        // Block propagation follows dependency edges only.
        let halted: Vec<String> = run
            .result
            .blocked
            .iter()
            .chain(run.result.escalated.iter())
            .cloned()
            .collect();
        for root in &halted {
            for dependent in self.graph.transitive_dependents(root) {
                if task.cancel(&dependent, root) {
                    info!(component = %dependent, blocked_by = %root, "Dependent cancelled");
                    run.result.cancelled.push(dependent);
                }
            }
        }
        run.result.cancelled.sort();
        run.result.cancelled.dedup();

        task.waves_run += 1;
        task.touch();
        run.usage.waves_run += 1;
        run.result.duration_ms = start.elapsed().as_millis() as u64;
        run.usage.elapsed_ms += run.result.duration_ms;

        info!(
            task = %task.id,
            wave = index,
            completed = run.result.completed.len(),
            blocked = run.result.blocked.len(),
            escalated = run.result.escalated.len(),
            cancelled = run.result.cancelled.len(),
            duration_ms = run.result.duration_ms,
            "Wave completed"
        );
        self.ctx
            .events
            .emit(OrchestratorEvent::WaveCompleted {
                wave: index,
                completed: run.result.completed.len(),
                blocked: run.result.blocked.len() + run.result.escalated.len(),
                cancelled: run.result.cancelled.len(),
            })
            .await;
        Some(run)
    }

    fn fold(&self, task: &mut Task, outcome: ComponentOutcome, run: &mut WaveRun) {
        let name = outcome.component.name.clone();
        run.usage.add(&outcome.usage);
        run.records.extend(outcome.records);

        let mut escalation = outcome.escalation;
        let mut component = outcome.component;
        if let Err(e) = task.apply_outcome(component.clone()) {
            warn!(component = %name, error = %e, "Rejected executor outcome");
            let stage = component.stage;
            component.halted_at = Some(stage);
            component.stage = Stage::Blocked;
            component.status = ComponentStatus::Blocked;
            if let Some(slot) = task.component_mut(&name) {
                *slot = component.clone();
            }
            escalation = Some(EscalationRecord::new(
                &task.id,
                &name,
                EscalationKind::Blocked,
                stage,
                &e,
            ));
        }

        match (&component.status, &escalation) {
            (ComponentStatus::Complete, _) => run.result.completed.push(name),
            (_, Some(record)) if record.kind == EscalationKind::Escalated => {
                run.result.escalated.push(name)
            }
            _ => run.result.blocked.push(name),
        }
        run.escalations.extend(escalation);
    }

    fn lost_executor(&self, task: &Task, name: &str, reason: &str) -> ComponentOutcome {
        let mut component = task
            .component(name)
            .cloned()
            .unwrap_or_else(|| Component::from_spec(&ComponentSpec::new(name, &[])));
        let stage = component.stage;
        let error = EngineError::InvariantViolation {
            component: name.to_string(),
            message: format!("phase executor aborted: {}", reason),
        };
        component.halted_at = Some(stage);
        component.stage = Stage::Blocked;
        component.status = ComponentStatus::Blocked;
        ComponentOutcome {
            component,
            records: Vec::new(),
            escalation: Some(EscalationRecord::new(
                &task.id,
                name,
                EscalationKind::Blocked,
                stage,
                &error,
            )),
            usage: ResourceUsage::default(),
        }
    }

    /// The task-level gate over the merged result of every component, with
    /// the task retry budget. Uses the highest risk tier of any component.
    pub async fn validate_task(&self, task: &Task) -> TaskGateRun {
        let tier = self
            .ctx
            .gate
            .config()
            .policy
            .max_tier(task.components.iter().map(|c| &c.risk));
        let unit = WorkUnit {
            task_id: task.id.clone(),
            scope: UnitScope::Task,
            stage: Stage::Validate,
            requirements: task.requirements().to_string(),
            approach: task.approach.clone(),
            description: format!("Merged result of {} component(s)", task.components.len()),
            paths: task
                .components
                .iter()
                .flat_map(|c| c.scope.iter().cloned())
                .collect(),
            components: task.components.iter().map(|c| c.name.clone()).collect(),
            guidance: None,
        };

        let mut remediation = Remediation::new(self.ctx.task_policy);
        let mut usage = ResourceUsage::default();
        let mut records = Vec::new();
        loop {
            let report = self.ctx.gate.run(&unit, tier).await;
            usage.reviewer_calls += report.reviewer_count as u64;
            self.ctx
                .events
                .emit(OrchestratorEvent::GateCompleted {
                    unit: unit.name().to_string(),
                    passed: report.passed,
                    critical: report.count_by_severity(Severity::Critical),
                    important: report.count_by_severity(Severity::Important),
                    reviewers: report.reviewer_count,
                })
                .await;

            if let Err(failed) = report.check() {
                info!(task = %task.id, error = %failed, "Task gate failed");
            } else {
                let output = StageOutput::new(report.summary()).with_issues(report.issues.clone());
                records.push(
                    PhaseRecord::full(unit.name(), Stage::Validate, &output)
                        .with_attempts(remediation.history().rounds().to_vec()),
                );
                return TaskGateRun {
                    passed: true,
                    report,
                    escalation: None,
                    records,
                    usage,
                };
            }

            match remediation
                .after_failure(&self.ctx, &unit, &report.issues, &mut usage)
                .await
            {
                Verdict::Halt(record) => {
                    return TaskGateRun {
                        passed: false,
                        report,
                        escalation: Some(*record),
                        records,
                        usage,
                    };
                }
                Verdict::Fix => {
                    let guided = unit.clone().with_guidance(remediation.guidance());
                    remediation.record_fix();
                    usage.worker_calls += 1;
                    usage.fix_attempts += 1;
                    if let Err(e) = self
                        .ctx
                        .workers
                        .fixer
                        .fix(&guided, &report.blocking_issues())
                        .await
                    {
                        let error = EngineError::Worker {
                            role: WorkerRole::Fixer,
                            message: format!("{:#}", e),
                        };
                        let record = EscalationRecord::new(
                            &task.id,
                            unit.name(),
                            EscalationKind::Blocked,
                            Stage::Validate,
                            &error,
                        )
                        .with_attempts(
                            remediation.history().fixes(),
                            remediation.history().rounds().to_vec(),
                        )
                        .with_issues(report.blocking_issues());
                        return TaskGateRun {
                            passed: false,
                            report,
                            escalation: Some(record),
                            records,
                            usage,
                        };
                    }
                }
            }
        }
    }
}
