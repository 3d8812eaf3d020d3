//! Phase Executor: drives one component through
//! `SKELETON -> IMPLEMENT -> VALIDATE -> TEST -> DOCUMENT -> COMPLETE`.
//!
//! Every transition between working stages is checkpointed, including the
//! step back to `IMPLEMENT` after a failed gate or test, where the fixer runs
//! instead of the implementer. Anything unrecoverable moves the component to
//! `BLOCKED` with an [`EscalationRecord`].

use crate::errors::EngineError;
use crate::lifecycle::{Stage, StageEvent, transition};
use crate::orchestrator::context::ExecutionContext;
use crate::orchestrator::events::OrchestratorEvent;
use crate::orchestrator::outcome::{ComponentOutcome, EscalationKind, EscalationRecord};
use crate::orchestrator::remediation::{Remediation, Verdict};
use crate::review::findings::{Issue, Severity};
use crate::session::{PhaseRecord, ResourceUsage};
use crate::task::{Component, ComponentStatus};
use crate::worker::{StageOutput, UnitScope, WorkUnit, WorkerRole};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Halt = Box<EscalationRecord>;

pub struct PhaseExecutor {
    ctx: Arc<ExecutionContext>,
    component: Component,
    wave: usize,
    usage: ResourceUsage,
    records: Vec<PhaseRecord>,
    validate: Remediation,
    test: Remediation,
    /// Stage whose failure the next IMPLEMENT run has to fix.
    pending_fix: Option<Stage>,
    last_gate_issues: Vec<Issue>,
}

impl PhaseExecutor {
    pub fn new(ctx: Arc<ExecutionContext>, component: Component, wave: usize) -> Self {
        let policy = ctx.component_policy;
        Self {
            ctx,
            component,
            wave,
            usage: ResourceUsage::default(),
            records: Vec::new(),
            validate: Remediation::new(policy),
            test: Remediation::new(policy),
            pending_fix: None,
            last_gate_issues: Vec::new(),
        }
    }

    /// Run until the component is `COMPLETE` or `BLOCKED`.
    ///
    /// Starts from the component's current stage, so a component unblocked
    /// by a human resumes where it halted with a fresh retry budget.
    pub async fn run(mut self) -> ComponentOutcome {
        if self.component.stage.is_terminal() {
            self.component.stage = self.component.halted_at.unwrap_or(Stage::Skeleton);
        }
        self.component.status = ComponentStatus::InProgress;
        self.component.halted_at = None;
        self.component.blocked_by = None;

        info!(
            task = %self.ctx.task_id,
            component = %self.component.name,
            wave = self.wave,
            stage = %self.component.stage,
            "Component started"
        );
        self.ctx
            .events
            .emit(OrchestratorEvent::ComponentStarted {
                component: self.component.name.clone(),
                wave: self.wave,
                stage: self.component.stage,
            })
            .await;

        let mut escalation = None;
        while !self.component.stage.is_terminal() {
            if let Err(record) = self.step(self.component.stage).await {
                self.halt(&record).await;
                escalation = Some(*record);
                break;
            }
        }

        self.ctx
            .events
            .emit(OrchestratorEvent::ComponentFinished {
                component: self.component.name.clone(),
                status: self.component.status,
                stage: self.component.stage,
            })
            .await;

        ComponentOutcome {
            component: self.component,
            records: self.records,
            escalation,
            usage: self.usage,
        }
    }

    async fn step(&mut self, stage: Stage) -> Result<(), Halt> {
        match stage {
            Stage::Skeleton | Stage::Document => {
                let output = self.run_worker(stage).await?;
                let record = PhaseRecord::full(&self.component.name, stage, &output);
                self.advance(StageEvent::ArtifactReady, record).await
            }
            Stage::Implement => {
                let output = match self.pending_fix.take() {
                    Some(failed) => self.run_fix(failed).await?,
                    None => self.run_worker(stage).await?,
                };
                let record = PhaseRecord::full(&self.component.name, stage, &output);
                self.advance(StageEvent::ArtifactReady, record).await
            }
            Stage::Validate => self.validate_stage().await,
            Stage::Test => self.test_stage().await,
            Stage::Complete | Stage::Blocked => Ok(()),
        }
    }

    async fn validate_stage(&mut self) -> Result<(), Halt> {
        self.component.status = ComponentStatus::Validating;
        let unit = self.unit(Stage::Validate);
        let tier = self.ctx.gate.config().policy.assess(&self.component.risk).tier;
        let report = self.ctx.gate.run(&unit, tier).await;
        self.usage.reviewer_calls += report.reviewer_count as u64;
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
        self.component.issues = report.issues.clone();
        self.component.status = ComponentStatus::InProgress;

        if let Err(failed) = report.check() {
            info!(component = %self.component.name, error = %failed, "Gate failed");
        } else {
            self.last_gate_issues = report.issues.clone();
            let output = StageOutput::new(report.summary()).with_issues(report.issues);
            let record = PhaseRecord::full(&self.component.name, Stage::Validate, &output)
                .with_attempts(self.validate.history().rounds().to_vec());
            return self.advance(StageEvent::GatePassed, record).await;
        }

        match self
            .validate
            .after_failure(&self.ctx, &unit, &report.issues, &mut self.usage)
            .await
        {
            Verdict::Fix => {
                self.pending_fix = Some(Stage::Validate);
                self.retreat().await
            }
            Verdict::Halt(record) => Err(record),
        }
    }

    async fn test_stage(&mut self) -> Result<(), Halt> {
        let output = self.run_worker(Stage::Test).await?;
        if !output.has_blocking_issues() {
            self.component.issues = self.last_gate_issues.clone();
            let record = PhaseRecord::full(&self.component.name, Stage::Test, &output);
            return self.advance(StageEvent::ArtifactReady, record).await;
        }

        debug!(
            component = %self.component.name,
            issues = output.issues.len(),
            "Tests reported blocking issues"
        );
        self.component.issues = output.issues.clone();
        let unit = self.unit(Stage::Test);
        match self
            .test
            .after_failure(&self.ctx, &unit, &output.issues, &mut self.usage)
            .await
        {
            Verdict::Fix => {
                self.pending_fix = Some(Stage::Test);
                self.retreat().await
            }
            Verdict::Halt(record) => Err(record),
        }
    }

    async fn run_worker(&mut self, stage: Stage) -> Result<StageOutput, Halt> {
        let Some(role) = WorkerRole::for_stage(stage) else {
            return Err(self.failure(EngineError::InvalidTransition {
                from: stage,
                event: StageEvent::ArtifactReady,
            }));
        };
        let unit = self.unit(stage);
        self.usage.worker_calls += 1;
        self.ctx
            .workers
            .stage
            .run_stage(role, &unit)
            .await
            .map_err(|e| {
                self.failure(EngineError::Worker {
                    role,
                    message: format!("{:#}", e),
                })
            })
    }

    /// Run the fixer against the blocking issues of the `failed` stage.
    async fn run_fix(&mut self, failed: Stage) -> Result<StageOutput, Halt> {
        let remediation = match failed {
            Stage::Test => &mut self.test,
            _ => &mut self.validate,
        };
        let guidance = remediation.guidance();
        remediation.record_fix();

        let unit = self.unit(Stage::Implement).with_guidance(guidance);
        let blocking: Vec<Issue> = self
            .component
            .issues
            .iter()
            .filter(|i| i.is_blocking())
            .cloned()
            .collect();
        self.usage.worker_calls += 1;
        self.usage.fix_attempts += 1;
        info!(
            component = %self.component.name,
            issues = blocking.len(),
            guided = unit.guidance.is_some(),
            "Running fixer"
        );
        self.ctx
            .workers
            .fixer
            .fix(&unit, &blocking)
            .await
            .map_err(|e| {
                self.failure(EngineError::Worker {
                    role: WorkerRole::Fixer,
                    message: format!("{:#}", e),
                })
            })
    }

    /// Forward transition: checkpoint, then move to the next stage.
    async fn advance(&mut self, event: StageEvent, record: PhaseRecord) -> Result<(), Halt> {
        let from = self.component.stage;
        let to = transition(from, event).map_err(|e| self.failure(e))?;

        let changed_paths = self.changed_since_last_checkpoint();
        let label = format!("{}:{}", self.component.name, to.label());
        let checkpoint = self.checkpoint(from, to, &label).await?;
        if to == Stage::Complete {
            self.component.status = ComponentStatus::Complete;
        }
        self.records.push(
            record
                .with_checkpoint(Some(checkpoint))
                .with_changed_paths(changed_paths),
        );
        debug!(component = %self.component.name, %from, %to, "Stage advanced");
        Ok(())
    }

    /// Back to IMPLEMENT after a failed gate or test. The checkpoint marks
    /// the tree the fixer starts from.
    async fn retreat(&mut self) -> Result<(), Halt> {
        let from = self.component.stage;
        let to = transition(from, StageEvent::GateFailed).map_err(|e| self.failure(e))?;
        let label = format!("{}:{}-failed", self.component.name, from.label());
        self.checkpoint(from, to, &label).await?;
        debug!(component = %self.component.name, %from, %to, "Stage retreated for fix");
        Ok(())
    }

    /// Snapshot the tree, then move from `from` to `to`.
    async fn checkpoint(&mut self, from: Stage, to: Stage, label: &str) -> Result<String, Halt> {
        let checkpoint = self
            .ctx
            .checkpoints
            .create_with_retry(&self.ctx.task_id, label, self.ctx.backoff)
            .await
            .map_err(|e| self.failure(e))?;

        self.component.last_checkpoint = Some(checkpoint.id.clone());
        self.component.stage = to;
        self.ctx
            .events
            .emit(OrchestratorEvent::StageChanged {
                component: self.component.name.clone(),
                from,
                to,
                checkpoint: Some(checkpoint.id.clone()),
            })
            .await;
        Ok(checkpoint.id)
    }

    fn changed_since_last_checkpoint(&self) -> Vec<String> {
        let Some(ref id) = self.component.last_checkpoint else {
            return Vec::new();
        };
        let changed = self
            .ctx
            .checkpoints
            .get(&self.ctx.task_id, id)
            .and_then(|checkpoint| self.ctx.checkpoints.changed_since(&checkpoint));
        match changed {
            Ok(paths) => paths,
            Err(e) => {
                warn!(component = %self.component.name, error = %e, "Could not diff against last checkpoint");
                Vec::new()
            }
        }
    }

    fn failure(&self, error: EngineError) -> Halt {
        let stage = self.component.stage;
        let history = if stage == Stage::Test {
            self.test.history()
        } else {
            self.validate.history()
        };
        Box::new(
            EscalationRecord::new(
                &self.ctx.task_id,
                &self.component.name,
                EscalationKind::Blocked,
                stage,
                &error,
            )
            .with_attempts(history.fixes(), history.rounds().to_vec())
            .with_issues(
                self.component
                    .issues
                    .iter()
                    .filter(|i| i.is_blocking())
                    .cloned()
                    .collect(),
            ),
        )
    }

    async fn halt(&mut self, record: &EscalationRecord) {
        warn!(
            task = %self.ctx.task_id,
            component = %self.component.name,
            kind = %record.kind,
            reason = %record.reason,
            "Component halted"
        );
        let from = self.component.stage;
        let to = match transition(from, StageEvent::Unrecoverable) {
            Ok(to) => to,
            Err(e) => {
                warn!(component = %self.component.name, error = %e, "Halting outside the transition table");
                Stage::Blocked
            }
        };
        self.component.halted_at = Some(from);
        self.component.stage = to;
        self.component.status = ComponentStatus::Blocked;
        self.ctx
            .events
            .emit(OrchestratorEvent::StageChanged {
                component: self.component.name.clone(),
                from,
                to,
                checkpoint: None,
            })
            .await;
    }

    fn unit(&self, stage: Stage) -> WorkUnit {
        WorkUnit {
            task_id: self.ctx.task_id.clone(),
            scope: UnitScope::Component(self.component.name.clone()),
            stage,
            requirements: self.ctx.requirements.clone(),
            approach: self.ctx.approach.clone(),
            description: self.component.description.clone(),
            paths: self.component.scope.clone(),
            components: vec![self.component.name.clone()],
            guidance: None,
        }
    }
}
