//! The fix-and-revalidate decision after a failed round.
//!
//! Shared by the component executor (gate and test failures) and the
//! task-level gate. A failed round either earns another fix, convenes the
//! judges when the same issue keeps coming back, or halts the unit.

use crate::consensus::{AttemptHistory, Ballot, ConsensusDecision, EscalationPolicy, NextStep, VotingRecord};
use crate::errors::EngineError;
use crate::orchestrator::context::ExecutionContext;
use crate::orchestrator::events::OrchestratorEvent;
use crate::orchestrator::outcome::{EscalationKind, EscalationRecord};
use crate::review::findings::Issue;
use crate::session::ResourceUsage;
use crate::worker::WorkUnit;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalFix {
    NotGranted,
    Granted,
    Used,
}

pub(crate) enum Verdict {
    /// Run the fixer, then revalidate.
    Fix,
    Halt(Box<EscalationRecord>),
}

pub(crate) struct Remediation {
    policy: EscalationPolicy,
    history: AttemptHistory,
    final_fix: FinalFix,
    guidance: Option<String>,
    voting: Option<VotingRecord>,
}

impl Remediation {
    pub(crate) fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            history: AttemptHistory::new(),
            final_fix: FinalFix::NotGranted,
            guidance: None,
            voting: None,
        }
    }

    pub(crate) fn history(&self) -> &AttemptHistory {
        &self.history
    }

    /// Guidance of a binding `FIX_IN_PLACE` decision, for the final fix.
    pub(crate) fn guidance(&self) -> Option<String> {
        self.guidance.clone()
    }

    pub(crate) fn record_fix(&mut self) {
        self.history.record_fix();
        if self.final_fix == FinalFix::Granted {
            self.final_fix = FinalFix::Used;
        }
    }

    /// Decide what follows a round that reported `issues` (at least one of
    /// them blocking).
    pub(crate) async fn after_failure(
        &mut self,
        ctx: &ExecutionContext,
        unit: &WorkUnit,
        issues: &[Issue],
        usage: &mut ResourceUsage,
    ) -> Verdict {
        self.history.record_round(issues);
        let blocking: Vec<Issue> = issues.iter().filter(|i| i.is_blocking()).cloned().collect();

        if self.final_fix == FinalFix::Used {
            warn!(unit = unit.name(), "Final fix did not resolve the recurring issues");
            return Verdict::Halt(Box::new(self.exhausted(ctx, unit, blocking)));
        }

        match self.policy.next_step(&self.history) {
            NextStep::Fix => {
                info!(
                    unit = unit.name(),
                    attempt = self.history.fixes() + 1,
                    blocking = blocking.len(),
                    "Scheduling fix attempt"
                );
                Verdict::Fix
            }
            NextStep::Exhausted => Verdict::Halt(Box::new(self.exhausted(ctx, unit, blocking))),
            NextStep::Vote { recurring } => {
                let ballot = Ballot {
                    task_id: ctx.task_id.clone(),
                    unit: unit.name().to_string(),
                    requirements: ctx.requirements.clone(),
                    approach: ctx.approach.clone(),
                    recurring: blocking
                        .iter()
                        .filter(|i| recurring.contains(&i.fingerprint()))
                        .cloned()
                        .collect(),
                    attempts: self.history.rounds().to_vec(),
                };
                info!(
                    unit = unit.name(),
                    recurring = recurring.len(),
                    judges = ctx.resolver.judge_count(),
                    "Issue survived the fix budget, convening judges"
                );
                let (decision, record) = ctx.resolver.resolve(&ballot).await;
                usage.judge_calls += ctx.resolver.judge_count() as u64;
                ctx.events
                    .emit(OrchestratorEvent::ConsensusReached {
                        unit: unit.name().to_string(),
                        tally: record.tally_summary(),
                        decision: record.decision,
                    })
                    .await;
                self.apply_decision(ctx, unit, decision, record, blocking)
            }
        }
    }

    fn apply_decision(
        &mut self,
        ctx: &ExecutionContext,
        unit: &WorkUnit,
        decision: ConsensusDecision,
        record: VotingRecord,
        blocking: Vec<Issue>,
    ) -> Verdict {
        match decision {
            ConsensusDecision::FixInPlace { guidance } => {
                self.final_fix = FinalFix::Granted;
                self.guidance = Some(guidance);
                self.voting = Some(record);
                Verdict::Fix
            }
            ConsensusDecision::Refactor { proposal } => {
                let error = EngineError::RetryBudgetExhausted {
                    unit: unit.name().to_string(),
                    attempts: self.history.fixes(),
                    fingerprints: self.last_fingerprints(),
                };
                let escalation = self
                    .record(ctx, unit, EscalationKind::Escalated, &error, blocking)
                    .with_voting(Some(record))
                    .with_proposal(proposal);
                Verdict::Halt(Box::new(escalation))
            }
            ConsensusDecision::Escalate => {
                let error = EngineError::RetryBudgetExhausted {
                    unit: unit.name().to_string(),
                    attempts: self.history.fixes(),
                    fingerprints: self.last_fingerprints(),
                };
                let escalation = self
                    .record(ctx, unit, EscalationKind::Escalated, &error, blocking)
                    .with_voting(Some(record));
                Verdict::Halt(Box::new(escalation))
            }
            ConsensusDecision::NoMajority => {
                let error = EngineError::ConsensusNoMajority {
                    unit: unit.name().to_string(),
                    record: Box::new(record.clone()),
                };
                let escalation = self
                    .record(ctx, unit, EscalationKind::Escalated, &error, blocking)
                    .with_voting(Some(record));
                Verdict::Halt(Box::new(escalation))
            }
        }
    }

    fn exhausted(&self, ctx: &ExecutionContext, unit: &WorkUnit, blocking: Vec<Issue>) -> EscalationRecord {
        let error = EngineError::RetryBudgetExhausted {
            unit: unit.name().to_string(),
            attempts: self.history.fixes(),
            fingerprints: self.last_fingerprints(),
        };
        self.record(ctx, unit, EscalationKind::Blocked, &error, blocking)
            .with_voting(self.voting.clone())
    }

    fn record(
        &self,
        ctx: &ExecutionContext,
        unit: &WorkUnit,
        kind: EscalationKind,
        error: &EngineError,
        blocking: Vec<Issue>,
    ) -> EscalationRecord {
        EscalationRecord::new(&ctx.task_id, unit.name(), kind, unit.stage, error)
            .with_attempts(self.history.fixes(), self.history.rounds().to_vec())
            .with_issues(blocking)
    }

    fn last_fingerprints(&self) -> Vec<String> {
        self.history
            .last()
            .map(|round| round.fingerprints.iter().map(|f| f.to_string()).collect())
            .unwrap_or_default()
    }
}
