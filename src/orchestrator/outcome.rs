//! Results surfaced to callers: wave results, escalation records and the
//! terminal task outcome.

use crate::consensus::{AttemptRecord, Strategy, VotingRecord};
use crate::errors::EngineError;
use crate::lifecycle::Stage;
use crate::review::findings::{Fingerprint, Issue};
use crate::session::{PhaseRecord, ResourceUsage};
use crate::task::Component;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationKind {
    /// Halted by the engine: retry budget, worker or checkpoint failure.
    Blocked,
    /// Handed to a human by a consensus round.
    Escalated,
}

impl fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Escalated => write!(f, "ESCALATED"),
        }
    }
}

/// Everything a human needs to decide on a halted unit without re-deriving
/// its failure history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub task_id: String,
    pub unit: String,
    pub kind: EscalationKind,
    pub reason: String,
    /// [`EngineError::kind`] of the underlying error.
    pub error_kind: String,
    /// Stage the unit was in when it halted.
    pub stage: Stage,
    pub fix_attempts: u32,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub fingerprints: Vec<Fingerprint>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// Merged refactor proposal of a `REFACTOR` majority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<VotingRecord>,
    pub recorded_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn new(task_id: &str, unit: &str, kind: EscalationKind, stage: Stage, error: &EngineError) -> Self {
        Self {
            task_id: task_id.to_string(),
            unit: unit.to_string(),
            kind,
            reason: error.to_string(),
            error_kind: error.kind().to_string(),
            stage,
            fix_attempts: 0,
            attempts: Vec::new(),
            fingerprints: Vec::new(),
            issues: Vec::new(),
            strategy: None,
            proposal: None,
            voting: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_attempts(mut self, fix_attempts: u32, attempts: Vec<AttemptRecord>) -> Self {
        self.fingerprints = attempts
            .last()
            .map(|a| a.fingerprints.clone())
            .unwrap_or_default();
        self.fix_attempts = fix_attempts;
        self.attempts = attempts;
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_voting(mut self, voting: Option<VotingRecord>) -> Self {
        self.strategy = voting.as_ref().and_then(|v| v.decision);
        self.voting = voting;
        self
    }

    pub fn with_proposal(mut self, proposal: impl Into<String>) -> Self {
        self.proposal = Some(proposal.into());
        self
    }
}

impl fmt::Display for EscalationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at {} after {} fix attempt(s): {}",
            self.kind, self.unit, self.stage, self.fix_attempts, self.reason
        )?;
        if let Some(ref voting) = self.voting {
            write!(f, " [{}]", voting.tally_summary())?;
        }
        Ok(())
    }
}

/// What one phase executor hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct ComponentOutcome {
    pub component: Component,
    pub records: Vec<PhaseRecord>,
    pub escalation: Option<EscalationRecord>,
    pub usage: ResourceUsage,
}

/// Result of one wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveResult {
    pub task_id: String,
    /// Index into the wave plan.
    pub index: usize,
    pub components: Vec<String>,
    pub completed: Vec<String>,
    pub blocked: Vec<String>,
    pub escalated: Vec<String>,
    /// Not-yet-started dependents cancelled by this wave's blocked components.
    pub cancelled: Vec<String>,
    pub duration_ms: u64,
}

impl WaveResult {
    pub fn all_completed(&self) -> bool {
        self.completed.len() == self.components.len()
    }
}

/// A halted component and the dependents it kept from starting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltedComponent {
    pub component: String,
    pub reason: String,
    #[serde(default)]
    pub chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Box<EscalationRecord>>,
}

impl HaltedComponent {
    pub fn from_record(record: EscalationRecord, chain: Vec<String>) -> Self {
        Self {
            component: record.unit.clone(),
            reason: record.reason.clone(),
            chain,
            record: Some(Box::new(record)),
        }
    }

    pub fn is_escalated(&self) -> bool {
        self.record
            .as_ref()
            .is_some_and(|r| r.kind == EscalationKind::Escalated)
    }
}

/// Terminal (or current) state of a task as seen by a caller.
///
/// A halted task names its first halted component; every other halted
/// component of the same task is listed in `others`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Complete {
        task_id: String,
    },
    Blocked {
        component: String,
        reason: String,
        /// Components that never started because of `component`.
        chain: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record: Option<Box<EscalationRecord>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        others: Vec<HaltedComponent>,
    },
    Escalated {
        component: String,
        record: Box<EscalationRecord>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        others: Vec<HaltedComponent>,
    },
    /// Runnable work remains.
    Pending {
        pending: Vec<String>,
    },
}

impl TaskOutcome {
    /// Outcome of a task whose first halted component is `first`.
    pub fn halted(first: HaltedComponent, others: Vec<HaltedComponent>) -> Self {
        match first.record {
            Some(record) if record.kind == EscalationKind::Escalated => Self::Escalated {
                component: first.component,
                record,
                others,
            },
            record => Self::Blocked {
                component: first.component,
                reason: first.reason,
                chain: first.chain,
                record,
                others,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }

    /// Every component that halted, first one included.
    pub fn halted_components(&self) -> Vec<&str> {
        let (first, others) = match self {
            Self::Blocked {
                component, others, ..
            }
            | Self::Escalated {
                component, others, ..
            } => (component, others),
            Self::Complete { .. } | Self::Pending { .. } => return Vec::new(),
        };
        std::iter::once(first.as_str())
            .chain(others.iter().map(|h| h.component.as_str()))
            .collect()
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let others = match self {
            Self::Complete { .. } => return write!(f, "COMPLETE"),
            Self::Pending { pending } => return write!(f, "PENDING({})", pending.join(", ")),
            Self::Blocked {
                component,
                reason,
                others,
                ..
            } => {
                write!(f, "BLOCKED({}, {})", component, reason)?;
                others
            }
            Self::Escalated {
                component,
                record,
                others,
            } => {
                match record.voting {
                    Some(ref voting) => {
                        write!(f, "ESCALATED({}, {})", component, voting.tally_summary())?
                    }
                    None => write!(f, "ESCALATED({})", component)?,
                }
                others
            }
        };
        if !others.is_empty() {
            let names: Vec<&str> = others.iter().map(|h| h.component.as_str()).collect();
            write!(f, " and {} more: {}", others.len(), names.join(", "))?;
        }
        Ok(())
    }
}
