//! Stuck detection across fix rounds.
//!
//! Each gate (or test) round records the fingerprints of its blocking
//! issues. A unit is *making progress* when the rounds report different
//! issues and *stuck* when one fingerprint is present in every round of the
//! window that spans the fix budget.

use crate::review::findings::{Fingerprint, Issue, Severity, blocking_fingerprints};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One gate or test round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub round: u32,
    pub passed: bool,
    /// Fingerprints of the blocking issues, sorted.
    pub fingerprints: Vec<Fingerprint>,
    pub critical: usize,
    pub important: usize,
    /// Fix attempts performed before this round.
    pub fixes_before: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptHistory {
    rounds: Vec<AttemptRecord>,
    fixes: u32,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the issues of one round; the round passed if none are blocking.
    pub fn record_round(&mut self, issues: &[Issue]) -> &AttemptRecord {
        let fingerprints: Vec<Fingerprint> = blocking_fingerprints(issues).into_iter().collect();
        let critical = issues
            .iter()
            .filter(|i| i.severity() == Severity::Critical)
            .count();
        let important = issues
            .iter()
            .filter(|i| i.severity() == Severity::Important)
            .count();
        self.rounds.push(AttemptRecord {
            round: self.rounds.len() as u32 + 1,
            passed: fingerprints.is_empty(),
            fingerprints,
            critical,
            important,
            fixes_before: self.fixes,
            recorded_at: Utc::now(),
        });
        &self.rounds[self.rounds.len() - 1]
    }

    pub fn record_fix(&mut self) {
        self.fixes += 1;
    }

    pub fn fixes(&self) -> u32 {
        self.fixes
    }

    pub fn rounds(&self) -> &[AttemptRecord] {
        &self.rounds
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.rounds.last()
    }

    /// Fingerprints present in each of the last `window` rounds. Empty when
    /// fewer than `window` rounds exist.
    pub fn recurring(&self, window: usize) -> BTreeSet<Fingerprint> {
        if window == 0 || self.rounds.len() < window {
            return BTreeSet::new();
        }
        let mut recent = self.rounds[self.rounds.len() - window..].iter();
        let Some(first) = recent.next() else {
            return BTreeSet::new();
        };
        let mut shared: BTreeSet<Fingerprint> = first.fingerprints.iter().cloned().collect();
        for round in recent {
            let prints: BTreeSet<Fingerprint> = round.fingerprints.iter().cloned().collect();
            shared = shared.intersection(&prints).cloned().collect();
        }
        shared
    }
}

/// Retry budget for one unit tier (component or task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Fix attempts before a recurring issue triggers a consensus round.
    pub fix_budget: u32,
    /// Hard cap on fix attempts, reached only while the unit keeps making
    /// progress.
    pub max_total_attempts: u32,
}

impl EscalationPolicy {
    pub fn new(fix_budget: u32, max_total_attempts: u32) -> Self {
        Self {
            fix_budget,
            max_total_attempts: max_total_attempts.max(fix_budget),
        }
    }

    /// Decide what follows a failed round already recorded in `history`.
    pub fn next_step(&self, history: &AttemptHistory) -> NextStep {
        let fixes = history.fixes();
        if fixes < self.fix_budget {
            return NextStep::Fix;
        }
        let recurring = history.recurring(self.fix_budget as usize + 1);
        if !recurring.is_empty() {
            return NextStep::Vote { recurring };
        }
        if fixes >= self.max_total_attempts {
            return NextStep::Exhausted;
        }
        NextStep::Fix
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Run the fixer and revalidate.
    Fix,
    /// Stuck on `recurring`; convene the judges.
    Vote { recurring: BTreeSet<Fingerprint> },
    /// Over the hard cap without getting stuck on any single issue.
    Exhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critical(location: &str) -> Issue {
        Issue::new(Severity::Critical, location, "Null dereference")
    }

    #[test]
    fn test_recurring_requires_full_window() {
        let mut history = AttemptHistory::new();
        history.record_round(&[critical("a.rs")]);
        history.record_round(&[critical("a.rs")]);
        assert!(history.recurring(3).is_empty());
        assert_eq!(history.recurring(2).len(), 1);
    }

    #[test]
    fn test_recurring_intersects_rounds() {
        let mut history = AttemptHistory::new();
        history.record_round(&[critical("a.rs"), critical("b.rs")]);
        history.record_round(&[critical("a.rs")]);
        history.record_round(&[critical("a.rs"), critical("c.rs")]);
        let recurring = history.recurring(3);
        assert_eq!(recurring.len(), 1);
        assert!(recurring.contains(&critical("a.rs").fingerprint()));
    }

    #[test]
    fn test_minor_issues_do_not_count() {
        let mut history = AttemptHistory::new();
        let minor = Issue::new(Severity::Minor, "a.rs", "naming");
        let record = history.record_round(std::slice::from_ref(&minor));
        assert!(record.passed);
        assert!(record.fingerprints.is_empty());
    }

    #[test]
    fn test_policy_fixes_within_budget() {
        let policy = EscalationPolicy::new(2, 6);
        let mut history = AttemptHistory::new();
        history.record_round(&[critical("a.rs")]);
        assert_eq!(policy.next_step(&history), NextStep::Fix);
        history.record_fix();
        history.record_round(&[critical("a.rs")]);
        assert_eq!(policy.next_step(&history), NextStep::Fix);
    }

    #[test]
    fn test_policy_votes_when_same_issue_survives_two_fixes() {
        let policy = EscalationPolicy::new(2, 6);
        let mut history = AttemptHistory::new();
        for round in 0..3 {
            if round > 0 {
                history.record_fix();
            }
            history.record_round(&[critical("a.rs")]);
        }
        match policy.next_step(&history) {
            NextStep::Vote { recurring } => assert_eq!(recurring.len(), 1),
            other => panic!("expected vote, got {other:?}"),
        }
    }

    #[test]
    fn test_policy_keeps_fixing_while_making_progress_then_exhausts() {
        let policy = EscalationPolicy::new(2, 4);
        let mut history = AttemptHistory::new();
        let locations = ["a.rs", "b.rs", "c.rs", "d.rs", "e.rs"];
        let mut steps = Vec::new();
        for (i, location) in locations.iter().enumerate() {
            if i > 0 {
                history.record_fix();
            }
            history.record_round(&[critical(location)]);
            steps.push(policy.next_step(&history));
        }
        assert_eq!(
            steps,
            vec![
                NextStep::Fix,
                NextStep::Fix,
                NextStep::Fix,
                NextStep::Fix,
                NextStep::Exhausted
            ]
        );
    }

    #[test]
    fn test_task_tier_budget_of_three() {
        let policy = EscalationPolicy::new(3, 6);
        let mut history = AttemptHistory::new();
        for round in 0..3 {
            if round > 0 {
                history.record_fix();
            }
            history.record_round(&[critical("task")]);
        }
        assert_eq!(policy.next_step(&history), NextStep::Fix);
        history.record_fix();
        history.record_round(&[critical("task")]);
        assert!(matches!(policy.next_step(&history), NextStep::Vote { .. }));
    }

    #[test]
    fn test_max_total_never_below_budget() {
        let policy = EscalationPolicy::new(3, 1);
        assert_eq!(policy.max_total_attempts, 3);
    }
}
