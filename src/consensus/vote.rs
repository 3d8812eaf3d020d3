//! Votes, ballots and the strict-majority tally.

use crate::consensus::progress::AttemptRecord;
use crate::review::findings::{Fingerprint, Issue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resolution strategy a judge can vote for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// One more bounded fix attempt, guided by the judges' rationale.
    FixInPlace,
    /// The approach needs an architectural change; a human decides.
    Refactor,
    /// Stop and hand the problem to a human.
    Escalate,
}

impl Strategy {
    pub fn all() -> [Strategy; 3] {
        [Strategy::FixInPlace, Strategy::Refactor, Strategy::Escalate]
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FixInPlace => "FIX_IN_PLACE",
            Self::Refactor => "REFACTOR",
            Self::Escalate => "ESCALATE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(default)]
    pub judge: String,
    pub strategy: Strategy,
    #[serde(default)]
    pub rationale: String,
}

impl Vote {
    pub fn new(judge: impl Into<String>, strategy: Strategy, rationale: impl Into<String>) -> Self {
        Self {
            judge: judge.into(),
            strategy,
            rationale: rationale.into(),
        }
    }
}

/// What every judge sees in a consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub task_id: String,
    pub unit: String,
    pub requirements: String,
    pub approach: String,
    /// Issues that survived every fix attempt in the window.
    pub recurring: Vec<Issue>,
    pub attempts: Vec<AttemptRecord>,
}

impl Ballot {
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        let mut prints: Vec<Fingerprint> = self.recurring.iter().map(Issue::fingerprint).collect();
        prints.sort();
        prints.dedup();
        prints
    }
}

/// A judge that produced no vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstention {
    pub judge: String,
    pub reason: String,
}

/// Full record of one consensus round. Persisted as part of the escalation
/// record; never outside of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingRecord {
    pub unit: String,
    pub judges: usize,
    pub votes: Vec<Vote>,
    #[serde(default)]
    pub abstentions: Vec<Abstention>,
    pub fingerprints: Vec<Fingerprint>,
    /// Binding decision, `None` without a strict majority.
    pub decision: Option<Strategy>,
    pub decided_at: DateTime<Utc>,
}

impl VotingRecord {
    pub fn new(unit: &str, judges: usize, votes: Vec<Vote>, abstentions: Vec<Abstention>) -> Self {
        let decision = tally(&votes, judges);
        Self {
            unit: unit.to_string(),
            judges,
            votes,
            abstentions,
            fingerprints: Vec::new(),
            decision,
            decided_at: Utc::now(),
        }
    }

    pub fn with_fingerprints(mut self, fingerprints: Vec<Fingerprint>) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    /// Vote count per strategy, every strategy present.
    pub fn counts(&self) -> BTreeMap<Strategy, usize> {
        let mut counts: BTreeMap<Strategy, usize> =
            Strategy::all().into_iter().map(|s| (s, 0)).collect();
        for vote in &self.votes {
            *counts.entry(vote.strategy).or_default() += 1;
        }
        counts
    }

    /// `FIX_IN_PLACE=2 REFACTOR=1 ESCALATE=0 (abstained=0 of 3)`
    pub fn tally_summary(&self) -> String {
        let parts: Vec<String> = self
            .counts()
            .iter()
            .map(|(strategy, count)| format!("{}={}", strategy, count))
            .collect();
        format!(
            "{} (abstained={} of {})",
            parts.join(" "),
            self.abstentions.len(),
            self.judges
        )
    }

    /// Rationales of the votes for `strategy`, one per line, prefixed with
    /// the judge.
    pub fn merged_rationale(&self, strategy: Strategy) -> String {
        self.votes
            .iter()
            .filter(|v| v.strategy == strategy && !v.rationale.trim().is_empty())
            .map(|v| format!("[{}] {}", v.judge, v.rationale.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Strict majority of `judges` seats: more than half of all seats, so
/// abstentions count against every strategy.
pub fn tally(votes: &[Vote], judges: usize) -> Option<Strategy> {
    let mut counts: BTreeMap<Strategy, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote.strategy).or_default() += 1;
    }
    counts
        .into_iter()
        .find(|(_, count)| count * 2 > judges)
        .map(|(strategy, _)| strategy)
}

/// What the engine does after a consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ConsensusDecision {
    /// One final bounded fix with the merged rationale as guidance.
    FixInPlace { guidance: String },
    /// Hand the merged refactor proposal to a human; never auto-applied.
    Refactor { proposal: String },
    Escalate,
    NoMajority,
}

impl ConsensusDecision {
    pub fn from_record(record: &VotingRecord) -> Self {
        match record.decision {
            Some(Strategy::FixInPlace) => Self::FixInPlace {
                guidance: record.merged_rationale(Strategy::FixInPlace),
            },
            Some(Strategy::Refactor) => Self::Refactor {
                proposal: record.merged_rationale(Strategy::Refactor),
            },
            Some(Strategy::Escalate) => Self::Escalate,
            None => Self::NoMajority,
        }
    }
}
