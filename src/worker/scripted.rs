//! Worker that answers from a script.
//!
//! Backs `--simulate` runs and the engine tests. Unless told otherwise every
//! stage succeeds, every reviewer reports clean and every judge votes
//! `ESCALATE`. Every call is appended to a log so tests can assert on what
//! ran and in which order.

use crate::checkpoint::MemoryBackend;
use crate::consensus::{Ballot, Strategy, Vote};
use crate::lifecycle::Stage;
use crate::review::findings::Issue;
use crate::review::specialists::ReviewerKind;
use crate::worker::{Fixer, Judge, Reviewer, StageOutput, StageWorker, WorkUnit, WorkerRole, Workers};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Script {
    /// Issues per (unit, reviewer), one entry per gate round.
    review_rounds: HashMap<(String, String), VecDeque<Vec<Issue>>>,
    /// Issues a stage worker reports in its own output, one entry per run.
    stage_issues: HashMap<(String, Stage), VecDeque<Vec<Issue>>>,
    stage_errors: HashMap<(String, Stage), String>,
    /// Strategy per judge seat, in seat order.
    votes: Vec<Strategy>,
    calls: Vec<String>,
}

#[derive(Default, Clone)]
pub struct ScriptedWorker {
    script: Arc<Mutex<Script>>,
    tree: Option<Arc<MemoryBackend>>,
}

impl ScriptedWorker {
    /// Everything passes.
    pub fn passing() -> Self {
        Self::default()
    }

    /// Write one file per stage run into `tree`, so snapshots see changes.
    pub fn with_tree(mut self, tree: Arc<MemoryBackend>) -> Self {
        self.tree = Some(tree);
        self
    }

    /// `reviewer` reports `rounds[n]` on its n-th review of `unit`, then
    /// nothing.
    pub fn with_review_rounds(self, unit: &str, reviewer: &str, rounds: Vec<Vec<Issue>>) -> Self {
        self.state()
            .review_rounds
            .insert((unit.to_string(), reviewer.to_string()), rounds.into());
        self
    }

    /// The stage worker for `stage` of `unit` reports `rounds[n]` on its n-th
    /// run, then nothing.
    pub fn with_stage_issues(self, unit: &str, stage: Stage, rounds: Vec<Vec<Issue>>) -> Self {
        self.state()
            .stage_issues
            .insert((unit.to_string(), stage), rounds.into());
        self
    }

    /// The stage worker for `stage` of `unit` always errors.
    pub fn with_stage_error(self, unit: &str, stage: Stage, message: &str) -> Self {
        self.state()
            .stage_errors
            .insert((unit.to_string(), stage), message.to_string());
        self
    }

    /// Seat `i` votes `strategies[i]` in every round; missing seats vote
    /// `ESCALATE`.
    pub fn with_votes(self, strategies: Vec<Strategy>) -> Self {
        self.state().votes = strategies;
        self
    }

    /// Calls made so far: `implementer:A`, `review:A:correctness-auditor`,
    /// `fix:A`, `fix:A:guided`, `vote:judge-1`.
    pub fn call_log(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Worker set with the first `reviewers` entries of the default roster and
    /// `judges` judge seats.
    pub fn into_workers(self, reviewers: usize, judges: usize) -> Workers {
        let worker = Arc::new(self);
        Workers {
            stage: worker.clone(),
            reviewers: ReviewerKind::default_roster()
                .into_iter()
                .take(reviewers)
                .map(|kind| {
                    Arc::new(ScriptedReviewer {
                        worker: worker.clone(),
                        name: kind.agent_name(),
                    }) as Arc<dyn Reviewer>
                })
                .collect(),
            fixer: worker.clone(),
            judges: (0..judges)
                .map(|seat| {
                    Arc::new(ScriptedJudge {
                        worker: worker.clone(),
                        seat,
                    }) as Arc<dyn Judge>
                })
                .collect(),
        }
    }

    fn state(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    fn touch_tree(&self, unit: &WorkUnit, what: &str) -> Vec<String> {
        let path = format!("{}/{}.out", unit.name(), what);
        if let Some(ref tree) = self.tree {
            tree.write_file(&path, format!("{} {}", unit.task_id, unit.stage).as_bytes());
        }
        vec![path]
    }
}

#[async_trait]
impl StageWorker for ScriptedWorker {
    async fn run_stage(&self, role: WorkerRole, unit: &WorkUnit) -> Result<StageOutput> {
        self.record(format!("{}:{}", role, unit.name()));
        let key = (unit.name().to_string(), unit.stage);
        let (error, issues) = {
            let mut state = self.state();
            let error = state.stage_errors.get(&key).cloned();
            let issues = state
                .stage_issues
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or_default();
            (error, issues)
        };
        if let Some(message) = error {
            bail!("{}", message);
        }
        let artifacts = self.touch_tree(unit, &role.to_string());
        Ok(StageOutput::new(format!("{} finished {}", role, unit.name()))
            .with_artifacts(artifacts)
            .with_issues(issues))
    }
}

#[async_trait]
impl Fixer for ScriptedWorker {
    async fn fix(&self, unit: &WorkUnit, issues: &[Issue]) -> Result<StageOutput> {
        match unit.guidance {
            Some(_) => self.record(format!("fix:{}:guided", unit.name())),
            None => self.record(format!("fix:{}", unit.name())),
        }
        let artifacts = self.touch_tree(unit, "fix");
        Ok(StageOutput::new(format!("addressed {} issue(s)", issues.len())).with_artifacts(artifacts))
    }
}

struct ScriptedReviewer {
    worker: Arc<ScriptedWorker>,
    name: String,
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn review(&self, unit: &WorkUnit) -> Result<Vec<Issue>> {
        self.worker
            .record(format!("review:{}:{}", unit.name(), self.name));
        let key = (unit.name().to_string(), self.name.clone());
        Ok(self
            .worker
            .state()
            .review_rounds
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }
}

struct ScriptedJudge {
    worker: Arc<ScriptedWorker>,
    seat: usize,
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn name(&self) -> String {
        format!("judge-{}", self.seat + 1)
    }

    async fn vote(&self, ballot: &Ballot) -> Result<Vote> {
        self.worker.record(format!("vote:{}", self.name()));
        let strategy = self
            .worker
            .state()
            .votes
            .get(self.seat)
            .copied()
            .unwrap_or(Strategy::Escalate);
        Ok(Vote::new(
            self.name(),
            strategy,
            format!("{} on {} recurring issue(s)", strategy, ballot.recurring.len()),
        ))
    }
}
