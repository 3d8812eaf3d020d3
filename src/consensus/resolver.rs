//! Voting Consensus Resolver.
//!
//! Convenes an odd number of independent judges on a [`Ballot`] and tallies
//! their votes. Judges run concurrently and never see each other's votes.

use crate::consensus::vote::{Abstention, Ballot, ConsensusDecision, VotingRecord};
use crate::errors::EngineError;
use crate::worker::Judge;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct ConsensusResolver {
    judges: Vec<Arc<dyn Judge>>,
}

impl ConsensusResolver {
    /// Requires an odd, non-zero number of judges so a strict majority can
    /// always be reached.
    pub fn new(judges: Vec<Arc<dyn Judge>>) -> Result<Self, EngineError> {
        if judges.is_empty() || judges.len() % 2 == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "consensus needs an odd number of judges, got {}",
                judges.len()
            )));
        }
        Ok(Self { judges })
    }

    pub fn judge_count(&self) -> usize {
        self.judges.len()
    }

    /// Run one consensus round. A judge that errors abstains, which counts
    /// against every strategy.
    pub async fn resolve(&self, ballot: &Ballot) -> (ConsensusDecision, VotingRecord) {
        let start = Instant::now();
        let futures: Vec<_> = self.judges.iter().map(|judge| judge.vote(ballot)).collect();
        let results = join_all(futures).await;

        let mut votes = Vec::new();
        let mut abstentions = Vec::new();
        for (judge, result) in self.judges.iter().zip(results) {
            let name = judge.name();
            match result {
                Ok(mut vote) => {
                    vote.judge = name;
                    votes.push(vote);
                }
                Err(e) => {
                    warn!(unit = %ballot.unit, judge = %name, error = %e, "Judge abstained");
                    abstentions.push(Abstention {
                        judge: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let record = VotingRecord::new(&ballot.unit, self.judges.len(), votes, abstentions)
            .with_fingerprints(ballot.fingerprints());
        let decision = ConsensusDecision::from_record(&record);
        info!(
            task = %ballot.task_id,
            unit = %ballot.unit,
            tally = %record.tally_summary(),
            decision = ?record.decision,
            duration_ms = start.elapsed().as_millis() as u64,
            "Consensus round finished"
        );
        (decision, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::vote::{Strategy, Vote};
    use crate::review::findings::{Issue, Severity};
    use anyhow::{Result, bail};
    use async_trait::async_trait;

    struct FixedJudge {
        name: String,
        strategy: Option<Strategy>,
    }

    #[async_trait]
    impl Judge for FixedJudge {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn vote(&self, _ballot: &Ballot) -> Result<Vote> {
            match self.strategy {
                Some(strategy) => Ok(Vote::new("ignored", strategy, format!("{} says so", self.name))),
                None => bail!("judge unavailable"),
            }
        }
    }

    fn judges(strategies: &[Option<Strategy>]) -> Vec<Arc<dyn Judge>> {
        strategies
            .iter()
            .enumerate()
            .map(|(i, strategy)| {
                Arc::new(FixedJudge {
                    name: format!("judge-{}", i + 1),
                    strategy: *strategy,
                }) as Arc<dyn Judge>
            })
            .collect()
    }

    fn ballot() -> Ballot {
        Ballot {
            task_id: "t1".into(),
            unit: "auth".into(),
            requirements: "Login".into(),
            approach: "JWT".into(),
            recurring: vec![Issue::new(Severity::Critical, "src/auth.rs", "Token never expires")],
            attempts: vec![],
        }
    }

    #[test]
    fn test_even_judge_count_is_rejected() {
        let err = ConsensusResolver::new(judges(&[
            Some(Strategy::Escalate),
            Some(Strategy::Escalate),
        ]))
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(ConsensusResolver::new(vec![]).is_err());
    }

    #[tokio::test]
    async fn test_majority_fix_in_place_carries_guidance() {
        let resolver = ConsensusResolver::new(judges(&[
            Some(Strategy::FixInPlace),
            Some(Strategy::Escalate),
            Some(Strategy::FixInPlace),
        ]))
        .unwrap();
        let (decision, record) = resolver.resolve(&ballot()).await;
        assert_eq!(
            decision,
            ConsensusDecision::FixInPlace {
                guidance: "[judge-1] judge-1 says so\n[judge-3] judge-3 says so".into()
            }
        );
        assert_eq!(record.votes[0].judge, "judge-1");
        assert_eq!(record.fingerprints, ballot().fingerprints());
    }

    #[tokio::test]
    async fn test_split_vote_has_no_majority() {
        let resolver = ConsensusResolver::new(judges(&[
            Some(Strategy::FixInPlace),
            Some(Strategy::Refactor),
            Some(Strategy::Escalate),
        ]))
        .unwrap();
        let (decision, record) = resolver.resolve(&ballot()).await;
        assert_eq!(decision, ConsensusDecision::NoMajority);
        assert_eq!(record.decision, None);
    }

    #[tokio::test]
    async fn test_failed_judge_abstains() {
        let resolver = ConsensusResolver::new(judges(&[
            Some(Strategy::Refactor),
            None,
            Some(Strategy::Escalate),
        ]))
        .unwrap();
        let (decision, record) = resolver.resolve(&ballot()).await;
        assert_eq!(decision, ConsensusDecision::NoMajority);
        assert_eq!(record.abstentions.len(), 1);
        assert_eq!(record.abstentions[0].judge, "judge-2");
        assert!(record.tally_summary().ends_with("(abstained=1 of 3)"));
    }
}
