//! Voting Consensus Resolver and the stuck detection that triggers it.
//!
//! - [`progress`]: per-unit attempt history and the [`EscalationPolicy`] that
//!   decides between another fix, a consensus round, or giving up.
//! - [`vote`]: votes, ballots, the strict-majority [`tally`] and the
//!   persisted [`VotingRecord`].
//! - [`resolver`]: runs the judges concurrently and turns the tally into a
//!   [`ConsensusDecision`].

pub mod progress;
pub mod resolver;
pub mod vote;

pub use progress::{AttemptHistory, AttemptRecord, EscalationPolicy, NextStep};
pub use resolver::ConsensusResolver;
pub use vote::{Abstention, Ballot, ConsensusDecision, Strategy, Vote, VotingRecord, tally};
