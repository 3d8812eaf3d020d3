//! Risk scoring for sizing the reviewer set.
//!
//! A unit's risk score is a weighted sum of five factors. The score maps to
//! a [`RiskTier`], and each tier maps to a reviewer count (2/4/6 by default).

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much persistent state a unit mutates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMutation {
    #[default]
    None,
    /// Mutates process-local or temporary state.
    Local,
    /// Mutates durable state (databases, files users rely on, migrations).
    Persistent,
}

/// Risk factors declared for a component in the task specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    #[serde(default)]
    pub file_count: u32,
    #[serde(default)]
    pub external_exposure: bool,
    #[serde(default)]
    pub data_mutation: DataMutation,
    #[serde(default)]
    pub security_sensitive: bool,
    #[serde(default)]
    pub breaks_compatibility: bool,
}

impl RiskProfile {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Weight of each risk factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    /// Points per touched file.
    #[serde(default = "default_per_file")]
    pub per_file: f64,
    /// Cap on the points contributed by file count.
    #[serde(default = "default_max_file_points")]
    pub max_file_points: f64,
    #[serde(default = "default_external_exposure")]
    pub external_exposure: f64,
    #[serde(default = "default_local_mutation")]
    pub local_mutation: f64,
    #[serde(default = "default_persistent_mutation")]
    pub persistent_mutation: f64,
    #[serde(default = "default_security_sensitive")]
    pub security_sensitive: f64,
    #[serde(default = "default_breaks_compatibility")]
    pub breaks_compatibility: f64,
}

fn default_per_file() -> f64 {
    0.25
}
fn default_max_file_points() -> f64 {
    2.0
}
fn default_external_exposure() -> f64 {
    2.0
}
fn default_local_mutation() -> f64 {
    1.0
}
fn default_persistent_mutation() -> f64 {
    2.0
}
fn default_security_sensitive() -> f64 {
    3.0
}
fn default_breaks_compatibility() -> f64 {
    2.0
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            per_file: default_per_file(),
            max_file_points: default_max_file_points(),
            external_exposure: default_external_exposure(),
            local_mutation: default_local_mutation(),
            persistent_mutation: default_persistent_mutation(),
            security_sensitive: default_security_sensitive(),
            breaks_compatibility: default_breaks_compatibility(),
        }
    }
}

impl RiskWeights {
    pub fn score(&self, profile: &RiskProfile) -> f64 {
        let files = (f64::from(profile.file_count) * self.per_file).min(self.max_file_points);
        let mutation = match profile.data_mutation {
            DataMutation::None => 0.0,
            DataMutation::Local => self.local_mutation,
            DataMutation::Persistent => self.persistent_mutation,
        };
        let flag = |set: bool, weight: f64| if set { weight } else { 0.0 };

        files
            + mutation
            + flag(profile.external_exposure, self.external_exposure)
            + flag(profile.security_sensitive, self.security_sensitive)
            + flag(profile.breaks_compatibility, self.breaks_compatibility)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Score cut-offs: scores below `medium_at` are low risk, scores at or above
/// `high_at` are high risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTiers {
    #[serde(default = "default_medium_at")]
    pub medium_at: f64,
    #[serde(default = "default_high_at")]
    pub high_at: f64,
}

fn default_medium_at() -> f64 {
    3.0
}
fn default_high_at() -> f64 {
    6.0
}

impl Default for RiskTiers {
    fn default() -> Self {
        Self {
            medium_at: default_medium_at(),
            high_at: default_high_at(),
        }
    }
}

impl RiskTiers {
    pub fn tier(&self, score: f64) -> RiskTier {
        if score >= self.high_at {
            RiskTier::High
        } else if score >= self.medium_at {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

/// Reviewer count per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl Default for ReviewerCounts {
    fn default() -> Self {
        Self {
            low: 2,
            medium: 4,
            high: 6,
        }
    }
}

impl ReviewerCounts {
    pub fn for_tier(&self, tier: RiskTier) -> usize {
        match tier {
            RiskTier::Low => self.low,
            RiskTier::Medium => self.medium,
            RiskTier::High => self.high,
        }
    }
}

/// Everything needed to turn a [`RiskProfile`] into a reviewer count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskPolicy {
    pub weights: RiskWeights,
    pub tiers: RiskTiers,
    pub counts: ReviewerCounts,
}

/// Result of scoring a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub tier: RiskTier,
    pub reviewers: usize,
}

impl RiskPolicy {
    pub fn assess(&self, profile: &RiskProfile) -> RiskAssessment {
        let score = self.weights.score(profile);
        let tier = self.tiers.tier(score);
        RiskAssessment {
            score,
            tier,
            reviewers: self.counts.for_tier(tier),
        }
    }

    /// Highest tier among `profiles`; `Low` when empty.
    pub fn max_tier<'a>(&self, profiles: impl IntoIterator<Item = &'a RiskProfile>) -> RiskTier {
        profiles
            .into_iter()
            .map(|p| self.assess(p).tier)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_low_risk_with_two_reviewers() {
        let policy = RiskPolicy::default();
        let assessment = policy.assess(&RiskProfile::default());
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.tier, RiskTier::Low);
        assert_eq!(assessment.reviewers, 2);
    }

    #[test]
    fn test_security_sensitive_external_api_is_medium() {
        let policy = RiskPolicy::default();
        let profile = RiskProfile {
            file_count: 4,
            security_sensitive: true,
            ..Default::default()
        };
        let assessment = policy.assess(&profile);
        assert_eq!(assessment.score, 4.0);
        assert_eq!(assessment.tier, RiskTier::Medium);
        assert_eq!(assessment.reviewers, 4);
    }

    #[test]
    fn test_everything_set_is_high() {
        let policy = RiskPolicy::default();
        let profile = RiskProfile {
            file_count: 40,
            external_exposure: true,
            data_mutation: DataMutation::Persistent,
            security_sensitive: true,
            breaks_compatibility: true,
        };
        let assessment = policy.assess(&profile);
        // File points are capped at 2.0.
        assert_eq!(assessment.score, 11.0);
        assert_eq!(assessment.tier, RiskTier::High);
        assert_eq!(assessment.reviewers, 6);
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        let tiers = RiskTiers::default();
        assert_eq!(tiers.tier(2.99), RiskTier::Low);
        assert_eq!(tiers.tier(3.0), RiskTier::Medium);
        assert_eq!(tiers.tier(6.0), RiskTier::High);
    }

    #[test]
    fn test_max_tier() {
        let policy = RiskPolicy::default();
        let low = RiskProfile::default();
        let high = RiskProfile {
            security_sensitive: true,
            external_exposure: true,
            data_mutation: DataMutation::Local,
            ..Default::default()
        };
        assert_eq!(policy.max_tier([&low, &high]), RiskTier::High);
        assert_eq!(policy.max_tier(std::iter::empty()), RiskTier::Low);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: RiskProfile =
            serde_json::from_str(r#"{"data_mutation":"persistent"}"#).unwrap();
        assert_eq!(profile.data_mutation, DataMutation::Persistent);
        assert_eq!(profile.file_count, 0);
        assert!(!profile.is_default());
    }
}
