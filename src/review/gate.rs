//! Validation Gate.
//!
//! Runs a risk-sized prefix of the reviewer roster against a work unit,
//! concurrently, and merges the findings once every reviewer has returned.
//! The gate passes only with zero critical and zero important issues; one
//! reviewer flagging a critical issue fails the gate no matter how many
//! others report clean.

use crate::errors::EngineError;
use crate::review::findings::{Issue, ReviewerReport, Severity, merge_issues};
use crate::review::risk::{RiskPolicy, RiskTier};
use crate::worker::{Reviewer, WorkUnit};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default Jaccard threshold above which two descriptions at the same
/// location are one issue.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub policy: RiskPolicy,
    pub similarity_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            policy: RiskPolicy::default(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Aggregated result of one gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub unit: String,
    pub passed: bool,
    /// Merged, deduplicated issues, most severe first.
    pub issues: Vec<Issue>,
    pub reports: Vec<ReviewerReport>,
    pub tier: RiskTier,
    pub reviewer_count: usize,
    pub duration_ms: u64,
}

impl GateReport {
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity() == severity)
            .count()
    }

    /// `ValidationFailed` for a failed gate.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.passed {
            return Ok(());
        }
        Err(EngineError::ValidationFailed {
            unit: self.unit.clone(),
            critical: self.count_by_severity(Severity::Critical),
            important: self.count_by_severity(Severity::Important),
        })
    }

    pub fn blocking_issues(&self) -> Vec<Issue> {
        self.issues.iter().filter(|i| i.is_blocking()).cloned().collect()
    }

    /// `passed (0 critical, 0 important, 2 minor)`
    pub fn summary(&self) -> String {
        format!(
            "{} ({} critical, {} important, {} minor)",
            if self.passed { "passed" } else { "failed" },
            self.count_by_severity(Severity::Critical),
            self.count_by_severity(Severity::Important),
            self.count_by_severity(Severity::Minor)
        )
    }
}

pub struct ValidationGate {
    reviewers: Vec<Arc<dyn Reviewer>>,
    config: GateConfig,
}

impl ValidationGate {
    pub fn new(reviewers: Vec<Arc<dyn Reviewer>>, config: GateConfig) -> Self {
        Self { reviewers, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The first `count` reviewers of the roster.
    fn select(&self, count: usize) -> &[Arc<dyn Reviewer>] {
        if count > self.reviewers.len() {
            warn!(
                wanted = count,
                available = self.reviewers.len(),
                "Reviewer roster smaller than the risk tier asks for"
            );
        }
        &self.reviewers[..count.min(self.reviewers.len())]
    }

    /// Review `unit` with the reviewer count of `tier`.
    pub async fn run(&self, unit: &WorkUnit, tier: RiskTier) -> GateReport {
        let start = Instant::now();
        let selected = self.select(self.config.policy.counts.for_tier(tier));

        if selected.is_empty() {
            warn!(unit = unit.name(), "No reviewers configured, gate passes unreviewed");
            return GateReport {
                unit: unit.name().to_string(),
                passed: true,
                issues: Vec::new(),
                reports: Vec::new(),
                tier,
                reviewer_count: 0,
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }

        debug!(unit = unit.name(), %tier, reviewers = selected.len(), "Dispatching reviewers");

        let futures: Vec<_> = selected
            .iter()
            .map(|reviewer| async move {
                let started = Instant::now();
                let name = reviewer.name();
                let report = match reviewer.review(unit).await {
                    Ok(issues) => ReviewerReport::new(name, issues),
                    Err(e) => {
                        warn!(unit = unit.name(), reviewer = %name, error = %e, "Reviewer failed");
                        ReviewerReport::failed(name, e.to_string())
                    }
                };
                report.with_duration_ms(started.elapsed().as_millis() as u64)
            })
            .collect();
        let reports = join_all(futures).await;

        let issues = merge_issues(&reports, self.config.similarity_threshold);
        let passed = !issues.iter().any(Issue::is_blocking);
        let report = GateReport {
            unit: unit.name().to_string(),
            passed,
            issues,
            reviewer_count: reports.len(),
            reports,
            tier,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            task = %unit.task_id,
            unit = unit.name(),
            %tier,
            reviewers = report.reviewer_count,
            result = %report.summary(),
            "Validation gate finished"
        );
        report
    }
}
