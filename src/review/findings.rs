//! Issue types produced by validation gate reviewers.
//!
//! ## Types
//!
//! - [`Severity`]: `CRITICAL`, `IMPORTANT`, `MINOR`, ordered most severe first
//! - [`Issue`]: one finding from one reviewer, with a location reference
//! - [`Fingerprint`]: stable identity of an issue across fix rounds
//! - [`ReviewerReport`]: everything one reviewer returned during a gate run
//!
//! ## Example
//!
//! ```
//! use conductor::review::findings::{Issue, Severity};
//!
//! let issue = Issue::new(Severity::Critical, "src/auth.rs:42", "Token is never verified")
//!     .with_reviewer("security-sentinel");
//!
//! assert!(issue.is_blocking());
//! assert_eq!(issue.fingerprint().as_str().len(), 16);
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Severity of an issue.
///
/// Ordered from most to least severe, so `Severity::Critical < Severity::Minor`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Correctness or security defect. Always fails the gate.
    Critical,
    /// Defect that must be fixed before the unit can advance.
    #[default]
    Important,
    /// Advisory only.
    Minor,
}

impl Severity {
    /// Blocking severities fail the validation gate.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::Important)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Critical => "🔴",
            Self::Important => "🟡",
            Self::Minor => "🔵",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::Important => "IMPORTANT",
            Self::Minor => "MINOR",
        };
        write!(f, "{}", s)
    }
}

/// Stable identity of an issue: a truncated SHA-256 over its normalized
/// location and description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    const LEN: usize = 16;

    pub fn of(location: &str, description: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_location(location).as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_text(description).as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single finding reported by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    severity: Severity,
    /// Where the issue lives: `path`, `path:line`, or a symbolic reference.
    #[serde(default)]
    location: String,
    description: String,
    /// Reviewer that first reported the issue. Filled in by the gate when a
    /// reviewer leaves it empty.
    #[serde(default)]
    reviewer: String,
    /// Other reviewers whose duplicate findings were merged into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    also_reported_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

impl Issue {
    pub fn new(
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            location: location.into(),
            description: description.into(),
            reviewer: String::new(),
            also_reported_by: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = reviewer.into();
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reviewer(&self) -> &str {
        &self.reviewer
    }

    pub fn also_reported_by(&self) -> &[String] {
        &self.also_reported_by
    }

    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.location, &self.description)
    }

    /// Every reviewer that reported this issue, first reporter included.
    pub fn reporters(&self) -> Vec<&str> {
        std::iter::once(self.reviewer.as_str())
            .chain(self.also_reported_by.iter().map(String::as_str))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Whether `other` describes the same defect at the same location.
    pub fn is_duplicate_of(&self, other: &Issue, threshold: f64) -> bool {
        normalize_location(&self.location) == normalize_location(&other.location)
            && similarity(&self.description, &other.description) >= threshold
    }

    /// Fold a duplicate into this issue, keeping the higher severity and
    /// recording the extra reporter.
    fn absorb(&mut self, other: Issue) {
        self.severity = self.severity.min(other.severity);
        for reporter in std::iter::once(other.reviewer).chain(other.also_reported_by) {
            if reporter.is_empty()
                || reporter == self.reviewer
                || self.also_reported_by.contains(&reporter)
            {
                continue;
            }
            self.also_reported_by.push(reporter);
        }
        if self.suggestion.is_none() {
            self.suggestion = other.suggestion;
        }
    }

    pub(crate) fn stamp_reviewer(&mut self, reviewer: &str) {
        if self.reviewer.is_empty() {
            self.reviewer = reviewer.to_string();
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.severity.emoji(),
            self.severity,
            self.location,
            self.description
        )?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " (suggestion: {})", suggestion)?;
        }
        Ok(())
    }
}

/// Output of one reviewer during one gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerReport {
    pub reviewer: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Set when the reviewer failed to return a verdict at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ReviewerReport {
    pub fn new(reviewer: impl Into<String>, issues: Vec<Issue>) -> Self {
        Self {
            reviewer: reviewer.into(),
            issues,
            error: None,
            duration_ms: None,
        }
    }

    /// A reviewer that errored. It contributes a synthesized critical issue so
    /// the gate cannot pass on the strength of the remaining reviewers alone.
    pub fn failed(reviewer: impl Into<String>, error: impl Into<String>) -> Self {
        let reviewer = reviewer.into();
        let error = error.into();
        let issue = Issue::new(
            Severity::Critical,
            format!("reviewer:{}", reviewer),
            format!("Reviewer returned no verdict: {}", error),
        )
        .with_reviewer(reviewer.clone());
        Self {
            reviewer,
            issues: vec![issue],
            error: Some(error),
            duration_ms: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity() == severity)
            .count()
    }
}

/// Merge the issues of several reports, collapsing duplicates.
///
/// Two issues are duplicates when their locations match after normalization
/// and their descriptions have a word-level Jaccard similarity of at least
/// `threshold`. The merged issue keeps the most severe rating. The result is
/// sorted by severity, location and description.
pub fn merge_issues(reports: &[ReviewerReport], threshold: f64) -> Vec<Issue> {
    let mut merged: Vec<Issue> = Vec::new();
    for report in reports {
        for issue in &report.issues {
            let mut issue = issue.clone();
            issue.stamp_reviewer(&report.reviewer);
            match merged
                .iter_mut()
                .find(|existing| existing.is_duplicate_of(&issue, threshold))
            {
                Some(existing) => existing.absorb(issue),
                None => merged.push(issue),
            }
        }
    }
    merged.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.location.cmp(&b.location))
            .then_with(|| a.description.cmp(&b.description))
    });
    merged
}

/// Fingerprints of the blocking issues in `issues`.
pub fn blocking_fingerprints(issues: &[Issue]) -> BTreeSet<Fingerprint> {
    issues
        .iter()
        .filter(|i| i.is_blocking())
        .map(Issue::fingerprint)
        .collect()
}

/// Lowercase, strip punctuation, collapse whitespace. Letters and digits of
/// every script are kept. Text made only of punctuation is kept verbatim
/// (lowercased) so it still has an identity.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, " ");
    let normalized = WHITESPACE.replace_all(stripped.trim(), " ").into_owned();
    if normalized.is_empty() {
        WHITESPACE.replace_all(lowered.trim(), " ").into_owned()
    } else {
        normalized
    }
}

fn normalize_location(location: &str) -> String {
    location.trim().trim_start_matches("./").replace('\\', "/")
}

/// Jaccard similarity of the word sets of two descriptions.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    let words_a: BTreeSet<&str> = a.split(' ').filter(|w| !w.is_empty()).collect();
    let words_b: BTreeSet<&str> = b.split(' ').filter(|w| !w.is_empty()).collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let shared = words_a.intersection(&words_b).count() as f64;
    let total = words_a.union(&words_b).count() as f64;
    shared / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical < Severity::Important);
        assert!(Severity::Important < Severity::Minor);
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::Important.is_blocking());
        assert!(!Severity::Minor.is_blocking());
    }

    #[test]
    fn test_severity_serializes_screaming_case() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let parsed: Severity = serde_json::from_str("\"MINOR\"").unwrap();
        assert_eq!(parsed, Severity::Minor);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  SQL   injection -- in `query()`! "),
            "sql injection in query"
        );
    }

    #[test]
    fn test_fingerprint_ignores_case_and_punctuation() {
        let a = Fingerprint::of("src/db.rs:10", "SQL injection in query!");
        let b = Fingerprint::of("./src/db.rs:10", "sql injection, in query");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_normalize_keeps_non_latin_text() {
        assert_eq!(normalize_text("空指针解引用！"), "空指针解引用");
        assert_eq!(normalize_text("Ошибка: Гонка данных"), "ошибка гонка данных");
        assert_eq!(normalize_text(" -> "), "->");
    }

    #[test]
    fn test_non_latin_issues_stay_distinct() {
        let a = Issue::new(Severity::Critical, "src/a.rs:3", "空指针解引用");
        let b = Issue::new(Severity::Critical, "src/a.rs:3", "竞态条件导致数据丢失");
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(similarity("空指针解引用", "竞态条件导致数据丢失"), 0.0);

        let reports = vec![
            ReviewerReport::new("correctness", vec![a]),
            ReviewerReport::new("security", vec![b]),
        ];
        assert_eq!(merge_issues(&reports, 0.8).len(), 2);
        assert_eq!(
            blocking_fingerprints(&merge_issues(&reports, 0.8)).len(),
            2
        );
    }

    #[test]
    fn test_fingerprint_depends_on_location() {
        let a = Fingerprint::of("src/db.rs:10", "SQL injection");
        let b = Fingerprint::of("src/db.rs:11", "SQL injection");
        assert_ne!(a, b);
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("missing null check", "Missing null check."), 1.0);
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
        let s = similarity("missing null check here", "missing null check");
        assert!((s - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_collapses_duplicates_and_keeps_highest_severity() {
        let reports = vec![
            ReviewerReport::new(
                "correctness",
                vec![Issue::new(Severity::Important, "src/a.rs:3", "Missing null check")],
            ),
            ReviewerReport::new(
                "security",
                vec![Issue::new(Severity::Critical, "src/a.rs:3", "missing null check!")],
            ),
        ];
        let merged = merge_issues(&reports, 0.8);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].severity(), Severity::Critical);
        assert_eq!(merged[0].reviewer(), "correctness");
        assert_eq!(merged[0].also_reported_by(), &["security".to_string()]);
        assert_eq!(merged[0].reporters(), vec!["correctness", "security"]);
    }

    #[test]
    fn test_merge_keeps_distinct_locations_apart() {
        let reports = vec![ReviewerReport::new(
            "correctness",
            vec![
                Issue::new(Severity::Minor, "src/b.rs", "Unused import"),
                Issue::new(Severity::Critical, "src/a.rs", "Unused import"),
            ],
        )];
        let merged = merge_issues(&reports, 0.8);
        assert_eq!(merged.len(), 2);
        // Sorted most severe first.
        assert_eq!(merged[0].location(), "src/a.rs");
        assert_eq!(merged[1].location(), "src/b.rs");
    }

    #[test]
    fn test_failed_reviewer_synthesizes_critical_issue() {
        let report = ReviewerReport::failed("security", "timed out");
        assert_eq!(report.error.as_deref(), Some("timed out"));
        assert_eq!(report.count_by_severity(Severity::Critical), 1);
        assert_eq!(report.issues[0].location(), "reviewer:security");
    }

    #[test]
    fn test_blocking_fingerprints_skip_minor() {
        let issues = vec![
            Issue::new(Severity::Minor, "a", "style"),
            Issue::new(Severity::Important, "b", "bug"),
        ];
        let prints = blocking_fingerprints(&issues);
        assert_eq!(prints.len(), 1);
        assert!(prints.contains(&Fingerprint::of("b", "bug")));
    }

    #[test]
    fn test_issue_deserializes_without_reviewer() {
        let json = r#"{"severity":"CRITICAL","location":"src/x.rs","description":"panic"}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.reviewer(), "");
        assert!(issue.is_blocking());
    }

    #[test]
    fn test_issue_display() {
        let issue = Issue::new(Severity::Important, "src/x.rs:4", "Leaks handle")
            .with_suggestion("Use a guard");
        let text = issue.to_string();
        assert!(text.contains("[IMPORTANT] src/x.rs:4: Leaks handle"));
        assert!(text.contains("suggestion: Use a guard"));
    }
}
