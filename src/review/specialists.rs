//! Reviewer roster for the validation gate.
//!
//! Each [`ReviewerKind`] is a domain of expertise with default focus areas.
//! The gate takes the first `n` entries of the configured roster, where `n`
//! is the reviewer count for the unit's risk tier, so the roster order is
//! the order in which reviewers are added as risk grows.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Type of reviewer.
///
/// Parsed from short (`"security"`), hyphenated (`"security-sentinel"`) or
/// snake_case (`"security_sentinel"`) names. Anything unrecognized becomes
/// [`ReviewerKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReviewerKind {
    Correctness,
    Security,
    Architecture,
    Performance,
    Compatibility,
    Simplicity,
    Custom(String),
}

impl ReviewerKind {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Correctness => "Correctness Auditor",
            Self::Security => "Security Sentinel",
            Self::Architecture => "Architecture Strategist",
            Self::Performance => "Performance Oracle",
            Self::Compatibility => "Compatibility Guard",
            Self::Simplicity => "Simplicity Reviewer",
            Self::Custom(name) => name,
        }
    }

    /// Lowercase, hyphenated identifier. Used as the reviewer identity on
    /// issues and in worker requests.
    pub fn agent_name(&self) -> String {
        match self {
            Self::Correctness => "correctness-auditor".to_string(),
            Self::Security => "security-sentinel".to_string(),
            Self::Architecture => "architecture-strategist".to_string(),
            Self::Performance => "performance-oracle".to_string(),
            Self::Compatibility => "compatibility-guard".to_string(),
            Self::Simplicity => "simplicity-reviewer".to_string(),
            Self::Custom(name) => name.to_lowercase().replace(' ', "-"),
        }
    }

    pub fn focus_areas(&self) -> Vec<&'static str> {
        match self {
            Self::Correctness => vec![
                "Logic errors and off-by-one mistakes",
                "Unhandled error paths",
                "Requirements not met by the implementation",
                "Missing or incorrect tests",
            ],
            Self::Security => vec![
                "Injection vectors",
                "Authentication and authorization gaps",
                "Secrets exposure in code or logs",
                "Input validation gaps",
                "Path traversal",
            ],
            Self::Architecture => vec![
                "Excessive coupling between modules",
                "Layering violations",
                "Circular dependencies",
                "Inconsistent abstraction levels",
            ],
            Self::Performance => vec![
                "Algorithmic complexity issues",
                "Unbounded memory growth",
                "Blocking operations in async code",
                "Unnecessary allocations",
            ],
            Self::Compatibility => vec![
                "Breaking changes to public interfaces",
                "Data format or schema migrations",
                "Removed configuration options",
            ],
            Self::Simplicity => vec![
                "Premature abstraction",
                "Dead code or unused features",
                "Excessive indirection",
            ],
            Self::Custom(_) => vec![],
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    /// Built-in roster in escalation order: the first two review low-risk
    /// units, all six review high-risk units.
    pub fn default_roster() -> Vec<Self> {
        vec![
            Self::Correctness,
            Self::Security,
            Self::Architecture,
            Self::Performance,
            Self::Compatibility,
            Self::Simplicity,
        ]
    }
}

impl fmt::Display for ReviewerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for ReviewerKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "correctness" | "correctness-auditor" | "correctness_auditor" => Self::Correctness,
            "security" | "security-sentinel" | "security_sentinel" => Self::Security,
            "architecture" | "arch" | "architecture-strategist" | "architecture_strategist" => {
                Self::Architecture
            }
            "performance" | "perf" | "performance-oracle" | "performance_oracle" => {
                Self::Performance
            }
            "compatibility" | "compat" | "compatibility-guard" | "compatibility_guard" => {
                Self::Compatibility
            }
            "simplicity" | "simple" | "simplicity-reviewer" | "simplicity_reviewer" => {
                Self::Simplicity
            }
            _ => Self::Custom(s.trim().to_string()),
        })
    }
}

impl Serialize for ReviewerKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.agent_name())
    }
}

impl<'de> Deserialize<'de> for ReviewerKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ReviewerKind::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
