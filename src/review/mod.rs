//! Validation Gate and the review types it aggregates.
//!
//! ## Components
//!
//! - [`findings`]: issues, severities, fingerprints and the merge/dedupe step
//! - [`risk`]: risk scoring that sizes the reviewer set (2/4/6 by tier)
//! - [`specialists`]: the reviewer roster and each reviewer's focus areas
//! - [`gate`]: the concurrent [`ValidationGate`] itself
//!
//! ## Example
//!
//! ```
//! use conductor::review::{RiskPolicy, RiskProfile, RiskTier};
//!
//! let policy = RiskPolicy::default();
//! let profile = RiskProfile {
//!     file_count: 2,
//!     ..Default::default()
//! };
//! let assessment = policy.assess(&profile);
//! assert_eq!(assessment.tier, RiskTier::Low);
//! assert_eq!(assessment.reviewers, 2);
//! ```

pub mod findings;
pub mod gate;
pub mod risk;
pub mod specialists;

pub use findings::{Fingerprint, Issue, ReviewerReport, Severity};
pub use gate::{GateConfig, GateReport, ValidationGate};
pub use risk::{DataMutation, RiskPolicy, RiskProfile, RiskTier};
pub use specialists::ReviewerKind;
