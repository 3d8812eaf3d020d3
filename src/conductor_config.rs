//! `conductor.toml`: the project configuration file.
//!
//! Read from `.conductor/conductor.toml`. Every field has a default, so an
//! empty or missing file is a valid configuration.
//!
//! ```toml
//! [scheduler]
//! max_parallel = 4
//!
//! [retry]
//! component_fix_attempts = 2
//! task_fix_attempts = 3
//! max_total_attempts = 6
//! checkpoint_retries = 3
//! checkpoint_backoff_ms = 200
//!
//! [review]
//! low_reviewers = 2
//! medium_reviewers = 4
//! high_reviewers = 6
//! similarity_threshold = 0.8
//! roster = ["correctness", "security", "architecture", "performance"]
//!
//! [review.tiers]
//! medium_at = 3.0
//! high_at = 6.0
//!
//! [consensus]
//! judges = 3
//!
//! [session]
//! keep_full_phases = 3
//!
//! [workers]
//! command = "my-agent"
//! args = ["--json"]
//! timeout_secs = 600
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use crate::checkpoint::BackoffPolicy;
use crate::consensus::EscalationPolicy;
use crate::engine::EngineSettings;
use crate::review::gate::{DEFAULT_SIMILARITY_THRESHOLD, GateConfig};
use crate::review::risk::{ReviewerCounts, RiskPolicy, RiskTiers, RiskWeights};
use crate::review::specialists::ReviewerKind;
use crate::session::SessionConfig;
use crate::worker::CommandWorkerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `[workers] command`.
pub const WORKER_CMD_ENV: &str = "CONDUCTOR_WORKER_CMD";

pub const CONFIG_FILE_NAME: &str = "conductor.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Executors running at once inside one wave.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    4
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Fix attempts on a component before a recurring issue goes to a vote.
    #[serde(default = "default_component_fix_attempts")]
    pub component_fix_attempts: u32,
    /// Same, for the task-level gate.
    #[serde(default = "default_task_fix_attempts")]
    pub task_fix_attempts: u32,
    /// Hard cap on fix attempts for a unit that keeps making progress.
    #[serde(default = "default_max_total_attempts")]
    pub max_total_attempts: u32,
    #[serde(default = "default_checkpoint_retries")]
    pub checkpoint_retries: u32,
    #[serde(default = "default_checkpoint_backoff_ms")]
    pub checkpoint_backoff_ms: u64,
}

fn default_component_fix_attempts() -> u32 {
    2
}

fn default_task_fix_attempts() -> u32 {
    3
}

fn default_max_total_attempts() -> u32 {
    6
}

fn default_checkpoint_retries() -> u32 {
    3
}

fn default_checkpoint_backoff_ms() -> u64 {
    200
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            component_fix_attempts: default_component_fix_attempts(),
            task_fix_attempts: default_task_fix_attempts(),
            max_total_attempts: default_max_total_attempts(),
            checkpoint_retries: default_checkpoint_retries(),
            checkpoint_backoff_ms: default_checkpoint_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSection {
    #[serde(default = "default_low_reviewers")]
    pub low_reviewers: usize,
    #[serde(default = "default_medium_reviewers")]
    pub medium_reviewers: usize,
    #[serde(default = "default_high_reviewers")]
    pub high_reviewers: usize,
    /// Description similarity above which two issues at one location merge.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Reviewer order; empty means the built-in roster.
    #[serde(default)]
    pub roster: Vec<ReviewerKind>,
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default)]
    pub tiers: RiskTiers,
}

fn default_low_reviewers() -> usize {
    2
}

fn default_medium_reviewers() -> usize {
    4
}

fn default_high_reviewers() -> usize {
    6
}

fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            low_reviewers: default_low_reviewers(),
            medium_reviewers: default_medium_reviewers(),
            high_reviewers: default_high_reviewers(),
            similarity_threshold: default_similarity_threshold(),
            roster: Vec::new(),
            weights: RiskWeights::default(),
            tiers: RiskTiers::default(),
        }
    }
}

impl ReviewSection {
    pub fn roster(&self) -> Vec<ReviewerKind> {
        if self.roster.is_empty() {
            ReviewerKind::default_roster()
        } else {
            self.roster.clone()
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            policy: RiskPolicy {
                weights: self.weights.clone(),
                tiers: self.tiers.clone(),
                counts: ReviewerCounts {
                    low: self.low_reviewers,
                    medium: self.medium_reviewers,
                    high: self.high_reviewers,
                },
            },
            similarity_threshold: self.similarity_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSection {
    /// Judge seats per consensus round; must be odd.
    #[serde(default = "default_judges")]
    pub judges: usize,
}

fn default_judges() -> usize {
    3
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            judges: default_judges(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Most recent phases kept in full detail.
    #[serde(default = "default_keep_full_phases")]
    pub keep_full_phases: usize,
    #[serde(default = "default_max_key_outputs")]
    pub max_key_outputs: usize,
    #[serde(default = "default_max_gotchas")]
    pub max_gotchas: usize,
}

fn default_keep_full_phases() -> usize {
    3
}

fn default_max_key_outputs() -> usize {
    3
}

fn default_max_gotchas() -> usize {
    3
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            keep_full_phases: default_keep_full_phases(),
            max_key_outputs: default_max_key_outputs(),
            max_gotchas: default_max_gotchas(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersSection {
    /// External command serving every worker role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// The complete conductor.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load `conductor.toml` from `conductor_dir`, or the defaults when the
    /// file does not exist.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let path = conductor_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Worker command: environment first, then the file.
    pub fn worker_command(&self) -> Option<String> {
        std::env::var(WORKER_CMD_ENV)
            .ok()
            .filter(|cmd| !cmd.trim().is_empty())
            .or_else(|| self.workers.command.clone())
    }

    pub fn command_worker_config(&self, working_dir: PathBuf) -> Option<CommandWorkerConfig> {
        self.worker_command().map(|command| {
            CommandWorkerConfig::new(command)
                .with_args(self.workers.args.clone())
                .with_timeout(Duration::from_secs(self.workers.timeout_secs))
                .with_working_dir(working_dir)
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_parallel: self.scheduler.max_parallel.max(1),
            component_policy: EscalationPolicy::new(
                self.retry.component_fix_attempts,
                self.retry.max_total_attempts,
            ),
            task_policy: EscalationPolicy::new(
                self.retry.task_fix_attempts,
                self.retry.max_total_attempts,
            ),
            backoff: BackoffPolicy {
                retries: self.retry.checkpoint_retries,
                base_delay: Duration::from_millis(self.retry.checkpoint_backoff_ms),
            },
            gate: self.review.gate_config(),
            session: SessionConfig {
                keep_full_phases: self.session.keep_full_phases,
                max_key_outputs: self.session.max_key_outputs,
                max_gotchas: self.session.max_gotchas,
            },
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scheduler.max_parallel == 0 {
            warnings.push("scheduler.max_parallel is 0; one executor will run at a time".to_string());
        }

        if self.consensus.judges == 0 || self.consensus.judges % 2 == 0 {
            warnings.push(format!(
                "consensus.judges must be odd and at least 1 (got {})",
                self.consensus.judges
            ));
        }

        if self.retry.component_fix_attempts == 0 {
            warnings.push(
                "retry.component_fix_attempts is 0; a failing gate goes straight to a vote"
                    .to_string(),
            );
        }
        if self.retry.task_fix_attempts == 0 {
            warnings.push(
                "retry.task_fix_attempts is 0; a failing task gate goes straight to a vote"
                    .to_string(),
            );
        }
        let budget = self
            .retry
            .component_fix_attempts
            .max(self.retry.task_fix_attempts);
        if self.retry.max_total_attempts < budget {
            warnings.push(format!(
                "retry.max_total_attempts ({}) is below the fix budget ({}); the budget wins",
                self.retry.max_total_attempts, budget
            ));
        }

        if self.review.tiers.medium_at > self.review.tiers.high_at {
            warnings.push(format!(
                "review.tiers.medium_at ({}) is above review.tiers.high_at ({})",
                self.review.tiers.medium_at, self.review.tiers.high_at
            ));
        }
        if self.review.low_reviewers > self.review.medium_reviewers
            || self.review.medium_reviewers > self.review.high_reviewers
        {
            warnings.push("review reviewer counts should not decrease as risk grows".to_string());
        }
        if self.review.low_reviewers == 0 {
            warnings.push("review.low_reviewers is 0; low-risk units pass unreviewed".to_string());
        }
        let roster = self.review.roster().len();
        if roster < self.review.high_reviewers {
            warnings.push(format!(
                "review.roster has {} reviewer(s) but high-risk units ask for {}",
                roster, self.review.high_reviewers
            ));
        }
        if !(0.0..=1.0).contains(&self.review.similarity_threshold)
            || self.review.similarity_threshold == 0.0
        {
            warnings.push(format!(
                "review.similarity_threshold must be in (0, 1] (got {})",
                self.review.similarity_threshold
            ));
        }

        if self.workers.timeout_secs == 0 {
            warnings.push("workers.timeout_secs is 0; every worker call will time out".to_string());
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }

        warnings
    }
}
