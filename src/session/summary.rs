//! Completed-phase records and their compression.

use crate::consensus::AttemptRecord;
use crate::lifecycle::Stage;
use crate::review::findings::{Issue, Severity};
use crate::worker::StageOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest key output kept after compression, in characters.
const MAX_KEY_OUTPUT_CHARS: usize = 200;

/// One stage a component (or the task unit) completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub component: String,
    /// The stage that completed.
    pub stage: Stage,
    /// Checkpoint taken on the transition out of `stage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub detail: PhaseDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseDetail {
    Full {
        summary: String,
        #[serde(default)]
        artifacts: Vec<String>,
        #[serde(default)]
        changed_paths: Vec<String>,
        /// Issues of the last gate or test round, if any.
        #[serde(default)]
        issues: Vec<Issue>,
        #[serde(default)]
        attempts: Vec<AttemptRecord>,
    },
    /// Fixed-size summary of an older phase.
    Compressed {
        status: String,
        key_outputs: Vec<String>,
        gotchas: Vec<String>,
    },
}

impl PhaseRecord {
    pub fn full(component: &str, stage: Stage, output: &StageOutput) -> Self {
        Self {
            component: component.to_string(),
            stage,
            checkpoint: None,
            completed_at: Utc::now(),
            detail: PhaseDetail::Full {
                summary: output.summary.clone(),
                artifacts: output.artifacts.clone(),
                changed_paths: Vec::new(),
                issues: output.issues.clone(),
                attempts: Vec::new(),
            },
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<String>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_changed_paths(mut self, paths: Vec<String>) -> Self {
        if let PhaseDetail::Full { changed_paths, .. } = &mut self.detail {
            *changed_paths = paths;
        }
        self
    }

    pub fn with_issues(mut self, gate_issues: Vec<Issue>) -> Self {
        if let PhaseDetail::Full { issues, .. } = &mut self.detail {
            *issues = gate_issues;
        }
        self
    }

    pub fn with_attempts(mut self, history: Vec<AttemptRecord>) -> Self {
        if let PhaseDetail::Full { attempts, .. } = &mut self.detail {
            *attempts = history;
        }
        self
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.detail, PhaseDetail::Compressed { .. })
    }

    /// Reduce to status, at most `max_key_outputs` outputs and at most
    /// `max_gotchas` critical issues, each cut to `MAX_KEY_OUTPUT_CHARS`.
    /// Already compressed records are returned unchanged.
    pub fn compress(&self, max_key_outputs: usize, max_gotchas: usize) -> Self {
        let PhaseDetail::Full {
            summary,
            artifacts,
            issues,
            attempts,
            ..
        } = &self.detail
        else {
            return self.clone();
        };

        let fixes = attempts.iter().filter(|a| !a.passed).count();
        let status = match fixes {
            0 => format!("{} passed", self.stage),
            n => format!("{} passed after {} failed round(s)", self.stage, n),
        };

        let first_line = summary.lines().next().unwrap_or_default().trim();
        let key_outputs = std::iter::once(first_line)
            .filter(|s| !s.is_empty())
            .chain(artifacts.iter().map(String::as_str))
            .take(max_key_outputs)
            .map(|s| truncate(s, MAX_KEY_OUTPUT_CHARS))
            .collect();

        let gotchas = issues
            .iter()
            .filter(|i| i.severity() == Severity::Critical)
            .take(max_gotchas)
            .map(|i| {
                let gotcha = format!("{}: {}", i.location(), i.description());
                truncate(&gotcha, MAX_KEY_OUTPUT_CHARS)
            })
            .collect();

        Self {
            detail: PhaseDetail::Compressed {
                status,
                key_outputs,
                gotchas,
            },
            ..self.clone()
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// Keep the `keep_full` most recent records in full and compress the rest.
pub fn compress_history(
    records: &mut [PhaseRecord],
    keep_full: usize,
    max_key_outputs: usize,
    max_gotchas: usize,
) {
    let cutoff = records.len().saturating_sub(keep_full);
    for record in &mut records[..cutoff] {
        if !record.is_compressed() {
            *record = record.compress(max_key_outputs, max_gotchas);
        }
    }
}

/// Resource-usage counters accumulated over a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub worker_calls: u64,
    #[serde(default)]
    pub reviewer_calls: u64,
    #[serde(default)]
    pub judge_calls: u64,
    #[serde(default)]
    pub fix_attempts: u64,
    #[serde(default)]
    pub waves_run: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ResourceUsage {
    pub fn add(&mut self, other: &ResourceUsage) {
        self.worker_calls += other.worker_calls;
        self.reviewer_calls += other.reviewer_calls;
        self.judge_calls += other.judge_calls;
        self.fix_attempts += other.fix_attempts;
        self.waves_run += other.waves_run;
        self.elapsed_ms += other.elapsed_ms;
    }
}
