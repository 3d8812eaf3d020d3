//! CLI command implementations.
//!
//! | Module       | Commands handled                                       |
//! |--------------|--------------------------------------------------------|
//! | `project`    | `Init`                                                 |
//! | `task`       | `Start`, `Status`, `Run`, `Complete`, `Resume`, `Unblock` |
//! | `checkpoint` | `Checkpoint`                                           |
//! | `session`    | `Session`                                              |
//! | `config`     | `Config`                                               |

pub mod checkpoint;
pub mod config;
pub mod project;
pub mod session;
pub mod task;

pub use checkpoint::cmd_checkpoint;
pub use config::cmd_config;
pub use project::cmd_init;
pub use session::cmd_session;
pub use task::{cmd_complete, cmd_resume, cmd_run, cmd_start, cmd_status, cmd_unblock};

use anyhow::{Result, bail};
use conductor::checkpoint::{GitBackend, MemoryBackend, SnapshotBackend};
use conductor::conductor_config::WORKER_CMD_ENV;
use conductor::config::Config;
use conductor::engine::Engine;
use conductor::orchestrator::OrchestratorEvent;
use conductor::task::ComponentStatus;
use conductor::worker::{CommandWorker, ScriptedWorker, Workers};
use console::style;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which workers an engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Scripted workers on an in-memory tree.
    Simulate,
    /// The configured command; fails without one.
    Command,
    /// Bookkeeping only; workers are never called.
    Idle,
}

impl WorkerMode {
    pub fn for_run(simulate: bool) -> Self {
        if simulate { Self::Simulate } else { Self::Command }
    }
}

pub fn build_engine(config: &Config, mode: WorkerMode) -> Result<Engine> {
    if !config.is_initialized() {
        bail!(
            "Project not initialized: {} does not exist. Run 'conductor init' first.",
            config.conductor_dir.display()
        );
    }
    let toml = &config.toml;
    let roster = toml.review.roster();
    let judges = toml.consensus.judges;

    let (backend, workers): (Arc<dyn SnapshotBackend>, Workers) = match mode {
        WorkerMode::Simulate => {
            let tree = Arc::new(MemoryBackend::new());
            let workers = ScriptedWorker::passing()
                .with_tree(tree.clone())
                .into_workers(roster.len(), judges);
            let backend: Arc<dyn SnapshotBackend> = tree;
            (backend, workers)
        }
        WorkerMode::Command => {
            let Some(worker) = toml.command_worker_config(config.project_dir.clone()) else {
                bail!(
                    "No worker command configured. Set [workers] command in {} or {}, or pass --simulate.",
                    config.config_file.display(),
                    WORKER_CMD_ENV
                );
            };
            (
                Arc::new(GitBackend::new(config.project_dir.clone())),
                CommandWorker::new(worker).into_workers(&roster, judges),
            )
        }
        WorkerMode::Idle => (
            Arc::new(GitBackend::new(config.project_dir.clone())),
            ScriptedWorker::passing().into_workers(roster.len(), judges),
        ),
    };

    Ok(Engine::new(
        config.store(),
        backend,
        workers,
        toml.engine_settings(),
    )?)
}

/// Print orchestrator events as they arrive. The printer stops once every
/// sender is dropped.
pub fn spawn_event_printer() -> (mpsc::Sender<OrchestratorEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OrchestratorEvent>(256);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });
    (tx, handle)
}

fn print_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::WaveStarted {
            wave, components, ..
        } => {
            println!();
            println!(
                "{} {}",
                style(format!("Wave {}", wave + 1)).bold(),
                components.join(", ")
            );
        }
        OrchestratorEvent::ComponentStarted {
            component, stage, ..
        } => println!("  {} {} at {}", style("▶").cyan(), component, stage),
        OrchestratorEvent::StageChanged {
            component, from, to, ..
        } => println!("  {} {} {} -> {}", style("·").dim(), component, from, to),
        OrchestratorEvent::GateCompleted {
            unit,
            passed,
            critical,
            important,
            reviewers,
        } => {
            let verdict = if *passed {
                style("passed".to_string()).green()
            } else {
                style(format!("failed ({} critical, {} important)", critical, important)).red()
            };
            println!("  {} gate on {} with {} reviewer(s) {}", style("◆").blue(), unit, reviewers, verdict);
        }
        OrchestratorEvent::ConsensusReached {
            unit,
            tally,
            decision,
        } => {
            let decision = decision
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "NO MAJORITY".to_string());
            println!("  {} consensus on {}: {} [{}]", style("⚖").yellow(), unit, decision, tally);
        }
        OrchestratorEvent::ComponentFinished {
            component, status, stage,
        } => {
            let status = match status {
                ComponentStatus::Complete => style(status.to_string()).green(),
                ComponentStatus::Blocked => style(status.to_string()).red(),
                _ => style(status.to_string()).yellow(),
            };
            println!("  {} {} {} ({})", style("■").bold(), component, status, stage);
        }
        OrchestratorEvent::WaveCompleted {
            wave,
            completed,
            blocked,
            cancelled,
        } => println!(
            "Wave {} done: {} completed, {} blocked, {} cancelled",
            wave + 1,
            completed,
            blocked,
            cancelled
        ),
        OrchestratorEvent::TaskFinished { task_id, outcome } => {
            println!();
            println!("Task {} finished: {}", task_id, style(outcome).bold());
        }
    }
}
