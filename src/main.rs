use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(
    version,
    about = "Drive a task's components through dependency-ordered waves with validation gates"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Use scripted workers that pass every stage and an in-memory snapshot
    /// backend (dry run of scheduling, checkpointing and persistence)
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .conductor/ and a default conductor.toml
    Init,
    /// Validate a task specification (JSON or YAML) and register the task
    Start {
        /// Path to the specification file
        spec_file: PathBuf,
    },
    /// Show components, statuses and stages of a task
    Status { task_id: String },
    /// Run the next wave, or every wave followed by task completion
    Run {
        task_id: String,
        /// Run a single wave and stop at its barrier
        #[arg(long)]
        wave: bool,
    },
    /// Run the task-level validation gate and archive the task
    Complete { task_id: String },
    /// Rebuild a task from its stored specification and session
    Resume { task_id: String },
    /// Make a blocked component runnable again
    Unblock { task_id: String, component: String },
    /// Manage checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Inspect saved sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// Snapshot the working tree under a free-form label
    Create { task_id: String, label: String },
    /// List checkpoints in creation order
    List { task_id: String },
    /// Restore the working tree to a checkpoint
    Rollback {
        task_id: String,
        checkpoint_id: String,
    },
    /// Drop every checkpoint of a task
    Cleanup { task_id: String },
}

#[derive(Subcommand, Clone)]
pub enum SessionCommands {
    /// Show the saved session of a task
    Show { task_id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = conductor::config::Config::new(project_dir, cli.verbose)?;
    let _log_guard = conductor::logging::init(
        &config.toml.logging,
        cli.verbose,
        Some(config.log_dir.as_path()),
    )?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Start { spec_file } => cmd::cmd_start(&config, spec_file)?,
        Commands::Status { task_id } => cmd::cmd_status(&config, task_id)?,
        Commands::Run { task_id, wave } => {
            cmd::cmd_run(&config, cli.simulate, task_id, *wave).await?
        }
        Commands::Complete { task_id } => {
            cmd::cmd_complete(&config, cli.simulate, task_id).await?
        }
        Commands::Resume { task_id } => cmd::cmd_resume(&config, task_id)?,
        Commands::Unblock { task_id, component } => {
            cmd::cmd_unblock(&config, task_id, component)?
        }
        Commands::Checkpoint { command } => {
            cmd::cmd_checkpoint(&config, cli.simulate, command.clone()).await?
        }
        Commands::Session { command } => cmd::cmd_session(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
