//! Checkpoint commands: `conductor checkpoint create|list|rollback|cleanup`.

use anyhow::Result;
use console::style;

use conductor::config::Config;

use super::super::CheckpointCommands;
use super::{WorkerMode, build_engine};

pub async fn cmd_checkpoint(config: &Config, simulate: bool, command: CheckpointCommands) -> Result<()> {
    let mode = if simulate { WorkerMode::Simulate } else { WorkerMode::Idle };
    let engine = build_engine(config, mode)?;

    match command {
        CheckpointCommands::Create { task_id, label } => {
            let checkpoint = engine.create_checkpoint(&task_id, &label).await?;
            println!(
                "{} Created checkpoint {} ({})",
                style("✓").green(),
                style(&checkpoint.id).bold(),
                checkpoint.short_ref()
            );
        }
        CheckpointCommands::List { task_id } => {
            let checkpoints = engine.list_checkpoints(&task_id)?;
            if checkpoints.is_empty() {
                println!("No checkpoints for task {}.", task_id);
                return Ok(());
            }
            println!();
            println!(
                "{:<38} {:<14} {:<20} {}",
                "ID", "SNAPSHOT", "CREATED", "LABEL"
            );
            for checkpoint in &checkpoints {
                println!(
                    "{:<38} {:<14} {:<20} {}",
                    checkpoint.id,
                    checkpoint.short_ref(),
                    checkpoint.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    checkpoint.phase_label
                );
            }
            println!();
            println!("{}", style(format!("{} checkpoint(s)", checkpoints.len())).dim());
        }
        CheckpointCommands::Rollback {
            task_id,
            checkpoint_id,
        } => {
            let checkpoint = engine.rollback(&task_id, &checkpoint_id)?;
            println!(
                "{} Restored working tree to {} ({})",
                style("✓").green(),
                checkpoint.phase_label,
                checkpoint.short_ref()
            );
        }
        CheckpointCommands::Cleanup { task_id } => {
            let removed = engine.cleanup_checkpoints(&task_id)?;
            println!("Removed {} checkpoint(s) for task {}.", removed, task_id);
        }
    }

    Ok(())
}
