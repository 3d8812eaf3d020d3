//! Session inspection: `conductor session show`.

use anyhow::Result;
use console::style;

use conductor::config::Config;
use conductor::session::PhaseDetail;

use super::super::SessionCommands;
use super::{WorkerMode, build_engine};

pub fn cmd_session(config: &Config, command: SessionCommands) -> Result<()> {
    let engine = build_engine(config, WorkerMode::Idle)?;

    match command {
        SessionCommands::Show { task_id } => {
            let Some(session) = engine.load_session(&task_id)? else {
                println!("No saved session for task {}.", task_id);
                return Ok(());
            };

            println!();
            println!("Session {} {}", style(&session.task_id).bold(), session.status);
            println!(
                "{}",
                style(format!(
                    "  saved {}  waves run: {}",
                    session.saved_at.format("%Y-%m-%d %H:%M:%S"),
                    session.waves_run
                ))
                .dim()
            );
            println!();

            println!("{:<20} {:<12} {}", "COMPONENT", "STATUS", "STAGE");
            for (name, state) in &session.components {
                println!(
                    "{:<20} {:<12} {}",
                    name,
                    state.status.to_string(),
                    state.stage
                );
            }

            if !session.completed_phases.is_empty() {
                println!();
                println!("Completed phases:");
                for record in &session.completed_phases {
                    match &record.detail {
                        PhaseDetail::Full { summary, .. } => println!(
                            "  {:<20} {:<12} {}",
                            record.component,
                            record.stage.to_string(),
                            summary.lines().next().unwrap_or_default()
                        ),
                        PhaseDetail::Compressed { status, .. } => println!(
                            "  {:<20} {:<12} {}",
                            record.component,
                            record.stage.to_string(),
                            style(status).dim()
                        ),
                    }
                }
            }

            if !session.next_steps.is_empty() {
                println!();
                println!("Next steps:");
                for step in &session.next_steps {
                    println!("  - {}", step);
                }
            }

            let usage = &session.resource_usage;
            println!();
            println!(
                "{}",
                style(format!(
                    "worker calls: {}  reviewer calls: {}  judge calls: {}  fixes: {}  elapsed: {}ms",
                    usage.worker_calls,
                    usage.reviewer_calls,
                    usage.judge_calls,
                    usage.fix_attempts,
                    usage.elapsed_ms
                ))
                .dim()
            );
            println!();
        }
    }

    Ok(())
}
