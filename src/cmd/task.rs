//! Task lifecycle commands: start, status, run, complete, resume, unblock.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use conductor::config::Config;
use conductor::dag;
use conductor::engine::Engine;
use conductor::orchestrator::{EscalationRecord, HaltedComponent, TaskOutcome, WaveResult};
use conductor::task::{ComponentStatus, Task, TaskSpec};

use super::{WorkerMode, build_engine, spawn_event_printer};

pub fn cmd_start(config: &Config, spec_file: &Path) -> Result<()> {
    let spec = TaskSpec::load(spec_file)?;
    let engine = build_engine(config, WorkerMode::Idle)?;
    let task_id = engine.start_task(&spec, config.project_dir.clone())?;
    let (_graph, plan) = dag::plan(&spec.components)?;

    println!("Started task {}", style(&task_id).bold());
    println!();
    println!("Wave plan:");
    for (i, wave) in plan.waves().iter().enumerate() {
        println!("  {:<4} {}", i + 1, wave.join(", "));
    }
    println!();
    println!("Run `conductor run {}` to execute it.", task_id);
    Ok(())
}

pub fn cmd_status(config: &Config, task_id: &str) -> Result<()> {
    let engine = build_engine(config, WorkerMode::Idle)?;
    let task = engine.get_state(task_id)?;

    println!();
    println!("Task {} {}", style(&task.id).bold(), status_label(&task));
    println!("{}", style(format!("  waves run: {}", task.waves_run)).dim());
    if !task.approach.is_empty() {
        println!("{}", style(format!("  approach: {}", task.approach)).dim());
    }
    println!();
    println!(
        "{:<20} {:<12} {:<12} {}",
        "COMPONENT", "STATUS", "STAGE", "NOTE"
    );
    for component in &task.components {
        let note = match (&component.blocked_by, component.halted_at) {
            (Some(root), _) => format!("cancelled: {} is blocked", root),
            (None, Some(stage)) => format!("halted at {}", stage),
            (None, None) if component.has_blocking_issues() => {
                format!("{} blocking issue(s)", component.issues.len())
            }
            _ => String::new(),
        };
        println!(
            "{:<20} {:<12} {:<12} {}",
            component.name,
            component.status.to_string(),
            component.stage.to_string(),
            style(note).dim()
        );
    }

    let escalations = engine.escalations(task_id)?;
    if !escalations.is_empty() {
        println!();
        println!("Escalations:");
        for record in &escalations {
            print_escalation(record);
        }
    }

    if let Some(session) = engine.load_session(task_id)?
        && !session.next_steps.is_empty()
    {
        println!();
        println!("Next steps:");
        for step in &session.next_steps {
            println!("  - {}", step);
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_run(config: &Config, simulate: bool, task_id: &str, wave_only: bool) -> Result<()> {
    let (tx, printer) = spawn_event_printer();
    let engine = build_engine(config, WorkerMode::for_run(simulate))?.with_events(tx);

    let result = if wave_only {
        run_single_wave(&engine, task_id).await
    } else {
        engine.run_task(task_id).await.map(Some).map_err(Into::into)
    };
    drop(engine);
    printer.await.ok();

    match result? {
        Some(outcome) => report_outcome(task_id, &outcome),
        None => Ok(()),
    }
}

async fn run_single_wave(engine: &Engine, task_id: &str) -> Result<Option<TaskOutcome>> {
    match engine.run_wave(task_id).await? {
        Some(wave) => {
            print_wave(&wave);
            Ok(None)
        }
        None => {
            let task = engine.get_state(task_id)?;
            println!("No runnable components in task {}.", task_id);
            Ok(Some(engine.outcome(&task)?))
        }
    }
}

pub async fn cmd_complete(config: &Config, simulate: bool, task_id: &str) -> Result<()> {
    let (tx, printer) = spawn_event_printer();
    let engine = build_engine(config, WorkerMode::for_run(simulate))?.with_events(tx);
    let result = engine.complete_task(task_id).await;
    drop(engine);
    printer.await.ok();
    report_outcome(task_id, &result?)
}

pub fn cmd_resume(config: &Config, task_id: &str) -> Result<()> {
    let engine = build_engine(config, WorkerMode::Idle)?;
    let task = engine.resume_task(task_id)?;
    let completed = task.completed();
    println!(
        "Resumed task {} {} ({} of {} components complete)",
        style(&task.id).bold(),
        status_label(&task),
        completed.len(),
        task.components.len()
    );
    let pending = task.pending();
    if !pending.is_empty() {
        println!("Pending: {}", pending.join(", "));
    }
    Ok(())
}

pub fn cmd_unblock(config: &Config, task_id: &str, component: &str) -> Result<()> {
    let engine = build_engine(config, WorkerMode::Idle)?;
    let task = engine.unblock(task_id, component)?;
    let stage = task
        .component(component)
        .and_then(|c| c.halted_at)
        .map(|s| s.to_string())
        .unwrap_or_default();
    println!(
        "{} {} is runnable again (restarts at {})",
        style("✓").green(),
        component,
        stage
    );
    Ok(())
}

fn report_outcome(task_id: &str, outcome: &TaskOutcome) -> Result<()> {
    println!();
    match outcome {
        TaskOutcome::Complete { .. } => {
            println!("{} Task {} complete", style("✓").green().bold(), task_id);
            Ok(())
        }
        TaskOutcome::Pending { pending } => {
            println!("Task {} pending: {}", task_id, pending.join(", "));
            Ok(())
        }
        TaskOutcome::Blocked {
            component,
            chain,
            record,
            others,
            ..
        } => {
            if let Some(record) = record {
                print_escalation(record);
            }
            if !chain.is_empty() {
                println!("  never started: {}", chain.join(", "));
            }
            print_others(others);
            println!();
            println!("Unblock with `conductor unblock {} {}`", task_id, component);
            bail!("Task {} halted: {}", task_id, outcome)
        }
        TaskOutcome::Escalated { record, others, .. } => {
            print_escalation(record);
            print_others(others);
            bail!("Task {} halted: {}", task_id, outcome)
        }
    }
}

fn print_others(others: &[HaltedComponent]) {
    for halted in others {
        match &halted.record {
            Some(record) => print_escalation(record),
            None => println!("  {} {} {}", style("!").red().bold(), halted.component, halted.reason),
        }
        if !halted.chain.is_empty() {
            println!("  never started: {}", halted.chain.join(", "));
        }
    }
}

fn print_wave(wave: &WaveResult) {
    println!();
    println!(
        "Wave {} finished in {}ms",
        wave.index + 1,
        wave.duration_ms
    );
    for (label, names) in [
        ("completed", &wave.completed),
        ("blocked", &wave.blocked),
        ("escalated", &wave.escalated),
        ("cancelled", &wave.cancelled),
    ] {
        if !names.is_empty() {
            println!("  {:<10} {}", label, names.join(", "));
        }
    }
}

fn print_escalation(record: &EscalationRecord) {
    println!("  {} {}", style("!").red().bold(), record);
    for issue in record.issues.iter().filter(|i| i.is_blocking()).take(5) {
        println!("{}", style(format!("      {}", issue)).dim());
    }
    if let Some(proposal) = &record.proposal {
        println!("      proposal: {}", proposal);
    }
}

fn status_label(task: &Task) -> console::StyledObject<String> {
    let label = task.status.to_string();
    if task.components.iter().any(|c| c.status == ComponentStatus::Blocked) {
        style(label).red()
    } else if task.all_complete() {
        style(label).green()
    } else {
        style(label).yellow()
    }
}
