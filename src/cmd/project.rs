//! Project initialization: `conductor init`.

use anyhow::Result;
use conductor::conductor_config::ConductorToml;
use conductor::config::Config;

pub fn cmd_init(config: &Config) -> Result<()> {
    let was_initialized = config.is_initialized();
    config.ensure_directories()?;

    let wrote_config = if config.config_file.exists() {
        false
    } else {
        ConductorToml::default().save(&config.config_file)?;
        true
    };

    if was_initialized {
        println!(
            "Conductor project already initialized at {}",
            config.conductor_dir.display()
        );
        if wrote_config {
            println!("Wrote missing conductor.toml.");
        }
        println!("Directory structure verified.");
        return Ok(());
    }

    println!(
        "Initialized conductor project at {}",
        config.conductor_dir.display()
    );
    println!();
    println!("Created directory structure:");
    println!("  .conductor/");
    println!("  ├── conductor.toml  # Scheduler, retry, review and worker settings");
    println!("  ├── store/          # Tasks, sessions, checkpoints and escalations");
    println!("  └── logs/           # Daily rolling JSON logs");
    println!();
    println!("Next steps:");
    println!("  1. Set [workers] command in conductor.toml");
    println!("  2. Run `conductor start <spec-file>` to register a task");
    println!("  3. Run `conductor run <task-id>` to drive it to completion");

    Ok(())
}
