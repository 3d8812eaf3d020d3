//! Configuration view and validation commands: `conductor config`.

use anyhow::{Context, Result};
use conductor::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();

            if config.config_file.exists() {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!("No conductor.toml found at {}", config.config_file.display());
                println!("Using default configuration. Run 'conductor init' to create one.");
            }
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env overrides):");
            match config.toml.worker_command() {
                Some(cmd) => println!("  worker command = \"{}\"", cmd),
                None => println!("  worker command = (none)"),
            }
            let roster = config.toml.review.roster();
            println!(
                "  roster = {}",
                roster
                    .iter()
                    .map(|r| r.agent_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config.config_file.exists() {
                println!("No conductor.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
