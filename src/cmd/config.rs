//! Configuration view and validation commands: `garage config`.

use std::path::Path;

use anyhow::{Context, Result};

use garage::garage_config::{CONFIG_FILE, GarageConfig, GarageToml};

use super::super::ConfigCommands;

const REDACTED: &str = "<redacted>";

fn print_toml(toml: &GarageToml) -> Result<()> {
    let mut shown = toml.clone();
    if shown.push.access_token.is_some() {
        shown.push.access_token = Some(REDACTED.to_string());
    }
    let text = toml::to_string_pretty(&shown).context("Failed to serialize configuration")?;
    for line in text.lines() {
        println!("  {}", line);
    }
    Ok(())
}

pub fn cmd_config(data_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = data_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Garage Configuration");
            println!("====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No garage.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();

            let config = GarageConfig::new(data_dir.to_path_buf())?;
            print_toml(&config.toml)?;
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  listen = \"{}:{}\"", config.host(), config.port());
            println!("  database = \"{}\"", config.db_path().display());
            println!("  push.backend = \"{}\"", config.toml.push.backend);
            println!(
                "  push.access_token = {}",
                if config.toml.push.access_token().is_some() {
                    "set"
                } else {
                    "unset"
                }
            );
            println!();

            if !config_path.exists() {
                println!("Run 'garage config init' to create a garage.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No garage.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = GarageToml::load(&config_path)?;
            let warnings = toml.validate();

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
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("garage.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
            GarageToml::default().save(&config_path)?;

            println!("Created garage.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [push] backend, project_id, icon");
            println!("  - [[catalog]] repair types, durations and prices");
            println!();
        }
    }

    Ok(())
}
