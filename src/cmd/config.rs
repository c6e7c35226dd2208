//! Configuration commands: `portrelay config`.

use anyhow::{Result, bail};
use portrelay::config::{CONFIG_FILE_NAME, RelayConfig};
use std::path::{Path, PathBuf};

use crate::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let target: PathBuf = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.join(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            let mut config = RelayConfig::load_or_default(config_path, &cwd)?;
            if target.exists() {
                println!("# Config file: {}", target.display());
            } else {
                println!("# No {} found; showing defaults", CONFIG_FILE_NAME);
            }
            config.apply_process_env()?;
            println!("# Effective values (with env overrides)");
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            // Validate what `serve` would run with, env overrides included.
            let mut config = RelayConfig::load_or_default(config_path, &cwd)?;
            config.apply_process_env()?;
            let problems = config.validate();
            if !problems.is_empty() {
                bail!("Configuration is invalid:\n  - {}", problems.join("\n  - "));
            }
            if config_path.is_none() && !target.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
            } else {
                println!("Configuration is valid.");
            }
        }
        Some(ConfigCommands::Init) => {
            if target.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, target.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            RelayConfig::default().save(&target)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, target.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port");
            println!("  - [upstream] api_base, ws_url");
            println!("  - [polling] interval_ms, metrics_limit");
            println!("  - [websocket] reconnect_delay_ms, reconnect_when_idle");
        }
    }

    Ok(())
}
