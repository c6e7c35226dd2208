use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use portrelay::config::RelayConfig;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "portrelay")]
#[command(version, about = "Topic-based pub/sub relay shared by browser tabs")]
pub struct Cli {
    /// Path to portrelay.toml (defaults to ./portrelay.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server
    Serve(ServeArgs),
    /// View, create or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Base URL of the upstream HTTP API
    #[arg(long)]
    pub api_base: Option<String>,

    /// URL of the upstream WebSocket
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Bind all interfaces and allow any origin
    #[arg(long)]
    pub dev: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and report every problem
    Validate,
    /// Initialize a default portrelay.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve(args) => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            let mut config = RelayConfig::load_or_default(cli.config.as_deref(), &cwd)?;
            config.apply_process_env()?;
            cmd::cmd_serve(config, args).await?;
        }
        Commands::Config { command } => cmd::cmd_config(cli.config.as_deref(), command.clone())?,
    }

    Ok(())
}
