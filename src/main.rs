//! Roomcast - unified CLI entrypoint.
//!
//! Usage:
//!   roomcast start --config config/roomcast.toml
//!   roomcast config validate --config config/roomcast.toml
//!   roomcast config show --format json
//!   roomcast config generate --env prod

use anyhow::Result;
use clap::Parser;
use roomcast::cli::commands::{run_config, run_start};
use roomcast::cli::{Cli, Commands};
use roomcast::core::config::ConfigOverrides;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/roomcast.toml"));

    match cli.command {
        Commands::Start(_args) => {
            let overrides = ConfigOverrides {
                log_level: cli.log_level,
                ..ConfigOverrides::default()
            };
            run_start(&config_path, &overrides).await
        }
        Commands::Config(args) => run_config(&config_path, args),
    }
}
