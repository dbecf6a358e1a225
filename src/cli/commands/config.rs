//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands. The config file path comes from the global
/// `--config` flag.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate,
    /// Print configuration with defaults applied.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Environment (dev, prod).
        #[arg(long, default_value = "dev")]
        env: String,
    },
}

/// Run the config command.
pub fn run_config(config_path: &Path, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config_path),
        ConfigCommand::Show { format } => show_config(config_path, &format),
        ConfigCommand::Generate { output, env } => generate_config(output.as_deref(), &env),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    println!("✓ Configuration is valid");
    println!("  node_id: {}", config.node.node_id);
    println!(
        "  websocket: {}",
        if config.listeners.websocket.enabled {
            config.listeners.websocket.bind.as_str()
        } else {
            "disabled"
        }
    );
    println!(
        "  mqtt: {}",
        if config.listeners.mqtt.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        other => anyhow::bail!("unknown output format: {}", other),
    }
    Ok(())
}

fn generate_config(output: Option<&Path>, env: &str) -> Result<()> {
    let template = match env {
        "prod" | "production" => generate_prod_template(),
        _ => generate_dev_template(),
    };

    match output {
        Some(path) => {
            std::fs::write(path, &template)
                .with_context(|| format!("failed to write template to {:?}", path))?;
            println!("Generated {} config template: {:?}", env, path);
        }
        None => println!("{}", template),
    }
    Ok(())
}

fn generate_dev_template() -> String {
    r#"# Roomcast Development Configuration

[node]
node_id = "node-local"
protocol_init_timeout_ms = 10000

[listeners.websocket]
enabled = true
bind = "127.0.0.1:7512"

[listeners.mqtt]
enabled = false

[sync_history]
max_entries = 200

[telemetry]
log_level = "debug"
"#
    .to_string()
}

fn generate_prod_template() -> String {
    r#"# Roomcast Production Configuration

[node]
node_id = "node-1"
protocol_init_timeout_ms = 10000

[listeners.websocket]
enabled = true
bind = "0.0.0.0:7512"
backpressure_buffer_bytes = 4096
max_queued_frames = 50

[listeners.mqtt]
enabled = true
request_topic = "roomcast/request"
response_topic = "roomcast/response"

[sync_history]
# Uncomment to persist the sync history buffer for forensics.
# ttl_ms = 86400000
max_entries = 200

[telemetry]
log_level = "info"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse_and_validate() {
        Config::from_toml(&generate_dev_template()).unwrap();
        let prod = Config::from_toml(&generate_prod_template()).unwrap();
        assert!(prod.listeners.mqtt.enabled);
        assert_eq!(prod.node.node_id, "node-1");
    }

    #[test]
    fn test_validate_reads_the_given_path() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[node]\nnode_id = \"cli-node\"").unwrap();

        let args = ConfigArgs {
            command: ConfigCommand::Validate,
        };
        run_config(file.path(), args).unwrap();

        let missing = ConfigArgs {
            command: ConfigCommand::Validate,
        };
        assert!(run_config(Path::new("/nonexistent/roomcast.toml"), missing).is_err());
    }
}
