//! Configuration parsing and validation.
//!
//! Roomcast configuration is loaded from TOML files with CLI overrides.
//! Every section carries serde defaults so an empty file is a valid
//! single-node development configuration.

use crate::protocols::{MqttSettings, WebSocketSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Roomcast configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node identity and startup limits.
    #[serde(default)]
    pub node: NodeConfig,

    /// Listener configuration for protocol adapters.
    #[serde(default)]
    pub listeners: ListenerConfig,

    /// Sync history buffer defaults, before the cache store overrides them.
    #[serde(default)]
    pub sync_history: SyncHistoryConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Node identity and startup limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster-unique identifier for this node.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Per-protocol initialization budget in milliseconds; exceeding it is
    /// a fatal startup error.
    #[serde(default = "default_protocol_init_timeout_ms")]
    pub protocol_init_timeout_ms: u64,
}

impl NodeConfig {
    /// The protocol initialization budget as a duration.
    pub fn protocol_init_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_init_timeout_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            protocol_init_timeout_ms: default_protocol_init_timeout_ms(),
        }
    }
}

/// Listener configuration for protocol adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Combined HTTP/WebSocket listener.
    #[serde(default)]
    pub websocket: WebSocketSettings,

    /// MQTT listener.
    #[serde(default)]
    pub mqtt: MqttSettings,
}

/// Sync history buffer defaults.
///
/// These seed the buffer at startup; the live values are re-read from the
/// shared cache store every few seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryConfig {
    /// TTL for the persisted buffer copy, in milliseconds. Absent disables
    /// history capture until the cache store says otherwise.
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Ring capacity.
    #[serde(default = "default_history_max_entries")]
    pub max_entries: usize,
}

impl Default for SyncHistoryConfig {
    fn default() -> Self {
        Self {
            ttl_ms: None,
            max_entries: default_history_max_entries(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_node_id() -> String {
    "node-local".to_string()
}

fn default_protocol_init_timeout_ms() -> u64 {
    10_000
}

fn default_history_max_entries() -> usize {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref node_id) = overrides.node_id {
            self.node.node_id = node_id.clone();
        }
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref websocket_bind) = overrides.websocket_bind {
            self.listeners.websocket.bind = websocket_bind.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_node()?;
        self.validate_listeners()?;
        self.validate_sync_history()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_node(&self) -> Result<()> {
        if self.node.node_id.is_empty() {
            anyhow::bail!("node.node_id must not be empty");
        }
        if self.node.protocol_init_timeout_ms == 0 {
            anyhow::bail!("node.protocol_init_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_listeners(&self) -> Result<()> {
        let ws = &self.listeners.websocket;
        if ws.enabled && ws.bind.is_empty() {
            anyhow::bail!("listeners.websocket.bind must not be empty");
        }
        if ws.backpressure_buffer_bytes == 0 {
            anyhow::bail!("listeners.websocket.backpressure_buffer_bytes must be > 0");
        }
        if ws.max_queued_frames == 0 {
            anyhow::bail!("listeners.websocket.max_queued_frames must be > 0");
        }

        let mqtt = &self.listeners.mqtt;
        if mqtt.request_topic.is_empty() || mqtt.response_topic.is_empty() {
            anyhow::bail!("listeners.mqtt topics must not be empty");
        }
        if mqtt.request_topic == mqtt.response_topic {
            anyhow::bail!(
                "listeners.mqtt.request_topic and response_topic must differ, both are: {}",
                mqtt.request_topic
            );
        }
        Ok(())
    }

    fn validate_sync_history(&self) -> Result<()> {
        if self.sync_history.max_entries == 0 {
            anyhow::bail!("sync_history.max_entries must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override node id.
    pub node_id: Option<String>,
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the websocket bind address.
    pub websocket_bind: Option<String>,
}
