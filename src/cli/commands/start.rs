//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use crate::entry::{Connection, FunnelFuture, RequestEnvelope, RequestFunnel, ResponseEnvelope};
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use std::sync::Arc;

/// Start a Roomcast node.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments - config and log level are handled globally
}

/// Funnel used when the node runs standalone, before an embedding
/// application registers real controllers.
struct UnroutedFunnel;

impl RequestFunnel for UnroutedFunnel {
    fn execute(&self, _connection: Connection, request: RequestEnvelope) -> FunnelFuture<ResponseEnvelope> {
        let response = ResponseEnvelope::error(
            404,
            request.request_id.clone(),
            format!("no handler for controller: {}", request.controller),
        );
        Box::pin(async move { response })
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the start command.
pub async fn run_start(config_path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(overrides);
    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config, Arc::new(UnroutedFunnel))?;
    runtime.run().await
}
