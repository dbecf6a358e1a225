//! CLI command implementations.

mod config;
mod start;

pub use config::{run_config, ConfigArgs};
pub use start::{run_start, StartArgs};
