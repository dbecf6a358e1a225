//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use roomcast::core::config::Config;
use roomcast::protocols::websocket::{FrameSink, SinkError};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    let config_content = r#"
[node]
node_id = "test-node"

[listeners.websocket]
bind = "127.0.0.1:0"
"#;

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration with custom settings.
pub fn create_config_with_settings(node_id: &str, log_level: &str) -> NamedTempFile {
    let config_content = format!(
        r#"
[node]
node_id = "{}"

[listeners.websocket]
bind = "127.0.0.1:0"

[telemetry]
log_level = "{}"
"#,
        node_id, log_level
    );

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Frame sink double with a controllable transport buffer level.
#[derive(Default)]
pub struct TestSink {
    buffered: AtomicUsize,
    written: Mutex<Vec<Bytes>>,
    closed: Mutex<Option<String>>,
}

impl TestSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend the transport has this many bytes pending.
    pub fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.closed.lock().clone()
    }
}

impl FrameSink for TestSink {
    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn write(&self, frame: Bytes) -> Result<(), SinkError> {
        self.written.lock().push(frame);
        Ok(())
    }

    fn close(&self, reason: Option<&str>) {
        *self.closed.lock() = reason.map(str::to_string);
    }
}
