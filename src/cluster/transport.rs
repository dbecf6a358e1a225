//! Cluster transport interface.
//!
//! How diff messages travel between nodes is an external concern (a pub/sub
//! bus, a mesh of sockets, anything). The only contract callers may rely on
//! is at-least-once, unordered delivery to every peer; staleness handling
//! lives entirely in the ledger's per-(room, node) sequence check.

use crate::ledger::StateDiff;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future returned by transport operations.
pub type TransportFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Diff publication failure.
#[derive(Debug, Clone, Error)]
#[error("cluster transport error: {message}")]
pub struct TransportError {
    /// Human-readable failure description.
    pub message: String,
}

impl TransportError {
    /// Create a transport error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outbound half of the internode diff exchange.
pub trait ClusterTransport: Send + Sync {
    /// Publish a diff to every peer node.
    fn publish(&self, diff: &StateDiff) -> TransportFuture<Result<(), TransportError>>;
}

/// Transport for single-node deployments: publishing is a no-op.
#[derive(Debug, Default, Clone)]
pub struct LoopbackTransport;

impl ClusterTransport for LoopbackTransport {
    fn publish(&self, _diff: &StateDiff) -> TransportFuture<Result<(), TransportError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Test transport that records every published diff.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    published: Arc<Mutex<Vec<StateDiff>>>,
}

impl RecordingTransport {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All diffs published so far, in publication order.
    pub fn published(&self) -> Vec<StateDiff> {
        self.published.lock().clone()
    }

    /// Number of published diffs.
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Whether nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

impl ClusterTransport for RecordingTransport {
    fn publish(&self, diff: &StateDiff) -> TransportFuture<Result<(), TransportError>> {
        let published = Arc::clone(&self.published);
        let diff = diff.clone();
        Box::pin(async move {
            published.lock().push(diff);
            Ok(())
        })
    }
}
