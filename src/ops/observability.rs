//! Metrics and health checks.
//!
//! Metric namespaces:
//! - roomcast.entry.*
//! - roomcast.websocket.*
//! - roomcast.cluster.*

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric names.
pub mod metrics {
    /// Inbound requests funneled through the entry point.
    pub const ENTRY_REQUESTS_TOTAL: &str = "roomcast.entry.requests_total";
    /// Requests rejected because the node was shutting down.
    pub const ENTRY_SHUTDOWN_REJECTS_TOTAL: &str = "roomcast.entry.shutdown_rejects_total";
    /// Active registered connections gauge.
    pub const ENTRY_ACTIVE_CONNECTIONS: &str = "roomcast.entry.active_connections";
    /// Broadcast events dispatched to adapters.
    pub const ENTRY_BROADCASTS_TOTAL: &str = "roomcast.entry.broadcasts_total";
    /// Notify events dispatched to adapters.
    pub const ENTRY_NOTIFIES_TOTAL: &str = "roomcast.entry.notifies_total";
    /// Slow websocket clients forcibly disconnected.
    pub const WS_SLOW_DISCONNECTS_TOTAL: &str =
        "roomcast.websocket.slow_client_disconnects_total";
    /// Fatal ledger desyncs observed.
    pub const CLUSTER_DESYNC_TOTAL: &str = "roomcast.cluster.desync_total";
    /// Rooms currently in the local ledger gauge.
    pub const CLUSTER_ROOMS: &str = "roomcast.cluster.rooms";
}

/// Counter and gauge registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicU64>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        let counters = self.counters.read();
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Current counter value; 0 for unknown counters.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge.
    pub fn gauge_set(&self, name: &str, value: u64) {
        let gauges = self.gauges.read();
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Current gauge value; 0 for unknown gauges.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Increment a gauge.
    pub fn gauge_inc(&self, name: &str) {
        let gauges = self.gauges.read();
        if let Some(gauge) = gauges.get(name) {
            gauge.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a gauge. Decrementing an unknown gauge is a no-op.
    pub fn gauge_dec(&self, name: &str) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Export all metrics in Prometheus exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in self.counters.read().iter() {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} counter\n{} {}\n",
                prometheus_name,
                prometheus_name,
                value.load(Ordering::Relaxed)
            ));
        }

        for (name, value) in self.gauges.read().iter() {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} gauge\n{} {}\n",
                prometheus_name,
                prometheus_name,
                value.load(Ordering::Relaxed)
            ));
        }

        output
    }
}

/// Health check result for /healthz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall healthy state.
    pub healthy: bool,
    /// Status message.
    pub message: String,
}

impl HealthStatus {
    /// Create a healthy status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
        }
    }

    /// Create an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// Readiness status for the /readyz endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessStatus {
    /// Overall ready state.
    pub ready: bool,
    /// Activation state per protocol adapter.
    pub protocols: BTreeMap<String, bool>,
    /// Whether the ledger is currently desynced and awaiting resync.
    pub desynced: bool,
}

/// Readiness probe handler.
#[derive(Debug, Default)]
pub struct ReadinessProbe {
    status: RwLock<ReadinessStatus>,
}

impl ReadinessProbe {
    /// Create a not-ready probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current readiness status.
    pub fn status(&self) -> ReadinessStatus {
        self.status.read().clone()
    }

    /// Mark overall readiness.
    pub fn set_ready(&self, ready: bool) {
        self.status.write().ready = ready;
    }

    /// Record a protocol's activation outcome.
    pub fn set_protocol_active(&self, name: &str, active: bool) {
        self.status.write().protocols.insert(name.to_string(), active);
    }

    /// Record the ledger desync flag.
    pub fn set_desynced(&self, desynced: bool) {
        self.status.write().desynced = desynced;
    }

    /// Whether the node is ready.
    pub fn is_ready(&self) -> bool {
        self.status.read().ready
    }
}

/// Health probe handler.
#[derive(Debug)]
pub struct HealthProbe {
    status: RwLock<HealthStatus>,
}

impl HealthProbe {
    /// Create a healthy probe.
    pub fn new() -> Self {
        Self {
            status: RwLock::new(HealthStatus::healthy()),
        }
    }

    /// Current health status.
    pub fn status(&self) -> HealthStatus {
        self.status.read().clone()
    }

    /// Mark as healthy.
    pub fn set_healthy(&self) {
        *self.status.write() = HealthStatus::healthy();
    }

    /// Mark as unhealthy.
    pub fn set_unhealthy(&self, message: impl Into<String>) {
        *self.status.write() = HealthStatus::unhealthy(message);
    }

    /// Whether the node is healthy.
    pub fn is_healthy(&self) -> bool {
        self.status.read().healthy
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}
