//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: cache store → cluster sync → entry point (adapters)
//! - Shutdown order: entry point → cluster sync → cache store
//!
//! External collaborators (the core request funnel, the cluster transport,
//! an MQTT broker) are injected; tests run the full runtime against
//! in-memory doubles.

use crate::cluster::cache::{CacheStore, MemoryCacheStore};
use crate::cluster::sync::ClusterSync;
use crate::cluster::transport::{ClusterTransport, LoopbackTransport};
use crate::core::config::Config;
use crate::entry::{EntryPoint, LifecycleEvent, RequestFunnel};
use crate::ledger::{FullStateSnapshot, HistorySettings, StateDiff, SyncHistoryBuffer};
use crate::ledger::{DesyncError, MutationOutcome};
use crate::ops::observability::{metrics, HealthProbe, MetricsRegistry, ReadinessProbe};
use crate::protocols::{InternalAdapter, MqttAdapter, MqttBroker, WebSocketAdapter};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Shared cache store health.
    pub cache_store: ComponentHealth,
    /// Cluster sync and ledger health.
    pub cluster_sync: ComponentHealth,
    /// Entry point and adapter health.
    pub entry_point: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            cache_store: ComponentHealth::Starting,
            cluster_sync: ComponentHealth::Starting,
            entry_point: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.cache_store, self.cluster_sync, self.entry_point),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    ///
    /// A desynced ledger is degraded, not dead: the node keeps serving
    /// while it waits for resync.
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.cache_store, self.cluster_sync, self.entry_point),
            (ComponentHealth::Failed, _, _)
                | (_, ComponentHealth::Failed, _)
                | (_, _, ComponentHealth::Failed)
        )
    }
}

/// Roomcast runtime holding all component handles.
pub struct Runtime {
    config: Arc<Config>,
    metrics: Arc<MetricsRegistry>,
    readiness: Arc<ReadinessProbe>,
    health_probe: Arc<HealthProbe>,
    health: RuntimeHealth,

    funnel: Arc<dyn RequestFunnel>,
    cache: Arc<dyn CacheStore>,
    transport: Arc<dyn ClusterTransport>,
    mqtt_broker: Option<Arc<dyn MqttBroker>>,

    sync: Option<ClusterSync>,
    entry: Option<EntryPoint>,
    lifecycle: Option<mpsc::UnboundedReceiver<LifecycleEvent>>,

    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a runtime with the given configuration and request funnel.
    ///
    /// Defaults to an in-memory cache store and a loopback transport; real
    /// deployments inject cluster-backed implementations through the
    /// `with_*` builders.
    pub fn new(config: Config, funnel: Arc<dyn RequestFunnel>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(MetricsRegistry::new()),
            readiness: Arc::new(ReadinessProbe::new()),
            health_probe: Arc::new(HealthProbe::new()),
            health: RuntimeHealth::default(),
            funnel,
            cache: Arc::new(MemoryCacheStore::new()),
            transport: Arc::new(LoopbackTransport),
            mqtt_broker: None,
            sync: None,
            entry: None,
            lifecycle: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Use a cluster-backed cache store.
    pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Use a cluster transport for diff exchange.
    pub fn with_transport(mut self, transport: Arc<dyn ClusterTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Attach an MQTT broker; without one the MQTT listener stays off.
    pub fn with_mqtt_broker(mut self, broker: Arc<dyn MqttBroker>) -> Self {
        self.mqtt_broker = Some(broker);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Get the readiness probe.
    pub fn readiness(&self) -> &Arc<ReadinessProbe> {
        &self.readiness
    }

    /// Get the health probe.
    pub fn health_probe(&self) -> &Arc<HealthProbe> {
        &self.health_probe
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Get the entry point (once started).
    pub fn entry(&self) -> Option<&EntryPoint> {
        self.entry.as_ref()
    }

    /// Get the cluster sync handler (once started).
    pub fn sync(&self) -> Option<&ClusterSync> {
        self.sync.as_ref()
    }

    /// Mutable cluster sync access for local mutations.
    pub fn sync_mut(&mut self) -> Option<&mut ClusterSync> {
        self.sync.as_mut()
    }

    /// Take the connection lifecycle stream. The core consumes it to clean
    /// up ledger subscriptions for departed connections.
    pub fn take_lifecycle_events(&mut self) -> Option<mpsc::UnboundedReceiver<LifecycleEvent>> {
        self.lifecycle.take()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(node_id = %self.config.node.node_id, "starting roomcast runtime");

        self.init_cache_store().await?;
        self.init_cluster_sync().await?;
        self.init_entry_point().await?;

        self.running.store(true, Ordering::Release);
        self.readiness.set_ready(true);
        tracing::info!("roomcast runtime started");
        Ok(())
    }

    async fn init_cache_store(&mut self) -> Result<()> {
        tracing::debug!("initializing cache store");
        self.health.cache_store = ComponentHealth::Healthy;
        Ok(())
    }

    async fn init_cluster_sync(&mut self) -> Result<()> {
        tracing::debug!("initializing cluster sync");

        let node_id = self.config.node.node_id.clone();
        let mut history = SyncHistoryBuffer::new(node_id.clone(), Arc::clone(&self.cache));
        history.set_settings(HistorySettings {
            ttl: self.config.sync_history.ttl_ms.map(Duration::from_millis),
            max_entries: self.config.sync_history.max_entries,
        });
        history.start_config_poll();

        let mut sync = ClusterSync::new(node_id, history, Arc::clone(&self.transport));
        if sync.bootstrap_from_cache(&self.cache).await {
            tracing::info!(
                rooms = sync.state().room_count(),
                "ledger bootstrapped from cached snapshot"
            );
        }
        self.metrics
            .gauge_set(metrics::CLUSTER_ROOMS, sync.state().room_count() as u64);

        self.sync = Some(sync);
        self.health.cluster_sync = ComponentHealth::Healthy;
        tracing::info!("cluster sync initialized");
        Ok(())
    }

    async fn init_entry_point(&mut self) -> Result<()> {
        tracing::debug!("initializing entry point");

        let (mut entry, lifecycle) = EntryPoint::new(
            self.config.node.node_id.clone(),
            Arc::clone(&self.funnel),
            Arc::clone(&self.metrics),
        );

        entry.register_protocol(Arc::new(InternalAdapter::new()));
        entry.register_protocol(Arc::new(WebSocketAdapter::new(
            self.config.listeners.websocket.clone(),
            Arc::clone(&self.metrics),
        )));
        match &self.mqtt_broker {
            Some(broker) => {
                entry.register_protocol(Arc::new(MqttAdapter::new(
                    self.config.listeners.mqtt.clone(),
                    Arc::clone(broker),
                )));
            }
            None if self.config.listeners.mqtt.enabled => {
                tracing::warn!("mqtt listener enabled but no broker attached, skipping");
            }
            None => {}
        }

        entry
            .init_protocols(self.config.node.protocol_init_timeout(), &self.readiness)
            .await
            .context("protocol initialization failed")?;
        tracing::info!(protocols = ?entry.active_protocols(), "entry point initialized");

        self.entry = Some(entry);
        self.lifecycle = Some(lifecycle);
        self.health.entry_point = ComponentHealth::Healthy;
        Ok(())
    }

    /// Apply a diff received from the cluster transport.
    ///
    /// Stale diffs are silently ignored. A fatal desync marks the node
    /// degraded and not ready; it keeps serving its suspect ledger until
    /// [`Runtime::resync`].
    pub async fn handle_cluster_diff(
        &mut self,
        diff: &StateDiff,
    ) -> Result<MutationOutcome, DesyncError> {
        let sync = self.sync.as_mut().expect("runtime not started");
        let was_desynced = sync.is_desynced();
        let outcome = sync.apply_remote(diff).await;
        match &outcome {
            Ok(_) => {
                self.metrics
                    .gauge_set(metrics::CLUSTER_ROOMS, sync.state().room_count() as u64);
            }
            // Diffs refused while already desynced are not new desync events.
            Err(_) if was_desynced => {}
            Err(error) => {
                self.metrics.counter_inc(metrics::CLUSTER_DESYNC_TOTAL);
                self.readiness.set_desynced(true);
                self.readiness.set_ready(false);
                self.health_probe
                    .set_unhealthy(format!("ledger desync: {error}"));
                self.health.cluster_sync = ComponentHealth::Degraded;
            }
        }
        outcome
    }

    /// Replace the ledger with an authoritative snapshot and resume.
    pub fn resync(&mut self, snapshot: FullStateSnapshot) {
        let sync = self.sync.as_mut().expect("runtime not started");
        sync.resync(snapshot);
        self.metrics
            .gauge_set(metrics::CLUSTER_ROOMS, sync.state().room_count() as u64);
        self.readiness.set_desynced(false);
        self.readiness.set_ready(self.is_running());
        self.health_probe.set_healthy();
        self.health.cluster_sync = ComponentHealth::Healthy;
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components, in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping roomcast runtime");
        self.running.store(false, Ordering::Release);
        self.readiness.set_ready(false);
        let _ = self.shutdown_tx.send(true);

        self.stop_entry_point().await?;
        self.stop_cluster_sync().await?;
        self.health.cache_store = ComponentHealth::Stopped;

        tracing::info!("roomcast runtime stopped");
        Ok(())
    }

    async fn stop_entry_point(&mut self) -> Result<()> {
        tracing::debug!("stopping entry point");
        self.health.entry_point = ComponentHealth::Stopping;
        if let Some(entry) = &self.entry {
            entry.begin_shutdown();
            entry.drain_adapter_events();
        }
        self.health.entry_point = ComponentHealth::Stopped;
        Ok(())
    }

    async fn stop_cluster_sync(&mut self) -> Result<()> {
        tracing::debug!("stopping cluster sync");
        self.health.cluster_sync = ComponentHealth::Stopping;
        if let Some(sync) = &mut self.sync {
            sync.persist_snapshot(&self.cache).await;
            sync.history_mut().dispose();
        }
        self.health.cluster_sync = ComponentHealth::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EchoFunnel;
    use crate::ledger::NodeEntry;
    use serde_json::json;

    fn runtime() -> Runtime {
        Runtime::new(Config::default(), Arc::new(EchoFunnel)).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut runtime = runtime();
        runtime.start().await.unwrap();

        assert!(runtime.is_running());
        assert!(runtime.readiness().is_ready());
        assert!(runtime.health().is_ready());
        assert_eq!(
            runtime.entry().unwrap().active_protocols(),
            vec!["internal", "websocket"]
        );

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
        assert!(!runtime.readiness().is_ready());
        assert!(runtime.health().is_alive());
    }

    #[tokio::test]
    async fn test_desync_degrades_and_resync_recovers() {
        let mut runtime = runtime();
        runtime.start().await.unwrap();

        let stray = StateDiff::SubscriptionAdded {
            room_id: "ghost".into(),
            node_id: "n2".into(),
            sequence: 1,
        };
        assert!(runtime.handle_cluster_diff(&stray).await.is_err());
        assert!(!runtime.readiness().is_ready());
        assert!(runtime.readiness().status().desynced);
        assert!(!runtime.health_probe().is_healthy());
        assert_eq!(runtime.metrics().counter_get(metrics::CLUSTER_DESYNC_TOTAL), 1);
        // Degraded, not dead.
        assert!(runtime.health().is_alive());

        // Diffs refused while desynced do not inflate the event counter.
        assert!(runtime.handle_cluster_diff(&stray).await.is_err());
        assert_eq!(runtime.metrics().counter_get(metrics::CLUSTER_DESYNC_TOTAL), 1);

        runtime.resync(FullStateSnapshot::default());
        assert!(runtime.readiness().is_ready());
        assert!(runtime.health_probe().is_healthy());

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_room_gauge_tracks_remote_diffs() {
        let mut runtime = runtime();
        runtime.start().await.unwrap();

        let create = StateDiff::RoomCreated {
            room_id: "r1".into(),
            index: "i".into(),
            collection: "c".into(),
            filter_spec: json!({}),
            node: NodeEntry::new("n2", 1, 1),
        };
        runtime.handle_cluster_diff(&create).await.unwrap();
        assert_eq!(runtime.metrics().gauge_get(metrics::CLUSTER_ROOMS), 1);

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_config_seeded_history_ttl_survives_first_poll() {
        let config = Config::from_toml(
            r#"
            [sync_history]
            ttl_ms = 60000
            "#,
        )
        .unwrap();
        let mut runtime = Runtime::new(config, Arc::new(EchoFunnel)).unwrap();
        runtime.start().await.unwrap();

        // The poll's immediate first tick reads an empty cache; the value
        // seeded from the config file must stay in effect.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            runtime.sync().unwrap().history().settings().ttl,
            Some(Duration::from_secs(60))
        );

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());

        let mut first = Runtime::new(Config::default(), Arc::new(EchoFunnel))
            .unwrap()
            .with_cache_store(cache.clone());
        first.start().await.unwrap();
        first
            .sync_mut()
            .unwrap()
            .subscribe_local("r1", "i", "c", &json!({}))
            .await
            .unwrap();
        first.stop().await.unwrap();

        let mut second = Runtime::new(Config::default(), Arc::new(EchoFunnel))
            .unwrap()
            .with_cache_store(cache);
        second.start().await.unwrap();
        assert_eq!(second.sync().unwrap().state().count_subscriptions("r1"), 1);
        second.stop().await.unwrap();
    }
}
