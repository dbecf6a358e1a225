//! Entry point.
//!
//! The entry point owns the active protocol adapters, demultiplexes inbound
//! requests to the core funnel, and fans outbound realtime events out to
//! the right adapter. It is the only component that knows which adapter
//! owns which connection.

pub mod registry;
pub mod request;

pub use registry::{Connection, ConnectionRegistry};
pub use request::{EchoFunnel, FunnelFuture, RequestEnvelope, RequestFunnel, ResponseEnvelope};

use crate::ops::observability::{metrics, MetricsRegistry, ReadinessProbe};
use crate::protocols::{AdapterContext, AdapterEvent, ConnectionId, ProtocolAdapter};
use anyhow::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outbound realtime event from the core.
///
/// The variants are closed on purpose: a core event with no variant here is
/// a compile error, not a runtime dispatch failure.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Deliver to every member of the channels, on every adapter.
    Broadcast {
        payload: serde_json::Value,
        channels: Vec<String>,
    },
    /// Deliver to one connection through its owning adapter.
    Notify {
        connection_id: ConnectionId,
        payload: serde_json::Value,
        channels: Vec<String>,
    },
}

/// Connection lifecycle events consumed by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A connection was registered.
    ConnectionCreated(Connection),
    /// A connection was removed; the core must clean up its subscriptions.
    ConnectionRemoved(Connection),
}

/// Owns the adapters and routes traffic between them and the core.
pub struct EntryPoint {
    node_id: String,
    funnel: Arc<dyn RequestFunnel>,
    metrics: Arc<MetricsRegistry>,
    pending: Vec<Arc<dyn ProtocolAdapter>>,
    active: HashMap<&'static str, Arc<dyn ProtocolAdapter>>,
    registry: Mutex<ConnectionRegistry>,
    lifecycle: mpsc::UnboundedSender<LifecycleEvent>,
    adapter_events: Mutex<Option<mpsc::UnboundedReceiver<AdapterEvent>>>,
    shutting_down: AtomicBool,
}

impl EntryPoint {
    /// Create an entry point and the lifecycle event stream the core
    /// consumes.
    pub fn new(
        node_id: impl Into<String>,
        funnel: Arc<dyn RequestFunnel>,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (lifecycle, rx) = mpsc::unbounded_channel();
        (
            Self {
                node_id: node_id.into(),
                funnel,
                metrics,
                pending: Vec::new(),
                active: HashMap::new(),
                registry: Mutex::new(ConnectionRegistry::new()),
                lifecycle,
                adapter_events: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Queue an adapter for initialization.
    pub fn register_protocol(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        self.pending.push(adapter);
    }

    /// Initialize every registered adapter.
    ///
    /// The internal adapter goes first so plugin code running during core
    /// startup can already subscribe; externally-facing adapters follow,
    /// each under `init_timeout`. A timeout is a fatal startup error naming
    /// the protocol. An adapter that declines activation (`Ok(false)`) is
    /// excluded from the active set, not an error.
    pub async fn init_protocols(
        &mut self,
        init_timeout: Duration,
        probe: &ReadinessProbe,
    ) -> anyhow::Result<()> {
        let (ctx, events) = AdapterContext::new(self.node_id.clone());
        *self.adapter_events.lock() = Some(events);

        let mut queue = std::mem::take(&mut self.pending);
        queue.sort_by_key(|a| (a.name() != "internal", a.name()));

        for adapter in queue {
            let name = adapter.name();
            let activated = if name == "internal" {
                adapter.init(ctx.clone()).await
            } else {
                tokio::time::timeout(init_timeout, adapter.init(ctx.clone()))
                    .await
                    .with_context(|| format!("protocol {name} timed out during initialization"))?
            }
            .with_context(|| format!("protocol {name} failed to initialize"))?;

            probe.set_protocol_active(name, activated);
            if activated {
                self.active.insert(name, adapter);
            } else {
                tracing::info!(protocol = name, "protocol inactive, excluded from active set");
            }
        }
        Ok(())
    }

    /// Names of the adapters that activated.
    pub fn active_protocols(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.active.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Refuse new requests from now on.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether the node is refusing new requests.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Register a connection and tell the core about it.
    pub fn new_connection(&self, connection: Connection) {
        tracing::debug!(
            connection_id = %connection.id,
            protocol = %connection.protocol_name,
            "connection registered"
        );
        self.registry.lock().add(connection.clone());
        self.metrics.gauge_inc(metrics::ENTRY_ACTIVE_CONNECTIONS);
        let _ = self
            .lifecycle
            .send(LifecycleEvent::ConnectionCreated(connection));
    }

    /// Deregister a connection and tell the core to clean up after it.
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        let Some(connection) = self.registry.lock().remove(connection_id) else {
            return;
        };
        self.metrics.gauge_dec(metrics::ENTRY_ACTIVE_CONNECTIONS);
        let _ = self
            .lifecycle
            .send(LifecycleEvent::ConnectionRemoved(connection));
    }

    /// Route an outbound realtime event to the adapters.
    pub fn dispatch(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::Broadcast { payload, channels } => {
                self.metrics.counter_inc(metrics::ENTRY_BROADCASTS_TOTAL);
                for adapter in self.active.values() {
                    adapter.broadcast(&payload, &channels);
                }
            }
            DispatchEvent::Notify {
                connection_id,
                payload,
                channels,
            } => {
                self.metrics.counter_inc(metrics::ENTRY_NOTIFIES_TOTAL);
                if let Some(adapter) = self.adapter_of(connection_id) {
                    adapter.notify(connection_id, &payload, &channels);
                }
            }
        }
    }

    /// Subscribe a connection to a channel on its owning adapter.
    ///
    /// Failures stay local to this connection: an unknown connection is
    /// logged and swallowed so one client's race with disconnection never
    /// affects others.
    pub fn join_channel(&self, channel: &str, connection_id: ConnectionId) {
        match self.adapter_of(connection_id) {
            Some(adapter) => adapter.join_channel(channel, connection_id),
            None => {
                tracing::debug!(%connection_id, channel, "join for unknown connection ignored");
            }
        }
    }

    /// Remove a connection from a channel on its owning adapter.
    pub fn leave_channel(&self, channel: &str, connection_id: ConnectionId) {
        match self.adapter_of(connection_id) {
            Some(adapter) => adapter.leave_channel(channel, connection_id),
            None => {
                tracing::debug!(%connection_id, channel, "leave for unknown connection ignored");
            }
        }
    }

    /// Forcibly close a connection through its owning adapter.
    pub fn disconnect(&self, connection_id: ConnectionId, reason: Option<&str>) {
        if let Some(adapter) = self.adapter_of(connection_id) {
            adapter.disconnect(connection_id, reason);
        }
        self.remove_connection(connection_id);
    }

    /// Funnel one inbound request to the core.
    ///
    /// While shutting down, responds immediately with a 503 envelope
    /// instead of funneling. Every request is access-logged exactly once,
    /// success or failure alike.
    pub async fn execute(
        &self,
        connection: Connection,
        request: RequestEnvelope,
    ) -> ResponseEnvelope {
        let controller = request.controller.clone();
        let action = request.action.clone();
        let connection_id = connection.id;

        let response = if self.is_shutting_down() {
            self.metrics
                .counter_inc(metrics::ENTRY_SHUTDOWN_REJECTS_TOTAL);
            ResponseEnvelope::shutting_down(request.request_id.clone())
        } else {
            self.funnel.execute(connection, request).await
        };

        self.metrics.counter_inc(metrics::ENTRY_REQUESTS_TOTAL);
        tracing::info!(
            target: "access",
            %connection_id,
            controller = %controller,
            action = %action,
            status = response.status,
            "request"
        );
        response
    }

    /// Apply one adapter-raised event.
    pub fn handle_adapter_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::ForcedDisconnect {
                connection_id,
                reason,
            } => {
                tracing::debug!(%connection_id, reason, "adapter forced a disconnect");
                self.remove_connection(connection_id);
            }
        }
    }

    /// Apply every adapter event raised since the last drain.
    pub fn drain_adapter_events(&self) {
        let mut guard = self.adapter_events.lock();
        let Some(events) = guard.as_mut() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            self.handle_adapter_event(event);
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    fn adapter_of(&self, connection_id: ConnectionId) -> Option<&Arc<dyn ProtocolAdapter>> {
        let registry = self.registry.lock();
        let protocol = registry.protocol_of(connection_id)?;
        self.active.get(protocol)
    }
}
