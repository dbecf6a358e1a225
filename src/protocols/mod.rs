//! Protocol adapters.
//!
//! Every wire protocol the gateway speaks is an implementation of
//! [`ProtocolAdapter`]: it owns its connections, tracks channel membership
//! locally, and handles per-connection delivery including backpressure. The
//! entry point only ever talks to the trait.
//!
//! Adapters never call back into the entry point directly; anything that
//! must reach it (a forced disconnect, for instance) travels over the event
//! channel carried in [`AdapterContext`].

pub mod channels;
pub mod internal;
pub mod mqtt;
pub mod websocket;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

pub use channels::ChannelRegistry;
pub use internal::InternalAdapter;
pub use mqtt::{BrokerCall, MqttAdapter, MqttBroker, MqttSettings, RecordingBroker};
pub use websocket::{FrameSink, WebSocketAdapter, WebSocketSettings};

/// Opaque identifier for one client connection on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Boxed future returned by adapter initialization.
pub type AdapterFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Events an adapter raises toward the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// The adapter forcibly closed a connection (backpressure overflow,
    /// protocol violation) and the registry must drop it.
    ForcedDisconnect {
        connection_id: ConnectionId,
        reason: String,
    },
}

/// Context handed to each adapter at initialization.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// This node's identifier, for logging.
    pub node_id: String,

    /// Upstream event channel toward the entry point.
    pub events: mpsc::UnboundedSender<AdapterEvent>,
}

impl AdapterContext {
    /// Create a context and the receiving half of its event channel.
    pub fn new(node_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<AdapterEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                node_id: node_id.into(),
                events,
            },
            rx,
        )
    }
}

/// Capability contract every wire protocol implements.
///
/// Delivery methods are synchronous and CPU-only: writes are handed to the
/// protocol's transport primitive (sink, broker) which buffers without
/// blocking. Only `init` may suspend, which is why it alone returns a
/// boxed future and runs under the entry point's startup timeout.
pub trait ProtocolAdapter: Send + Sync {
    /// Stable protocol name ("websocket", "mqtt", "internal").
    fn name(&self) -> &'static str;

    /// Bind to the transport.
    ///
    /// Returns `Ok(false)` when the protocol is disabled or unconfigured;
    /// it is then excluded from the active set, not a startup failure.
    fn init(&self, ctx: AdapterContext) -> AdapterFuture<anyhow::Result<bool>>;

    /// Associate a connection with a channel. No-op for unknown
    /// connections, since membership changes race with disconnection.
    fn join_channel(&self, channel: &str, connection_id: ConnectionId);

    /// Disassociate a connection from a channel. No-op when either side is
    /// unknown.
    fn leave_channel(&self, channel: &str, connection_id: ConnectionId);

    /// Deliver one payload to every member of any of `channels`.
    fn broadcast(&self, payload: &serde_json::Value, channels: &[String]);

    /// Deliver a payload to one connection, once per channel.
    fn notify(&self, connection_id: ConnectionId, payload: &serde_json::Value, channels: &[String]);

    /// Forcibly close a connection. Safe on an already-closed connection.
    fn disconnect(&self, connection_id: ConnectionId, reason: Option<&str>);
}

/// Serialize `payload` once per channel, tagged with a `room` field.
///
/// Broadcast fan-out constructs each frame once per channel and reuses it
/// across every recipient; nothing downstream may re-serialize per
/// connection. Unserializable payloads are logged and skipped.
pub fn channel_frames(
    payload: &serde_json::Value,
    channels: &[String],
) -> Vec<(String, Bytes)> {
    let mut frames = Vec::with_capacity(channels.len());
    for channel in channels {
        let mut tagged = payload.clone();
        match &mut tagged {
            serde_json::Value::Object(map) => {
                map.insert(
                    "room".to_string(),
                    serde_json::Value::String(channel.clone()),
                );
            }
            _ => {
                tracing::warn!(channel, "dropping non-object realtime payload");
                continue;
            }
        }
        match serde_json::to_vec(&tagged) {
            Ok(bytes) => frames.push((channel.clone(), Bytes::from(bytes))),
            Err(error) => {
                tracing::error!(channel, %error, "failed to serialize realtime frame");
            }
        }
    }
    frames
}

/// Tag `payload` with a `room` field without serializing, for in-process
/// delivery.
pub fn tag_room(payload: &serde_json::Value, channel: &str) -> serde_json::Value {
    let mut tagged = payload.clone();
    if let serde_json::Value::Object(map) = &mut tagged {
        map.insert(
            "room".to_string(),
            serde_json::Value::String(channel.to_string()),
        );
    }
    tagged
}
