//! MQTT adapter.
//!
//! The broker wire machinery (session handling, QoS, retained messages) is
//! an external collaborator behind [`MqttBroker`]. This adapter owns the
//! request/response topic policy and maps channels onto broker topics,
//! using the broker's native multicast: a broadcast is one publish per
//! channel topic, never one per connection.
//!
//! Clients may only publish on the request topic and only subscribe to the
//! response topic; channel subscriptions are placed by the server on the
//! client's behalf. The listener glue enforces this through the
//! authorization hooks.

use super::channels::ChannelRegistry;
use super::{channel_frames, AdapterContext, AdapterFuture, ConnectionId, ProtocolAdapter};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// MQTT listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MqttSettings {
    /// Whether the listener activates at all. Off by default.
    #[serde(default)]
    pub enabled: bool,

    /// Topic clients publish requests on.
    #[serde(default = "default_request_topic")]
    pub request_topic: String,

    /// Topic clients subscribe to for responses.
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
}

fn default_request_topic() -> String {
    "roomcast/request".to_string()
}

fn default_response_topic() -> String {
    "roomcast/response".to_string()
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            request_topic: default_request_topic(),
            response_topic: default_response_topic(),
        }
    }
}

/// Broker operations the adapter relies on.
pub trait MqttBroker: Send + Sync {
    /// Publish to every subscriber of `topic`.
    fn publish(&self, topic: &str, payload: Bytes);

    /// Publish to one client only.
    fn publish_to(&self, connection_id: ConnectionId, topic: &str, payload: Bytes);

    /// Subscribe a client to a topic on the server's behalf.
    fn subscribe(&self, connection_id: ConnectionId, topic: &str);

    /// Remove a server-placed subscription.
    fn unsubscribe(&self, connection_id: ConnectionId, topic: &str);

    /// Drop a client session.
    fn disconnect(&self, connection_id: ConnectionId);
}

#[derive(Default)]
struct Inner {
    channels: ChannelRegistry,
}

/// The MQTT protocol adapter.
pub struct MqttAdapter {
    settings: MqttSettings,
    broker: Arc<dyn MqttBroker>,
    inner: Arc<Mutex<Inner>>,
}

impl MqttAdapter {
    /// Create the adapter around a broker handle.
    pub fn new(settings: MqttSettings, broker: Arc<dyn MqttBroker>) -> Self {
        Self {
            settings,
            broker,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Whether a client may publish on `topic`.
    pub fn allow_publish(&self, topic: &str) -> bool {
        topic == self.settings.request_topic
    }

    /// Whether a client may subscribe to `topic` itself.
    pub fn allow_subscribe(&self, topic: &str) -> bool {
        topic == self.settings.response_topic
    }

    /// The configured response topic, for the listener glue.
    pub fn response_topic(&self) -> &str {
        &self.settings.response_topic
    }
}

impl ProtocolAdapter for MqttAdapter {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn init(&self, _ctx: AdapterContext) -> AdapterFuture<anyhow::Result<bool>> {
        let settings = self.settings.clone();
        Box::pin(async move {
            if !settings.enabled {
                return Ok(false);
            }
            tracing::info!(
                request_topic = %settings.request_topic,
                response_topic = %settings.response_topic,
                "mqtt listener active"
            );
            Ok(true)
        })
    }

    fn join_channel(&self, channel: &str, connection_id: ConnectionId) {
        self.inner.lock().channels.join(channel, connection_id);
        self.broker.subscribe(connection_id, channel);
    }

    fn leave_channel(&self, channel: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        if !inner.channels.is_member(channel, connection_id) {
            return;
        }
        inner.channels.leave(channel, connection_id);
        self.broker.unsubscribe(connection_id, channel);
    }

    fn broadcast(&self, payload: &serde_json::Value, channels: &[String]) {
        for (channel, frame) in channel_frames(payload, channels) {
            self.broker.publish(&channel, frame);
        }
    }

    fn notify(
        &self,
        connection_id: ConnectionId,
        payload: &serde_json::Value,
        channels: &[String],
    ) {
        for (_, frame) in channel_frames(payload, channels) {
            self.broker
                .publish_to(connection_id, &self.settings.response_topic, frame);
        }
    }

    fn disconnect(&self, connection_id: ConnectionId, _reason: Option<&str>) {
        let vacated = self.inner.lock().channels.remove_connection(connection_id);
        for channel in vacated {
            self.broker.unsubscribe(connection_id, &channel);
        }
        self.broker.disconnect(connection_id);
    }
}

/// Broker double recording every call, for adapter tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingBroker {
    calls: Arc<Mutex<Vec<BrokerCall>>>,
}

/// One recorded broker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Publish { topic: String, payload: Bytes },
    PublishTo {
        connection_id: ConnectionId,
        topic: String,
        payload: Bytes,
    },
    Subscribe {
        connection_id: ConnectionId,
        topic: String,
    },
    Unsubscribe {
        connection_id: ConnectionId,
        topic: String,
    },
    Disconnect { connection_id: ConnectionId },
}

impl RecordingBroker {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every broker call so far, in order.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().clone()
    }
}

impl MqttBroker for RecordingBroker {
    fn publish(&self, topic: &str, payload: Bytes) {
        self.calls.lock().push(BrokerCall::Publish {
            topic: topic.to_string(),
            payload,
        });
    }

    fn publish_to(&self, connection_id: ConnectionId, topic: &str, payload: Bytes) {
        self.calls.lock().push(BrokerCall::PublishTo {
            connection_id,
            topic: topic.to_string(),
            payload,
        });
    }

    fn subscribe(&self, connection_id: ConnectionId, topic: &str) {
        self.calls.lock().push(BrokerCall::Subscribe {
            connection_id,
            topic: topic.to_string(),
        });
    }

    fn unsubscribe(&self, connection_id: ConnectionId, topic: &str) {
        self.calls.lock().push(BrokerCall::Unsubscribe {
            connection_id,
            topic: topic.to_string(),
        });
    }

    fn disconnect(&self, connection_id: ConnectionId) {
        self.calls.lock().push(BrokerCall::Disconnect { connection_id });
    }
}
