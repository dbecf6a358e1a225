//! Combined HTTP and WebSocket adapter.
//!
//! Both protocols share one listening socket, so one adapter owns both
//! connection kinds. HTTP connections are request/response only and never
//! join channels; realtime delivery concerns only WebSocket connections.
//!
//! Backpressure policy: each socket has a bounded outbound byte threshold.
//! Below it, frames are written immediately. At or above it, frames are
//! queued in a per-socket FIFO up to a bounded entry count; exceeding that
//! count is not recoverable and the socket is forcibly closed with a
//! "connection too slow" reason. Memory per slow client stays bounded and
//! the failure mode is disconnection, never unbounded growth.

use super::channels::ChannelRegistry;
use super::{channel_frames, AdapterContext, AdapterEvent, AdapterFuture, ConnectionId, ProtocolAdapter};
use crate::ops::observability::{metrics, MetricsRegistry};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Outbound frame write failure reported by a sink.
#[derive(Debug, Clone, Error)]
#[error("frame sink error: {message}")]
pub struct SinkError {
    /// Human-readable failure description.
    pub message: String,
}

impl SinkError {
    /// Create a sink error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outbound half of one socket, provided by the listener glue.
///
/// `buffered_bytes` reports how much the transport itself has pending; the
/// adapter consults it before every write to decide direct write versus
/// queue. Implementations must be cheap to call.
pub trait FrameSink: Send + Sync {
    /// Bytes currently buffered inside the transport for this socket.
    fn buffered_bytes(&self) -> usize;

    /// Hand one frame to the transport.
    fn write(&self, frame: Bytes) -> Result<(), SinkError>;

    /// Close the socket, optionally with a reason visible to the client.
    fn close(&self, reason: Option<&str>);
}

/// WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebSocketSettings {
    /// Whether the listener activates at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Listen address for the combined HTTP/WebSocket socket.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Transport buffer level at which writes start queueing.
    #[serde(default = "default_backpressure_buffer_bytes")]
    pub backpressure_buffer_bytes: usize,

    /// Per-socket queued frame limit; exceeding it closes the socket.
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0:7512".to_string()
}

fn default_backpressure_buffer_bytes() -> usize {
    4096
}

fn default_max_queued_frames() -> usize {
    50
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind: default_bind(),
            backpressure_buffer_bytes: default_backpressure_buffer_bytes(),
            max_queued_frames: default_max_queued_frames(),
        }
    }
}

/// Wire kind of a connection on the shared listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Plain request/response; excluded from realtime delivery.
    Http,
    /// Upgraded socket eligible for channel membership.
    WebSocket,
}

struct WsConnection {
    sink: Arc<dyn FrameSink>,
    kind: ConnectionKind,
    queue: VecDeque<Bytes>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, WsConnection>,
    channels: ChannelRegistry,
    ctx: Option<AdapterContext>,
}

enum Delivery {
    Done,
    TooSlow,
}

/// The combined HTTP/WebSocket protocol adapter.
pub struct WebSocketAdapter {
    settings: WebSocketSettings,
    metrics: Arc<MetricsRegistry>,
    inner: Arc<Mutex<Inner>>,
}

impl WebSocketAdapter {
    /// Create the adapter. Listener binding happens in `init`.
    pub fn new(settings: WebSocketSettings, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            settings,
            metrics,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Register a freshly accepted socket. Called by the listener glue.
    pub fn register_connection(
        &self,
        connection_id: ConnectionId,
        kind: ConnectionKind,
        sink: Arc<dyn FrameSink>,
    ) {
        let mut inner = self.inner.lock();
        inner.connections.insert(
            connection_id,
            WsConnection {
                sink,
                kind,
                queue: VecDeque::new(),
            },
        );
    }

    /// Drain a socket's queue after the transport reported writability.
    pub fn on_writable(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        let Some(conn) = inner.connections.get_mut(&connection_id) else {
            return;
        };
        while !conn.queue.is_empty()
            && conn.sink.buffered_bytes() < self.settings.backpressure_buffer_bytes
        {
            let frame = conn.queue.pop_front().expect("checked non-empty");
            if let Err(error) = conn.sink.write(frame) {
                tracing::debug!(%connection_id, %error, "dropping connection on write failure");
                Self::force_close(&mut inner, connection_id, "write failure", true);
                return;
            }
        }
    }

    /// Number of frames currently queued for a connection. Test hook.
    pub fn queued_frames(&self, connection_id: ConnectionId) -> usize {
        self.inner
            .lock()
            .connections
            .get(&connection_id)
            .map_or(0, |c| c.queue.len())
    }

    fn deliver(&self, inner: &mut Inner, connection_id: ConnectionId, frame: Bytes) -> Delivery {
        let Some(conn) = inner.connections.get_mut(&connection_id) else {
            return Delivery::Done;
        };
        if conn.kind == ConnectionKind::Http {
            return Delivery::Done;
        }

        let direct = conn.queue.is_empty()
            && conn.sink.buffered_bytes() < self.settings.backpressure_buffer_bytes;
        if direct {
            if let Err(error) = conn.sink.write(frame) {
                tracing::debug!(%connection_id, %error, "dropping connection on write failure");
                Self::force_close(inner, connection_id, "write failure", true);
            }
            return Delivery::Done;
        }

        if conn.queue.len() >= self.settings.max_queued_frames {
            return Delivery::TooSlow;
        }
        conn.queue.push_back(frame);
        Delivery::Done
    }

    fn force_close(inner: &mut Inner, connection_id: ConnectionId, reason: &str, notify_entry: bool) {
        if let Some(conn) = inner.connections.remove(&connection_id) {
            conn.sink.close(Some(reason));
        }
        inner.channels.remove_connection(connection_id);
        if notify_entry {
            if let Some(ctx) = &inner.ctx {
                let _ = ctx.events.send(AdapterEvent::ForcedDisconnect {
                    connection_id,
                    reason: reason.to_string(),
                });
            }
        }
    }

    fn drop_too_slow(&self, inner: &mut Inner, connection_id: ConnectionId) {
        tracing::warn!(%connection_id, "closing websocket client: connection too slow");
        self.metrics.counter_inc(metrics::WS_SLOW_DISCONNECTS_TOTAL);
        Self::force_close(inner, connection_id, "connection too slow", true);
    }
}

impl ProtocolAdapter for WebSocketAdapter {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn init(&self, ctx: AdapterContext) -> AdapterFuture<anyhow::Result<bool>> {
        let inner = Arc::clone(&self.inner);
        let settings = self.settings.clone();
        Box::pin(async move {
            if !settings.enabled {
                return Ok(false);
            }
            inner.lock().ctx = Some(ctx);
            tracing::info!(bind = %settings.bind, "websocket listener active");
            Ok(true)
        })
    }

    fn join_channel(&self, channel: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        match inner.connections.get(&connection_id) {
            Some(conn) if conn.kind == ConnectionKind::WebSocket => {
                inner.channels.join(channel, connection_id);
            }
            Some(_) => {
                tracing::debug!(%connection_id, channel, "http connections cannot join channels");
            }
            None => {}
        }
    }

    fn leave_channel(&self, channel: &str, connection_id: ConnectionId) {
        self.inner.lock().channels.leave(channel, connection_id);
    }

    fn broadcast(&self, payload: &serde_json::Value, channels: &[String]) {
        let frames = channel_frames(payload, channels);
        let mut inner = self.inner.lock();
        let mut too_slow = Vec::new();
        for (channel, frame) in frames {
            let Some(members) = inner.channels.members(&channel) else {
                continue;
            };
            let members: Vec<ConnectionId> = members.iter().copied().collect();
            for connection_id in members {
                if let Delivery::TooSlow = self.deliver(&mut inner, connection_id, frame.clone()) {
                    too_slow.push(connection_id);
                }
            }
        }
        too_slow.sort_unstable();
        too_slow.dedup();
        for connection_id in too_slow {
            self.drop_too_slow(&mut inner, connection_id);
        }
    }

    fn notify(
        &self,
        connection_id: ConnectionId,
        payload: &serde_json::Value,
        channels: &[String],
    ) {
        let frames = channel_frames(payload, channels);
        let mut inner = self.inner.lock();
        for (_, frame) in frames {
            if let Delivery::TooSlow = self.deliver(&mut inner, connection_id, frame) {
                self.drop_too_slow(&mut inner, connection_id);
                return;
            }
        }
    }

    fn disconnect(&self, connection_id: ConnectionId, reason: Option<&str>) {
        let mut inner = self.inner.lock();
        Self::force_close(
            &mut inner,
            connection_id,
            reason.unwrap_or("disconnected"),
            false,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockSinkState {
        written: Mutex<Vec<Bytes>>,
        closed: Mutex<Option<String>>,
    }

    #[derive(Default)]
    struct MockSink {
        buffered: AtomicUsize,
        state: MockSinkState,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_buffered(&self, bytes: usize) {
            self.buffered.store(bytes, Ordering::SeqCst);
        }

        fn written(&self) -> usize {
            self.state.written.lock().len()
        }

        fn close_reason(&self) -> Option<String> {
            self.state.closed.lock().clone()
        }
    }

    impl FrameSink for MockSink {
        fn buffered_bytes(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }

        fn write(&self, frame: Bytes) -> Result<(), SinkError> {
            self.state.written.lock().push(frame);
            Ok(())
        }

        fn close(&self, reason: Option<&str>) {
            *self.state.closed.lock() = reason.map(str::to_string);
        }
    }

    fn small_queue_adapter(max_queued_frames: usize) -> WebSocketAdapter {
        WebSocketAdapter::new(
            WebSocketSettings {
                max_queued_frames,
                ..WebSocketSettings::default()
            },
            Arc::new(MetricsRegistry::new()),
        )
    }

    async fn inited(adapter: &WebSocketAdapter) -> tokio::sync::mpsc::UnboundedReceiver<AdapterEvent> {
        let (ctx, events) = AdapterContext::new("n1");
        assert!(adapter.init(ctx).await.unwrap());
        events
    }

    #[tokio::test]
    async fn test_direct_write_below_threshold() {
        let adapter = small_queue_adapter(5);
        inited(&adapter).await;
        let sink = MockSink::new();
        let c1 = ConnectionId(1);
        adapter.register_connection(c1, ConnectionKind::WebSocket, sink.clone());
        adapter.join_channel("ch", c1);

        adapter.broadcast(&json!({"hello": true}), &["ch".to_string()]);

        assert_eq!(sink.written(), 1);
        assert_eq!(adapter.queued_frames(c1), 0);
    }

    #[tokio::test]
    async fn test_frames_queue_under_backpressure_and_drain() {
        let adapter = small_queue_adapter(5);
        inited(&adapter).await;
        let sink = MockSink::new();
        let c1 = ConnectionId(1);
        adapter.register_connection(c1, ConnectionKind::WebSocket, sink.clone());
        adapter.join_channel("ch", c1);

        sink.set_buffered(usize::MAX);
        adapter.broadcast(&json!({"n": 1}), &["ch".to_string()]);
        adapter.broadcast(&json!({"n": 2}), &["ch".to_string()]);
        assert_eq!(sink.written(), 0);
        assert_eq!(adapter.queued_frames(c1), 2);

        sink.set_buffered(0);
        adapter.on_writable(c1);
        assert_eq!(sink.written(), 2);
        assert_eq!(adapter.queued_frames(c1), 0);
    }

    #[tokio::test]
    async fn test_queue_overflow_disconnects_only_the_slow_client() {
        let metrics = Arc::new(MetricsRegistry::new());
        let adapter = WebSocketAdapter::new(
            WebSocketSettings {
                max_queued_frames: 2,
                ..WebSocketSettings::default()
            },
            metrics.clone(),
        );
        let mut events = inited(&adapter).await;

        let slow = MockSink::new();
        let fast = MockSink::new();
        let c_slow = ConnectionId(1);
        let c_fast = ConnectionId(2);
        adapter.register_connection(c_slow, ConnectionKind::WebSocket, slow.clone());
        adapter.register_connection(c_fast, ConnectionKind::WebSocket, fast.clone());
        adapter.join_channel("ch", c_slow);
        adapter.join_channel("ch", c_fast);

        slow.set_buffered(usize::MAX);
        for n in 0..3 {
            adapter.broadcast(&json!({"n": n}), &["ch".to_string()]);
        }

        assert_eq!(slow.close_reason().as_deref(), Some("connection too slow"));
        assert_eq!(
            events.try_recv().unwrap(),
            AdapterEvent::ForcedDisconnect {
                connection_id: c_slow,
                reason: "connection too slow".to_string(),
            }
        );
        assert_eq!(metrics.counter_get(metrics::WS_SLOW_DISCONNECTS_TOTAL), 1);

        // The fast client received every frame untouched.
        assert_eq!(fast.written(), 3);
        assert!(fast.close_reason().is_none());

        // Delivery to the closed connection is now a no-op.
        adapter.broadcast(&json!({"n": 9}), &["ch".to_string()]);
        assert_eq!(fast.written(), 4);
        assert_eq!(adapter.queued_frames(c_slow), 0);
    }

    #[tokio::test]
    async fn test_http_connections_never_join_channels() {
        let adapter = small_queue_adapter(5);
        inited(&adapter).await;
        let sink = MockSink::new();
        let c1 = ConnectionId(1);
        adapter.register_connection(c1, ConnectionKind::Http, sink.clone());

        adapter.join_channel("ch", c1);
        adapter.broadcast(&json!({"n": 1}), &["ch".to_string()]);

        assert_eq!(sink.written(), 0);
    }

    #[tokio::test]
    async fn test_notify_tags_each_channel() {
        let adapter = small_queue_adapter(5);
        inited(&adapter).await;
        let sink = MockSink::new();
        let c1 = ConnectionId(1);
        adapter.register_connection(c1, ConnectionKind::WebSocket, sink.clone());

        adapter.notify(
            c1,
            &json!({"result": 1}),
            &["a".to_string(), "b".to_string()],
        );

        let written = sink.state.written.lock().clone();
        assert_eq!(written.len(), 2);
        let first: serde_json::Value = serde_json::from_slice(&written[0]).unwrap();
        assert_eq!(first["room"], "a");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let adapter = small_queue_adapter(5);
        let mut events = inited(&adapter).await;
        let sink = MockSink::new();
        let c1 = ConnectionId(1);
        adapter.register_connection(c1, ConnectionKind::WebSocket, sink.clone());

        adapter.disconnect(c1, Some("bye"));
        assert_eq!(sink.close_reason().as_deref(), Some("bye"));
        // Entry-initiated disconnects do not loop an event back.
        assert!(events.try_recv().is_err());

        adapter.disconnect(c1, None);
        adapter.disconnect(ConnectionId(99), None);
    }

    #[tokio::test]
    async fn test_disabled_listener_declines_activation() {
        let adapter = WebSocketAdapter::new(
            WebSocketSettings {
                enabled: false,
                ..WebSocketSettings::default()
            },
            Arc::new(MetricsRegistry::new()),
        );
        let (ctx, _events) = AdapterContext::new("n1");
        assert!(!adapter.init(ctx).await.unwrap());
    }
}
