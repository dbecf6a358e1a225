//! End-to-end gateway tests: entry point wired to real protocol adapters.

mod common;

use roomcast::entry::{
    Connection, DispatchEvent, EchoFunnel, EntryPoint, LifecycleEvent, RequestEnvelope,
};
use roomcast::ops::observability::{metrics, MetricsRegistry, ReadinessProbe};
use roomcast::protocols::websocket::ConnectionKind;
use roomcast::protocols::{ConnectionId, InternalAdapter, WebSocketAdapter, WebSocketSettings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Gateway {
    entry: EntryPoint,
    lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    internal: Arc<InternalAdapter>,
    websocket: Arc<WebSocketAdapter>,
    metrics: Arc<MetricsRegistry>,
}

async fn gateway(max_queued_frames: usize) -> Gateway {
    let metrics = Arc::new(MetricsRegistry::new());
    let internal = Arc::new(InternalAdapter::new());
    let websocket = Arc::new(WebSocketAdapter::new(
        WebSocketSettings {
            max_queued_frames,
            ..WebSocketSettings::default()
        },
        Arc::clone(&metrics),
    ));

    let (mut entry, lifecycle) = EntryPoint::new("n1", Arc::new(EchoFunnel), Arc::clone(&metrics));
    entry.register_protocol(internal.clone());
    entry.register_protocol(websocket.clone());
    entry
        .init_protocols(Duration::from_secs(1), &ReadinessProbe::new())
        .await
        .expect("protocols initialize");

    Gateway {
        entry,
        lifecycle,
        internal,
        websocket,
        metrics,
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_protocol() {
    let gw = gateway(50).await;

    // One plugin session, one websocket client, both in the same room.
    let plugin = ConnectionId(1);
    let mut plugin_rx = gw.internal.open_session(plugin);
    gw.entry
        .new_connection(Connection::new(plugin, "internal", vec![]));
    gw.entry.join_channel("room-a", plugin);

    let client = ConnectionId(2);
    let sink = common::TestSink::new();
    gw.websocket
        .register_connection(client, ConnectionKind::WebSocket, sink.clone());
    gw.entry
        .new_connection(Connection::new(client, "websocket", vec!["10.0.0.9".into()]));
    gw.entry.join_channel("room-a", client);

    gw.entry.dispatch(DispatchEvent::Broadcast {
        payload: json!({"body": {"count": 3}}),
        channels: vec!["room-a".to_string()],
    });

    let in_process = plugin_rx.recv().await.unwrap();
    assert_eq!(in_process["room"], "room-a");
    assert_eq!(in_process["body"]["count"], 3);

    let frames = sink.written();
    assert_eq!(frames.len(), 1);
    let on_wire: serde_json::Value = serde_json::from_slice(&frames[0]).unwrap();
    assert_eq!(on_wire, in_process);

    assert_eq!(gw.metrics.counter_get(metrics::ENTRY_BROADCASTS_TOTAL), 1);
}

#[tokio::test]
async fn test_notify_goes_only_to_the_owning_adapter() {
    let mut gw = gateway(50).await;

    let plugin = ConnectionId(1);
    let mut plugin_rx = gw.internal.open_session(plugin);
    gw.entry
        .new_connection(Connection::new(plugin, "internal", vec![]));

    let client = ConnectionId(2);
    let sink = common::TestSink::new();
    gw.websocket
        .register_connection(client, ConnectionKind::WebSocket, sink.clone());
    gw.entry
        .new_connection(Connection::new(client, "websocket", vec![]));

    gw.entry.dispatch(DispatchEvent::Notify {
        connection_id: client,
        payload: json!({"result": "ok"}),
        channels: vec!["room-a".to_string()],
    });

    assert_eq!(sink.written().len(), 1);
    assert!(plugin_rx.try_recv().is_err());
    let _ = gw.lifecycle.try_recv();
}

#[tokio::test]
async fn test_slow_client_is_disconnected_end_to_end() {
    let mut gw = gateway(2).await;

    let slow = ConnectionId(1);
    let sink = common::TestSink::new();
    gw.websocket
        .register_connection(slow, ConnectionKind::WebSocket, sink.clone());
    gw.entry
        .new_connection(Connection::new(slow, "websocket", vec![]));
    gw.entry.join_channel("room-a", slow);
    assert_eq!(gw.entry.connection_count(), 1);
    let _ = gw.lifecycle.try_recv();

    // The transport never drains; the queue overflows on the third frame.
    sink.set_buffered(usize::MAX);
    for n in 0..3 {
        gw.entry.dispatch(DispatchEvent::Broadcast {
            payload: json!({"n": n}),
            channels: vec!["room-a".to_string()],
        });
    }
    assert_eq!(sink.close_reason().as_deref(), Some("connection too slow"));

    // The adapter's event reaches the entry point, which forgets the
    // connection and tells the core.
    gw.entry.drain_adapter_events();
    assert_eq!(gw.entry.connection_count(), 0);
    assert!(matches!(
        gw.lifecycle.try_recv().unwrap(),
        LifecycleEvent::ConnectionRemoved(_)
    ));
    assert_eq!(
        gw.metrics.counter_get(metrics::WS_SLOW_DISCONNECTS_TOTAL),
        1
    );
}

#[tokio::test]
async fn test_request_pipeline_and_shutdown_rejection() {
    let gw = gateway(50).await;
    let conn = Connection::new(ConnectionId(1), "websocket", vec![]);

    let response = gw
        .entry
        .execute(
            conn.clone(),
            RequestEnvelope::new("realtime", "subscribe", "req-1")
                .with_param("index", json!("idx")),
        )
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.request_id, "req-1");

    gw.entry.begin_shutdown();
    let rejected = gw
        .entry
        .execute(conn, RequestEnvelope::new("realtime", "subscribe", "req-2"))
        .await;
    assert_eq!(rejected.status, 503);
    assert_eq!(
        rejected.error.unwrap()["message"],
        "service is shutting down"
    );

    assert_eq!(gw.metrics.counter_get(metrics::ENTRY_REQUESTS_TOTAL), 2);
    assert_eq!(
        gw.metrics.counter_get(metrics::ENTRY_SHUTDOWN_REJECTS_TOTAL),
        1
    );
}

#[tokio::test]
async fn test_entry_disconnect_tears_down_adapter_state() {
    let mut gw = gateway(50).await;

    let client = ConnectionId(1);
    let sink = common::TestSink::new();
    gw.websocket
        .register_connection(client, ConnectionKind::WebSocket, sink.clone());
    gw.entry
        .new_connection(Connection::new(client, "websocket", vec![]));
    gw.entry.join_channel("room-a", client);
    let _ = gw.lifecycle.try_recv();

    gw.entry.disconnect(client, Some("kicked"));

    assert_eq!(sink.close_reason().as_deref(), Some("kicked"));
    assert_eq!(gw.entry.connection_count(), 0);

    // Later broadcasts no longer reach the closed socket.
    gw.entry.dispatch(DispatchEvent::Broadcast {
        payload: json!({}),
        channels: vec!["room-a".to_string()],
    });
    assert!(sink.written().is_empty());
}
