//! In-process adapter for plugin subscriptions.
//!
//! Plugins running inside the gateway subscribe to realtime rooms without a
//! socket: each session is an unbounded in-process channel carrying already
//! deserialized payloads. There is no listener to bind and no backpressure
//! policy; a plugin that stops draining its receiver only grows its own
//! queue.
//!
//! This adapter initializes before any externally-facing one so plugin code
//! running during startup can already subscribe.

use super::channels::ChannelRegistry;
use super::{tag_room, AdapterContext, AdapterFuture, ConnectionId, ProtocolAdapter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    sessions: HashMap<ConnectionId, mpsc::UnboundedSender<serde_json::Value>>,
    channels: ChannelRegistry,
}

/// The in-process protocol adapter.
#[derive(Default)]
pub struct InternalAdapter {
    inner: Arc<Mutex<Inner>>,
}

impl InternalAdapter {
    /// Create the adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a plugin session, returning its notification stream.
    pub fn open_session(
        &self,
        connection_id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().sessions.insert(connection_id, tx);
        rx
    }

    /// Number of open sessions. Test hook.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

impl ProtocolAdapter for InternalAdapter {
    fn name(&self) -> &'static str {
        "internal"
    }

    fn init(&self, _ctx: AdapterContext) -> AdapterFuture<anyhow::Result<bool>> {
        // Nothing to bind; always active.
        Box::pin(async { Ok(true) })
    }

    fn join_channel(&self, channel: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&connection_id) {
            inner.channels.join(channel, connection_id);
        }
    }

    fn leave_channel(&self, channel: &str, connection_id: ConnectionId) {
        self.inner.lock().channels.leave(channel, connection_id);
    }

    fn broadcast(&self, payload: &serde_json::Value, channels: &[String]) {
        let mut inner = self.inner.lock();
        let mut gone = Vec::new();
        for channel in channels {
            let Some(members) = inner.channels.members(channel) else {
                continue;
            };
            let tagged = tag_room(payload, channel);
            let members: Vec<ConnectionId> = members.iter().copied().collect();
            for connection_id in members {
                if let Some(session) = inner.sessions.get(&connection_id) {
                    if session.send(tagged.clone()).is_err() {
                        gone.push(connection_id);
                    }
                }
            }
        }
        // Sessions whose receiver was dropped are cleaned up lazily here.
        for connection_id in gone {
            inner.sessions.remove(&connection_id);
            inner.channels.remove_connection(connection_id);
        }
    }

    fn notify(
        &self,
        connection_id: ConnectionId,
        payload: &serde_json::Value,
        channels: &[String],
    ) {
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.get(&connection_id) else {
            return;
        };
        let mut dead = false;
        for channel in channels {
            if session.send(tag_room(payload, channel)).is_err() {
                dead = true;
                break;
            }
        }
        if dead {
            inner.sessions.remove(&connection_id);
            inner.channels.remove_connection(connection_id);
        }
    }

    fn disconnect(&self, connection_id: ConnectionId, _reason: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.sessions.remove(&connection_id);
        inner.channels.remove_connection(connection_id);
    }
}
