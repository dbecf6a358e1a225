//! Cluster state synchronization.
//!
//! [`ClusterSync`] owns this node's copy of the full-state ledger and the
//! sync history buffer, and speaks to peers through a [`ClusterTransport`].
//! Local subscription changes are applied to the local ledger and published
//! as diffs; inbound peer diffs are applied with history capture and desync
//! escalation.
//!
//! Desync is terminal for this component: once a fatal consistency error is
//! observed, the node keeps serving reads from its (suspect) ledger but
//! refuses further diff application until an external supervisor calls
//! [`ClusterSync::resync`] with an authoritative snapshot.

use super::cache::CacheStore;
use super::transport::ClusterTransport;
use crate::ledger::{
    DesyncError, FullState, FullStateSnapshot, MutationOutcome, NodeEntry, StateDiff,
    SyncHistoryBuffer,
};
use std::sync::Arc;

/// Cache key under which a node persists its full-state snapshot.
pub const FULL_STATE_KEY: &str = "cluster/full_state";

/// Node-local cluster synchronization state.
pub struct ClusterSync {
    node_id: String,
    state: FullState,
    history: SyncHistoryBuffer,
    transport: Arc<dyn ClusterTransport>,
    desync: Option<DesyncError>,
}

impl ClusterSync {
    /// Create a sync handler for this node.
    pub fn new(
        node_id: impl Into<String>,
        history: SyncHistoryBuffer,
        transport: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            state: FullState::new(),
            history,
            transport,
            desync: None,
        }
    }

    /// This node's identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Read access to the local ledger.
    pub fn state(&self) -> &FullState {
        &self.state
    }

    /// Read access to the history buffer.
    pub fn history(&self) -> &SyncHistoryBuffer {
        &self.history
    }

    /// The history buffer (for disposal and introspection).
    pub fn history_mut(&mut self) -> &mut SyncHistoryBuffer {
        &mut self.history
    }

    /// Whether a fatal desync has been observed and not yet resynced.
    pub fn is_desynced(&self) -> bool {
        self.desync.is_some()
    }

    /// The desync error currently blocking diff application, if any.
    pub fn desync(&self) -> Option<&DesyncError> {
        self.desync.as_ref()
    }

    /// Register a local subscriber on a room.
    ///
    /// The first local subscriber creates this node's entry (and the room,
    /// if no peer created it yet); later subscribers bump the count. The
    /// resulting diff is applied locally, published to peers, and returned.
    pub async fn subscribe_local(
        &mut self,
        room_id: &str,
        index: &str,
        collection: &str,
        filter_spec: &serde_json::Value,
    ) -> Result<StateDiff, DesyncError> {
        let diff = match self.local_entry(room_id) {
            Some(entry) => StateDiff::SubscriptionAdded {
                room_id: room_id.to_string(),
                node_id: self.node_id.clone(),
                sequence: entry.sequence + 1,
            },
            None => StateDiff::RoomCreated {
                room_id: room_id.to_string(),
                index: index.to_string(),
                collection: collection.to_string(),
                filter_spec: filter_spec.clone(),
                node: NodeEntry::new(self.node_id.clone(), 1, 1),
            },
        };
        diff.apply(&mut self.state)?;
        self.publish(&diff).await;
        Ok(diff)
    }

    /// Remove one local subscriber from a room.
    ///
    /// Returns `None` when this node has no entry on the room (an
    /// unsubscribe racing with cleanup); the last local subscriber removes
    /// this node's entry entirely.
    pub async fn unsubscribe_local(
        &mut self,
        room_id: &str,
    ) -> Result<Option<StateDiff>, DesyncError> {
        let Some(entry) = self.local_entry(room_id) else {
            return Ok(None);
        };
        let diff = if entry.subscriber_count <= 1 {
            StateDiff::RoomRemoved {
                room_id: room_id.to_string(),
                node_id: self.node_id.clone(),
            }
        } else {
            StateDiff::SubscriptionRemoved {
                room_id: room_id.to_string(),
                node_id: self.node_id.clone(),
                sequence: entry.sequence + 1,
            }
        };
        diff.apply(&mut self.state)?;
        self.publish(&diff).await;
        Ok(Some(diff))
    }

    /// Register or replace an auth strategy and replicate the change.
    pub async fn register_auth_strategy(&mut self, name: &str, definition: serde_json::Value) {
        let diff = StateDiff::AuthStrategyAdded {
            name: name.to_string(),
            definition,
        };
        // Strategy upserts are infallible on the ledger.
        let _ = diff.apply(&mut self.state);
        self.publish(&diff).await;
    }

    /// Remove an auth strategy and replicate the change.
    pub async fn unregister_auth_strategy(&mut self, name: &str) {
        let diff = StateDiff::AuthStrategyRemoved {
            name: name.to_string(),
        };
        let _ = diff.apply(&mut self.state);
        self.publish(&diff).await;
    }

    /// Declare a peer node departed: purge its entries and tell the others.
    pub async fn evict_node(&mut self, node_id: &str) {
        tracing::info!(node_id, "evicting departed node from full state");
        let diff = StateDiff::NodeEvicted {
            node_id: node_id.to_string(),
        };
        let _ = diff.apply(&mut self.state);
        self.publish(&diff).await;
    }

    /// Apply a diff received from a peer.
    ///
    /// Stale and duplicate deliveries are silently ignored. A fatal
    /// consistency error freezes diff application, persists the history
    /// buffer for post-mortem analysis, and is returned for the supervisor
    /// to trigger a resync.
    pub async fn apply_remote(
        &mut self,
        diff: &StateDiff,
    ) -> Result<MutationOutcome, DesyncError> {
        if let Some(error) = &self.desync {
            return Err(error.clone());
        }

        let topic = diff.topic();
        if self.history.enabled(topic) {
            let message = serde_json::to_value(diff).unwrap_or(serde_json::Value::Null);
            let snapshot = self.state.snapshot();
            self.history.push(topic, message, snapshot);
        }

        match diff.apply(&mut self.state) {
            Ok(MutationOutcome::Applied) => Ok(MutationOutcome::Applied),
            Ok(MutationOutcome::Ignored(reason)) => {
                tracing::debug!(topic, ?reason, "ignored stale cluster diff");
                Ok(MutationOutcome::Ignored(reason))
            }
            Err(error) => {
                tracing::error!(topic, %error, "full state desync detected");
                self.history.save().await;
                self.desync = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Replace the ledger with an authoritative snapshot and resume.
    pub fn resync(&mut self, snapshot: FullStateSnapshot) {
        self.state.load_snapshot(snapshot);
        self.desync = None;
        tracing::info!(node_id = %self.node_id, "full state resynchronized");
    }

    /// Persist the current ledger snapshot to the shared cache store.
    pub async fn persist_snapshot(&self, cache: &Arc<dyn CacheStore>) {
        let snapshot = self.state.snapshot();
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, "failed to serialize full state snapshot");
                return;
            }
        };
        if let Err(error) = cache.store(FULL_STATE_KEY, payload, None).await {
            tracing::warn!(%error, "failed to persist full state snapshot");
        }
    }

    /// Bootstrap the ledger from a snapshot persisted in the cache store.
    ///
    /// Returns whether a snapshot was found and loaded.
    pub async fn bootstrap_from_cache(&mut self, cache: &Arc<dyn CacheStore>) -> bool {
        let Some(raw) = cache.get(FULL_STATE_KEY).await else {
            return false;
        };
        match serde_json::from_str::<FullStateSnapshot>(&raw) {
            Ok(snapshot) => {
                self.resync(snapshot);
                true
            }
            Err(error) => {
                tracing::warn!(%error, "discarding unparsable full state snapshot");
                false
            }
        }
    }

    fn local_entry(&self, room_id: &str) -> Option<&NodeEntry> {
        self.state
            .room(room_id)
            .and_then(|room| room.nodes.get(self.node_id.as_str()))
    }

    async fn publish(&self, diff: &StateDiff) {
        if let Err(error) = self.transport.publish(diff).await {
            // Delivery is at-least-once on the transport's side; a publish
            // failure here means peers will reconcile via resync instead.
            tracing::warn!(topic = diff.topic(), %error, "failed to publish cluster diff");
        }
    }
}
