//! Room and node-entry data model.
//!
//! A room is a realtime subscription topic bound to an index/collection pair
//! and an opaque filter specification. Each cluster node that has local
//! subscribers on a room contributes one [`NodeEntry`] recording its
//! subscriber count and the last sequence number accepted for that
//! (room, node) pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cluster node's contribution record to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Owning node identifier.
    pub node_id: String,

    /// Last accepted sequence number for this (room, node) pair.
    ///
    /// Sequence numbers are produced independently per node; a mutation
    /// carrying a sequence at or below this value is a duplicate or a
    /// reordered delivery and is ignored.
    pub sequence: u64,

    /// Number of local subscribers this node contributes to the room.
    pub subscriber_count: u64,
}

impl NodeEntry {
    /// Create a node entry for a first subscriber.
    pub fn new(node_id: impl Into<String>, sequence: u64, subscriber_count: u64) -> Self {
        Self {
            node_id: node_id.into(),
            sequence,
            subscriber_count,
        }
    }

    /// Check whether `sequence` is stale relative to this entry.
    pub fn is_stale(&self, sequence: u64) -> bool {
        sequence <= self.sequence
    }

    /// Accept a newer sequence number.
    ///
    /// Callers must have checked staleness first; the stored value only
    /// ever increases.
    pub fn accept_sequence(&mut self, sequence: u64) {
        debug_assert!(sequence > self.sequence);
        self.sequence = sequence;
    }
}

/// A realtime room in the cluster ledger.
///
/// A room exists in the ledger iff `nodes` is non-empty; removing the last
/// node entry deletes the room. The `index`, `collection`, and `filter_spec`
/// identity is bound at first creation and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Opaque room identifier.
    pub room_id: String,

    /// Index this room's filters apply to.
    pub index: String,

    /// Collection this room's filters apply to.
    pub collection: String,

    /// Opaque serialized filter specification.
    pub filter_spec: serde_json::Value,

    /// Per-node contribution records, keyed by node id.
    pub nodes: BTreeMap<String, NodeEntry>,
}

impl Room {
    /// Create a room with a single node entry.
    pub fn new(
        room_id: impl Into<String>,
        index: impl Into<String>,
        collection: impl Into<String>,
        filter_spec: serde_json::Value,
        entry: NodeEntry,
    ) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(entry.node_id.clone(), entry);
        Self {
            room_id: room_id.into(),
            index: index.into(),
            collection: collection.into(),
            filter_spec,
            nodes,
        }
    }

    /// Total subscriber count across all node entries.
    pub fn total_subscribers(&self) -> u64 {
        self.nodes.values().map(|e| e.subscriber_count).sum()
    }

    /// Whether no node contributes to this room anymore.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The `index/collection` target string used by introspection.
    pub fn target(&self) -> String {
        format!("{}/{}", self.index, self.collection)
    }
}

/// Filter lookup result for a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomFilters {
    /// Opaque serialized filter specification.
    pub filter_spec: serde_json::Value,

    /// Room identifier.
    pub room_id: String,

    /// `index/collection` target string.
    pub target: String,
}
