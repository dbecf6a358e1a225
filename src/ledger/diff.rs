//! Cluster diff messages.
//!
//! Every full-state mutation travels between nodes as a [`StateDiff`].
//! Delivery is at-least-once and unordered; receivers rely on the ledger's
//! per-(room, node) sequence check to discard duplicates and reorderings,
//! so a diff carries everything needed to apply it in isolation.

use super::full_state::{DesyncError, FullState, MutationOutcome};
use super::room::NodeEntry;
use serde::{Deserialize, Serialize};

/// A single replicated ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateDiff {
    /// First subscriber on a node created (or joined) a room.
    RoomCreated {
        room_id: String,
        index: String,
        collection: String,
        filter_spec: serde_json::Value,
        node: NodeEntry,
    },

    /// A node's last subscriber left the room.
    RoomRemoved { room_id: String, node_id: String },

    /// A node gained one subscriber on an existing room entry.
    SubscriptionAdded {
        room_id: String,
        node_id: String,
        sequence: u64,
    },

    /// A node lost one subscriber on an existing room entry.
    SubscriptionRemoved {
        room_id: String,
        node_id: String,
        sequence: u64,
    },

    /// An auth strategy was registered or replaced.
    AuthStrategyAdded {
        name: String,
        definition: serde_json::Value,
    },

    /// An auth strategy was removed.
    AuthStrategyRemoved { name: String },

    /// A peer node was declared departed; purge all its entries.
    NodeEvicted { node_id: String },
}

impl StateDiff {
    /// The fixed set of topics that mutate full state.
    ///
    /// Only these are ever captured by the sync history buffer.
    pub const TOPICS: [&'static str; 7] = [
        "room:created",
        "room:removed",
        "subscription:added",
        "subscription:removed",
        "strategy:added",
        "strategy:removed",
        "node:evicted",
    ];

    /// Stable topic string for this diff.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "room:created",
            Self::RoomRemoved { .. } => "room:removed",
            Self::SubscriptionAdded { .. } => "subscription:added",
            Self::SubscriptionRemoved { .. } => "subscription:removed",
            Self::AuthStrategyAdded { .. } => "strategy:added",
            Self::AuthStrategyRemoved { .. } => "strategy:removed",
            Self::NodeEvicted { .. } => "node:evicted",
        }
    }

    /// Apply this diff to a ledger.
    pub fn apply(&self, state: &mut FullState) -> Result<MutationOutcome, DesyncError> {
        match self {
            Self::RoomCreated {
                room_id,
                index,
                collection,
                filter_spec,
                node,
            } => state.add_room(room_id, index, collection, filter_spec, node.clone()),
            Self::RoomRemoved { room_id, node_id } => Ok(state.remove_room(room_id, node_id)),
            Self::SubscriptionAdded {
                room_id,
                node_id,
                sequence,
            } => state.add_subscription(room_id, node_id, *sequence),
            Self::SubscriptionRemoved {
                room_id,
                node_id,
                sequence,
            } => state.remove_subscription(room_id, node_id, *sequence),
            Self::AuthStrategyAdded { name, definition } => {
                state.add_auth_strategy(name, definition.clone());
                Ok(MutationOutcome::Applied)
            }
            Self::AuthStrategyRemoved { name } => {
                state.remove_auth_strategy(name);
                Ok(MutationOutcome::Applied)
            }
            Self::NodeEvicted { node_id } => {
                state.remove_node(node_id);
                Ok(MutationOutcome::Applied)
            }
        }
    }
}
