//! Cluster full-state ledger.
//!
//! [`FullState`] is the node-local copy of the replicated room ledger:
//! which rooms exist, which nodes contribute subscribers to them, and which
//! auth strategies are registered. It is mutated only by applying diff
//! messages (locally produced or received from peers), and all mutation
//! calls return a tagged outcome instead of using errors for control flow:
//!
//! - `Ok(MutationOutcome::Applied)`: the mutation took effect.
//! - `Ok(MutationOutcome::Ignored(reason))`: expected no-op (stale or
//!   duplicate delivery, replay-safe idempotent removal). Never an error.
//! - `Err(DesyncError)`: the ledger has diverged from reality in a way it
//!   cannot locally repair. Fatal; the only recovery is a full resync via
//!   [`FullState::load_snapshot`] from an authoritative snapshot.
//!
//! Ledger mutations are synchronous and CPU-only. Within a node the event
//! loop applies them one at a time, so no locking is needed here; the only
//! concurrency hazard is across nodes, handled by the per-(room, node)
//! sequence staleness check.

use super::room::{NodeEntry, Room, RoomFilters};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Fatal consistency violation between the local ledger and the cluster.
///
/// Never retried and never locally recovered. Operational tooling matches
/// on this type to trigger an out-of-band full-state resynchronization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DesyncError {
    /// Two "create" events were applied for the same node on the same room,
    /// which is impossible under correct single-writer-per-node semantics.
    #[error("duplicate node entry for room {room_id} on node {node_id}")]
    DuplicateNodeEntry { room_id: String, node_id: String },

    /// A subscription mutation referenced a room this ledger never saw.
    #[error("room {room_id} not found in full state")]
    UnknownRoom { room_id: String },

    /// A subscription mutation referenced a node with no entry on the room.
    #[error("node {node_id} has no entry for room {room_id}")]
    UnknownNodeEntry { room_id: String, node_id: String },

    /// A decrement would take the subscriber count below zero.
    #[error("subscriber count underflow for room {room_id} on node {node_id}")]
    NegativeSubscriberCount { room_id: String, node_id: String },
}

/// Why a mutation was ignored rather than applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The mutation carried a sequence at or below the stored one: a
    /// duplicate or reordered delivery. Expected and frequent under
    /// network reordering.
    StaleSequence { stored: u64, received: u64 },

    /// Removal referenced a room or node entry that is already gone.
    /// Departure messages may race with room deletion; replay must be safe.
    AlreadyRemoved,
}

/// Tagged result of a ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The mutation took effect.
    Applied,
    /// Expected no-op; callers may log at debug level but never escalate.
    Ignored(IgnoreReason),
}

impl MutationOutcome {
    /// Whether the mutation took effect.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Serializable snapshot of the entire ledger at a point in time.
///
/// Used for peer bootstrap, post-desync resynchronization, and crash
/// diagnostics. `BTreeMap` keys make the serialized form deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FullStateSnapshot {
    /// Rooms keyed by room id.
    pub rooms: BTreeMap<String, Room>,
    /// Auth strategies keyed by name.
    pub auth_strategies: BTreeMap<String, serde_json::Value>,
}

/// Node-local copy of the cluster full-state ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullState {
    rooms: BTreeMap<String, Room>,
    auth_strategies: BTreeMap<String, serde_json::Value>,
}

impl FullState {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the room if absent, binding its identity permanently, and add
    /// the node entry.
    ///
    /// Fails with [`DesyncError::DuplicateNodeEntry`] if an entry already
    /// exists for that (room, node) pair.
    pub fn add_room(
        &mut self,
        room_id: &str,
        index: &str,
        collection: &str,
        filter_spec: &serde_json::Value,
        entry: NodeEntry,
    ) -> Result<MutationOutcome, DesyncError> {
        match self.rooms.get_mut(room_id) {
            Some(room) => {
                if room.nodes.contains_key(&entry.node_id) {
                    return Err(DesyncError::DuplicateNodeEntry {
                        room_id: room_id.to_string(),
                        node_id: entry.node_id,
                    });
                }
                room.nodes.insert(entry.node_id.clone(), entry);
            }
            None => {
                self.rooms.insert(
                    room_id.to_string(),
                    Room::new(room_id, index, collection, filter_spec.clone(), entry),
                );
            }
        }
        Ok(MutationOutcome::Applied)
    }

    /// Remove the node entry for `node_id`; delete the room if it becomes
    /// empty. Removing a non-existent room or entry is a silent no-op.
    pub fn remove_room(&mut self, room_id: &str, node_id: &str) -> MutationOutcome {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return MutationOutcome::Ignored(IgnoreReason::AlreadyRemoved);
        };
        if room.nodes.remove(node_id).is_none() {
            return MutationOutcome::Ignored(IgnoreReason::AlreadyRemoved);
        }
        if room.is_empty() {
            self.rooms.remove(room_id);
        }
        MutationOutcome::Applied
    }

    /// Record one more subscriber for `node_id` on `room_id`.
    ///
    /// Stale sequences are ignored; a missing room or node entry is a fatal
    /// desync, since a subscription can only follow a create on that node.
    pub fn add_subscription(
        &mut self,
        room_id: &str,
        node_id: &str,
        sequence: u64,
    ) -> Result<MutationOutcome, DesyncError> {
        let entry = self.node_entry_mut(room_id, node_id)?;
        if entry.is_stale(sequence) {
            return Ok(MutationOutcome::Ignored(IgnoreReason::StaleSequence {
                stored: entry.sequence,
                received: sequence,
            }));
        }
        entry.subscriber_count += 1;
        entry.accept_sequence(sequence);
        Ok(MutationOutcome::Applied)
    }

    /// Record one fewer subscriber for `node_id` on `room_id`.
    ///
    /// Same existence and staleness rules as [`FullState::add_subscription`];
    /// fails with [`DesyncError::NegativeSubscriberCount`] if the count
    /// would underflow.
    pub fn remove_subscription(
        &mut self,
        room_id: &str,
        node_id: &str,
        sequence: u64,
    ) -> Result<MutationOutcome, DesyncError> {
        let entry = self.node_entry_mut(room_id, node_id)?;
        if entry.is_stale(sequence) {
            return Ok(MutationOutcome::Ignored(IgnoreReason::StaleSequence {
                stored: entry.sequence,
                received: sequence,
            }));
        }
        if entry.subscriber_count == 0 {
            return Err(DesyncError::NegativeSubscriberCount {
                room_id: room_id.to_string(),
                node_id: node_id.to_string(),
            });
        }
        entry.subscriber_count -= 1;
        entry.accept_sequence(sequence);
        Ok(MutationOutcome::Applied)
    }

    /// Total subscriber count across all node entries for a room.
    ///
    /// Returns 0 for unknown rooms.
    pub fn count_subscriptions(&self, room_id: &str) -> u64 {
        self.rooms
            .get(room_id)
            .map(Room::total_subscribers)
            .unwrap_or(0)
    }

    /// Nested `index -> collection -> room_id -> total subscribers` mapping
    /// for introspection and administration tooling.
    pub fn list_rooms(&self) -> BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>> {
        let mut listing: BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>> =
            BTreeMap::new();
        for room in self.rooms.values() {
            listing
                .entry(room.index.clone())
                .or_default()
                .entry(room.collection.clone())
                .or_default()
                .insert(room.room_id.clone(), room.total_subscribers());
        }
        listing
    }

    /// The room's filter specification, id, and `index/collection` target.
    pub fn get_filters(&self, room_id: &str) -> Option<RoomFilters> {
        self.rooms.get(room_id).map(|room| RoomFilters {
            filter_spec: room.filter_spec.clone(),
            room_id: room.room_id.clone(),
            target: room.target(),
        })
    }

    /// Register or replace an auth strategy. Last writer wins.
    pub fn add_auth_strategy(&mut self, name: &str, definition: serde_json::Value) {
        self.auth_strategies.insert(name.to_string(), definition);
    }

    /// Remove an auth strategy. Removing an unknown name is a no-op.
    pub fn remove_auth_strategy(&mut self, name: &str) {
        self.auth_strategies.remove(name);
    }

    /// Look up an auth strategy definition.
    pub fn auth_strategy(&self, name: &str) -> Option<&serde_json::Value> {
        self.auth_strategies.get(name)
    }

    /// Names of all registered auth strategies.
    pub fn auth_strategy_names(&self) -> Vec<String> {
        self.auth_strategies.keys().cloned().collect()
    }

    /// Purge every node entry owned by `node_id` across all rooms, deleting
    /// rooms left empty. Used when a peer node is declared departed.
    pub fn remove_node(&mut self, node_id: &str) {
        self.rooms.retain(|_, room| {
            room.nodes.remove(node_id);
            !room.is_empty()
        });
    }

    /// Number of rooms currently in the ledger.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Look up a room by id.
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Deterministic snapshot of the whole ledger.
    pub fn snapshot(&self) -> FullStateSnapshot {
        FullStateSnapshot {
            rooms: self.rooms.clone(),
            auth_strategies: self.auth_strategies.clone(),
        }
    }

    /// Replace the entire ledger contents with a snapshot.
    ///
    /// Used for bootstrap and post-desync resync, never incremental merge.
    pub fn load_snapshot(&mut self, snapshot: FullStateSnapshot) {
        self.rooms = snapshot.rooms;
        self.auth_strategies = snapshot.auth_strategies;
    }

    fn node_entry_mut(
        &mut self,
        room_id: &str,
        node_id: &str,
    ) -> Result<&mut NodeEntry, DesyncError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| DesyncError::UnknownRoom {
                room_id: room_id.to_string(),
            })?;
        room.nodes
            .get_mut(node_id)
            .ok_or_else(|| DesyncError::UnknownNodeEntry {
                room_id: room_id.to_string(),
                node_id: node_id.to_string(),
            })
    }
}
