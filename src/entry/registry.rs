//! Connection registry.
//!
//! Node-local bookkeeping of active client connections. A connection is
//! owned by the protocol adapter that accepted it; the registry only holds
//! descriptive records so the entry point can route by connection id and
//! expose who is connected.

use crate::protocols::ConnectionId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Descriptive record of one client connection. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection identifier, unique on this node.
    pub id: ConnectionId,

    /// Name of the protocol adapter that owns the socket.
    pub protocol_name: String,

    /// Client IP chain, closest hop first.
    pub source_ips: Vec<String>,

    /// Opaque per-connection metadata (headers, client id).
    pub metadata: BTreeMap<String, String>,
}

impl Connection {
    /// Create a connection record.
    pub fn new(
        id: ConnectionId,
        protocol_name: impl Into<String>,
        source_ips: Vec<String>,
    ) -> Self {
        Self {
            id,
            protocol_name: protocol_name.into(),
            source_ips,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry at creation time.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Active connections on this node, keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Re-registering an id replaces the record.
    pub fn add(&mut self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    /// Deregister a connection, returning its record if it was known.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Look up a connection record.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// The protocol name owning a connection, if known.
    pub fn protocol_of(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id).map(|c| c.protocol_name.as_str())
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
