//! Error taxonomy.
//!
//! Errors fall into four behavioral classes, and tooling must be able to
//! tell them apart mechanically:
//! - fatal consistency errors ([`DesyncError`]): never retried, resolved
//!   only by an external full-state resync;
//! - transient I/O errors (cache store, cluster transport): logged, the
//!   operation degrades;
//! - per-connection errors: isolated to the offending connection;
//! - startup errors: fatal to process startup.
//!
//! Clients never see any of these types; they only ever see response
//! envelopes, built from [`RoomcastError::status_code`].

use crate::cluster::cache::CacheError;
use crate::cluster::transport::TransportError;
use crate::ledger::DesyncError;
use crate::protocols::ConnectionId;
use thiserror::Error;

/// Common Roomcast error conditions.
#[derive(Debug, Error)]
pub enum RoomcastError {
    /// The local ledger diverged from the cluster.
    #[error(transparent)]
    Desync(#[from] DesyncError),

    /// Diff publication toward peers failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Shared cache store operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An error isolated to one client connection.
    #[error("connection {connection_id}: {message}")]
    Connection {
        connection_id: ConnectionId,
        message: String,
    },

    /// A protocol adapter failed outside of startup.
    #[error("protocol {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    /// The process cannot come up.
    #[error("startup failed: {message}")]
    Startup { message: String },
}

impl RoomcastError {
    /// Per-connection error constructor.
    pub fn connection(connection_id: ConnectionId, message: impl Into<String>) -> Self {
        Self::Connection {
            connection_id,
            message: message.into(),
        }
    }

    /// Protocol error constructor.
    pub fn protocol(protocol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            protocol: protocol.into(),
            message: message.into(),
        }
    }

    /// Startup error constructor.
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Whether this error must trigger an external full-state resync.
    pub fn is_desync(&self) -> bool {
        matches!(self, Self::Desync(_))
    }

    /// Whether the process must not continue serving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Desync(_) | Self::Startup { .. })
    }

    /// HTTP-style status carried on the response envelope when this error
    /// surfaces to a client. Internal classes map to a generic 500; their
    /// details stay in the logs.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Connection { .. } => 400,
            Self::Protocol { .. } => 502,
            Self::Desync(_) | Self::Transport(_) | Self::Cache(_) | Self::Startup { .. } => 500,
        }
    }
}

/// Result type using RoomcastError.
pub type RoomcastResult<T> = Result<T, RoomcastError>;
