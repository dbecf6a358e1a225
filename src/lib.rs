//! Roomcast - realtime fan-out gateway with a cluster-replicated room ledger.
//!
//! Roomcast is the connection-facing layer of a realtime backend: it accepts
//! clients over multiple protocols, funnels their requests into a single
//! normalized pipeline, and fans realtime notifications back out to room
//! subscribers. Every node keeps a full copy of the cluster's room ledger,
//! kept consistent by exchanging sequence-numbered state diffs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Client Protocols                         │
//! │    HTTP + WebSocket    │    MQTT broker    │    in-process      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Entry Point                            │
//! │   (connection registry, request funnel, broadcast dispatch)     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Room Ledger                            │
//! │     full state │ per-node sequences │ sync history buffer       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Cluster Plumbing                         │
//! │            diff transport │ shared cache store                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Main runtime orchestration
//! - [`core::error`] - Error taxonomy
//!
//! ## Ledger
//! - [`ledger::full_state`] - Full-state room ledger
//! - [`ledger::room`] - Rooms and per-node sequence entries
//! - [`ledger::diff`] - Sequence-numbered state diffs
//! - [`ledger::history`] - Sync history forensic buffer
//!
//! ## Cluster
//! - [`cluster::sync`] - Diff application and desync handling
//! - [`cluster::transport`] - Diff exchange seam
//! - [`cluster::cache`] - Shared cache store seam
//!
//! ## Protocols
//! - [`protocols::websocket`] - Combined HTTP/WebSocket adapter
//! - [`protocols::mqtt`] - MQTT adapter
//! - [`protocols::internal`] - In-process adapter
//! - [`protocols::channels`] - Channel membership registry
//!
//! ## Entry Point
//! - [`entry::registry`] - Connection registry
//! - [`entry::request`] - Request/response envelopes and the funnel seam
//!
//! ## Operations
//! - [`ops::observability`] - Metrics and health checks
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - A remote diff whose sequence does not exceed the stored one is stale
//!   and silently ignored; all other inconsistencies are fatal desyncs.
//! - A desynced node refuses further diffs until an authoritative
//!   full-state snapshot resyncs it.
//! - Notification payloads are serialized once per channel, never once per
//!   connection.
//! - Every executed request produces exactly one access log line.

// Core infrastructure
pub mod core;

// Room ledger and sync history
pub mod ledger;

// Cluster plumbing
pub mod cluster;

// Protocol adapters
pub mod protocols;

// Entry point
pub mod entry;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use ops::observability;
