//! Cluster collaboration layer.
//!
//! Ties the ledger to the rest of the cluster: a [`CacheStore`] for shared
//! configuration and snapshots, a [`ClusterTransport`] for diff exchange,
//! and [`ClusterSync`] orchestrating local mutations, remote application,
//! and desync escalation.

pub mod cache;
pub mod sync;
pub mod transport;

pub use cache::{CacheError, CacheFuture, CacheStore, FailingCacheStore, MemoryCacheStore};
pub use sync::{ClusterSync, FULL_STATE_KEY};
pub use transport::{ClusterTransport, LoopbackTransport, RecordingTransport, TransportError, TransportFuture};
