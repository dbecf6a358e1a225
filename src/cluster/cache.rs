//! Shared cache store interface.
//!
//! The cache store is an external collaborator (a cluster-shared key/value
//! cache) consumed by the sync history buffer and by ledger bootstrap. The
//! trait is deliberately narrow: `get`, `store` with an optional TTL, and
//! `del`. Methods return boxed futures so implementations backed by a
//! network client can suspend without blocking the event loop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Boxed future returned by cache store operations.
pub type CacheFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Cache store operation failure.
#[derive(Debug, Clone, Error)]
#[error("cache store error: {message}")]
pub struct CacheError {
    /// Human-readable failure description.
    pub message: String,
}

impl CacheError {
    /// Create a cache error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Narrow key/value cache interface.
pub trait CacheStore: Send + Sync {
    /// Fetch a value; `None` when absent or expired.
    fn get(&self, key: &str) -> CacheFuture<Option<String>>;

    /// Store a value, optionally bounded by a TTL.
    fn store(&self, key: &str, value: String, ttl: Option<Duration>)
        -> CacheFuture<Result<(), CacheError>>;

    /// Delete a key. Deleting an absent key is not an error.
    fn del(&self, key: &str) -> CacheFuture<Result<(), CacheError>>;
}

/// In-memory cache store for tests and single-node embedded deployments.
///
/// TTLs are honored lazily: expired entries are dropped on read.
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> CacheFuture<Option<String>> {
        let entries = Arc::clone(&self.entries);
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = entries.lock();
            match entries.get(&key) {
                Some(entry) => {
                    if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
                        entries.remove(&key);
                        None
                    } else {
                        Some(entry.value.clone())
                    }
                }
                None => None,
            }
        })
    }

    fn store(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> CacheFuture<Result<(), CacheError>> {
        let entries = Arc::clone(&self.entries);
        let key = key.to_string();
        Box::pin(async move {
            entries.lock().insert(
                key,
                MemoryEntry {
                    value,
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    fn del(&self, key: &str) -> CacheFuture<Result<(), CacheError>> {
        let entries = Arc::clone(&self.entries);
        let key = key.to_string();
        Box::pin(async move {
            entries.lock().remove(&key);
            Ok(())
        })
    }
}

/// Cache store that fails every write, for exercising degraded paths.
#[derive(Debug, Default, Clone)]
pub struct FailingCacheStore;

impl CacheStore for FailingCacheStore {
    fn get(&self, _key: &str) -> CacheFuture<Option<String>> {
        Box::pin(async { None })
    }

    fn store(
        &self,
        _key: &str,
        _value: String,
        _ttl: Option<Duration>,
    ) -> CacheFuture<Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::new("cache store unavailable")) })
    }

    fn del(&self, _key: &str) -> CacheFuture<Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::new("cache store unavailable")) })
    }
}
