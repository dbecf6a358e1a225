//! Sync history buffer.
//!
//! A best-effort forensic log used to diagnose *why* a desync happened, not
//! to prevent it. Each captured entry freezes a snapshot of the entire
//! ledger as it was before applying a diff, so a human can replay the
//! sequence of mutations that led to divergence.
//!
//! Configuration (TTL and capacity) is polled from the shared cache store
//! every five seconds rather than pushed; the debugging feature trades
//! configuration freshness for simplicity and stays off the
//! correctness-critical path entirely. Persistence failures degrade to
//! logging, never to errors.

use crate::cluster::cache::CacheStore;
use crate::ledger::diff::StateDiff;
use crate::ledger::full_state::FullStateSnapshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often the buffer re-reads its settings from the cache store.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default ring capacity when the cache store does not override it.
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// Cache key holding the persisted-copy TTL in milliseconds.
///
/// Zero disables history capture; when the key is absent the currently
/// configured value stays in effect.
pub const TTL_KEY: &str = "sync_history:ttl_ms";

/// Cache key overriding the ring capacity.
pub const MAX_ENTRIES_KEY: &str = "sync_history:max_entries";

/// Buffer settings, refreshed by the config poll task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySettings {
    /// TTL applied to the persisted copy. The in-memory buffer itself has
    /// no TTL; `None` disables capture altogether.
    pub ttl: Option<Duration>,

    /// Ring capacity; the oldest entry is dropped at capacity.
    pub max_entries: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// One captured mutation with the pre-apply ledger snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// Diff topic (always one of [`StateDiff::TOPICS`]).
    pub topic: String,

    /// The serialized diff payload as received.
    pub message: serde_json::Value,

    /// Full ledger snapshot taken before the diff was applied.
    pub state: FullStateSnapshot,
}

/// Bounded recent-activity log for post-mortem desync diagnosis.
pub struct SyncHistoryBuffer {
    node_id: String,
    cache: Arc<dyn CacheStore>,
    settings: Arc<Mutex<HistorySettings>>,
    entries: VecDeque<SyncHistoryEntry>,
    poll_handle: Option<JoinHandle<()>>,
}

impl SyncHistoryBuffer {
    /// Create a buffer with default settings.
    ///
    /// The config poll task is started separately via
    /// [`SyncHistoryBuffer::start_config_poll`] so the buffer can be built
    /// outside a runtime.
    pub fn new(node_id: impl Into<String>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            node_id: node_id.into(),
            cache,
            settings: Arc::new(Mutex::new(HistorySettings::default())),
            entries: VecDeque::new(),
            poll_handle: None,
        }
    }

    /// Spawn the periodic settings poll.
    ///
    /// Idempotent at the call site's peril: a second call while a poller is
    /// live is logged and ignored.
    pub fn start_config_poll(&mut self) {
        if self.poll_handle.is_some() {
            tracing::warn!("sync history config poll already running");
            return;
        }
        let cache = Arc::clone(&self.cache);
        let settings = Arc::clone(&self.settings);
        self.poll_handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(CONFIG_POLL_INTERVAL);
            // The immediate first tick doubles as the initial fetch.
            loop {
                interval.tick().await;
                refresh_settings(&cache, &settings).await;
            }
        }));
    }

    /// Stop the config poll task.
    ///
    /// Must be called exactly once before drop; a second call is a logged
    /// warning, not a panic.
    pub fn dispose(&mut self) {
        match self.poll_handle.take() {
            Some(handle) => handle.abort(),
            None => tracing::warn!("sync history buffer disposed twice"),
        }
    }

    /// Whether `topic` should be captured right now.
    ///
    /// True only if a TTL is currently configured and the topic is in the
    /// fixed set of topics known to mutate full state. Bounding capture to
    /// those topics keeps the buffer to data useful for desync diagnosis.
    pub fn enabled(&self, topic: &str) -> bool {
        self.settings.lock().ttl.is_some() && StateDiff::TOPICS.contains(&topic)
    }

    /// Append an entry, evicting the oldest at capacity.
    pub fn push(
        &mut self,
        topic: impl Into<String>,
        message: serde_json::Value,
        state: FullStateSnapshot,
    ) {
        let max_entries = self.settings.lock().max_entries.max(1);
        while self.entries.len() >= max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(SyncHistoryEntry {
            topic: topic.into(),
            message,
            state,
        });
    }

    /// Persist the whole buffer to the cache store, keyed by node id.
    ///
    /// On write failure the error and the serialized payload are both
    /// logged; diagnostics must never become a second source of crashes.
    pub async fn save(&self) {
        let payload = match serde_json::to_string(&self.entries) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, "failed to serialize sync history");
                return;
            }
        };
        let ttl = self.settings.lock().ttl;
        let key = format!("cluster/sync_history/{}", self.node_id);
        if let Err(error) = self.cache.store(&key, payload.clone(), ttl).await {
            tracing::error!(%error, %key, "failed to persist sync history");
            tracing::error!(%payload, "unpersisted sync history payload");
        }
    }

    /// Replace the current settings. Test and bootstrap hook.
    pub fn set_settings(&self, settings: HistorySettings) {
        *self.settings.lock() = settings;
    }

    /// Current settings.
    pub fn settings(&self) -> HistorySettings {
        self.settings.lock().clone()
    }

    /// Entries captured so far, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &SyncHistoryEntry> {
        self.entries.iter()
    }

    /// Number of captured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Re-read settings from the cache store.
async fn refresh_settings(cache: &Arc<dyn CacheStore>, settings: &Arc<Mutex<HistorySettings>>) {
    let ttl = match cache.get(TTL_KEY).await {
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) => None,
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(error) => {
                tracing::warn!(%error, key = TTL_KEY, %raw, "ignoring unparsable history TTL");
                settings.lock().ttl
            }
        },
        None => settings.lock().ttl,
    };

    let max_entries = match cache.get(MAX_ENTRIES_KEY).await {
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n > 0 => n,
            Ok(_) | Err(_) => {
                tracing::warn!(key = MAX_ENTRIES_KEY, %raw, "ignoring invalid history capacity");
                settings.lock().max_entries
            }
        },
        None => settings.lock().max_entries,
    };

    let mut guard = settings.lock();
    guard.ttl = ttl;
    guard.max_entries = max_entries;
}

impl Drop for SyncHistoryBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
    }
}
