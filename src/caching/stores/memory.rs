//! # Local Fallback Store
//!
//! A process-local, TTL-aware key/value map. It serves two roles:
//! - the read path while the distributed store is unreachable
//! - a write-through safety net, so a write is observable even mid-outage
//!
//! Expired entries are removed lazily on read and by a periodic sweep task. Both paths
//! use conditional removal, so an entry is never removed twice and an entry rewritten
//! between the expiry check and the removal survives.
//!
//! Contents are not persisted; a restart begins with an empty store.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::CacheEntry;
use crate::caching::key_pattern::KeyPattern;

/// Fallback store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FallbackStoreStats {
    /// Number of entries, including expired entries not yet swept
    pub entries: usize,

    /// Number of hits
    pub hits: u64,

    /// Number of misses (never stored or expired)
    pub misses: u64,

    /// Number of expired entries removed, lazily or by the sweep
    pub expired_cleanups: u64,
}

/// Process-local TTL map used as the degraded-mode tier
#[derive(Debug, Default)]
pub struct LocalFallbackStore {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired_cleanups: AtomicU64,
}

impl LocalFallbackStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live value; `None` for keys never stored and for expired keys
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired && self.entries.remove_if(key, |_, entry| entry.is_expired()).is_some() {
            self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Evicted expired fallback entry on read");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value`, replacing any previous entry and its timestamps
    pub fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// Remove `key`; returns `false` for missing keys and for expired entries not yet swept
    pub fn delete(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) if entry.is_expired() => {
                self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove every key fully matching `pattern`; returns how many live entries were removed.
    ///
    /// Expired matches are dropped too but not counted. Linear in the number of entries.
    pub fn delete_matching(&self, pattern: &KeyPattern) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut expired = 0u64;
        self.entries.retain(|key, entry| {
            if !pattern.matches(key) {
                return true;
            }
            if entry.is_expired_at(now) {
                expired += 1;
            } else {
                removed += 1;
            }
            false
        });
        if expired > 0 {
            self.expired_cleanups.fetch_add(expired, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every expired entry; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired_at(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.expired_cleanups.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Swept expired fallback entries");
        }
        removed
    }

    /// Number of stored entries, including expired entries not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> FallbackStoreStats {
        FallbackStoreStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        }
    }

    /// Start the periodic TTL sweep; it runs until `shutdown` is cancelled
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Fallback sweep stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.sweep();
                    }
                }
            }
        })
    }
}
