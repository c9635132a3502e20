//! LRU + TTL metadata cache
//!
//! Previews are memoised by URL. The cache is bounded in size (least recently
//! used entries go first) and in time (an entry older than its TTL is never
//! returned). Expiry is enforced lazily when an entry is read; there is no
//! background sweep.

use crate::clock::{Clock, SystemClock};
use crate::preview::Preview;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A cached preview together with its expiry instant
///
/// `None` means the TTL reaches past what `Instant` can represent.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Preview,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Bounded, time-bounded preview cache shared across workers
pub struct MetadataCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MetadataCache {
    /// Creates a cache using the system clock
    ///
    /// A `capacity` of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`
    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    /// Looks up a preview
    ///
    /// A hit promotes the entry to most recently used. An expired entry is
    /// removed and reported as a miss.
    pub fn get(&self, url: &str) -> Option<Preview> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = entries.peek(url)?.is_expired(now);
        if expired {
            entries.pop(url);
            tracing::debug!("Cache entry expired for {}", url);
            return None;
        }

        entries.get(url).map(|entry| entry.value.clone())
    }

    /// Stores a preview, evicting the least recently used entry when full
    ///
    /// Re-inserting an existing key replaces its value, refreshes its TTL and
    /// makes it the most recently used entry.
    pub fn put(&self, url: &str, preview: Preview) {
        let entry = CacheEntry {
            value: preview,
            expires_at: self.clock.now().checked_add(self.ttl),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((evicted, _)) = entries.push(url.to_string(), entry) {
            if evicted != url {
                tracing::debug!("Evicted {} from metadata cache", evicted);
            }
        }
    }

    /// Number of stored entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cap()
            .get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
