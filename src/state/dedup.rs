//! Alert deduplication with TTL.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Window during which an identical alert is suppressed.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Upper bound on tracked keys, independent of the TTL purge.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Entry in the deduplication cache.
#[derive(Debug, Clone, Copy)]
pub struct DedupEntry {
    pub first_seen: Instant,
}

/// Alert deduplicator with TTL-based expiration.
///
/// Entries are never refreshed after insertion, so the LRU order is also
/// first-seen order and expired entries always sit at the tail. Each call
/// purges from the tail until it reaches a live entry.
pub struct AlertDeduplicator {
    cache: Mutex<LruCache<String, DedupEntry>>,
    ttl: Duration,
}

impl std::fmt::Debug for AlertDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDeduplicator")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl AlertDeduplicator {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_config(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, DedupEntry>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns true if an alert with this key should be emitted.
    ///
    /// Purge, lookup and insert happen under one lock acquisition.
    pub fn should_emit(&self, key: &str, now: Instant) -> bool {
        let mut cache = self.lock();

        while let Some((_, entry)) = cache.peek_lru() {
            if now.saturating_duration_since(entry.first_seen) >= self.ttl {
                cache.pop_lru();
            } else {
                break;
            }
        }

        if let Some(entry) = cache.peek(key) {
            if now.saturating_duration_since(entry.first_seen) < self.ttl {
                return false;
            }
        }

        cache.put(key.to_string(), DedupEntry { first_seen: now });
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlertDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_repeat_within_ttl_suppressed() {
        let dedup = AlertDeduplicator::new();
        let t0 = Instant::now();

        assert!(dedup.should_emit("TCP-10.0.0.1:5555-10.0.0.2:4444", t0));
        assert!(!dedup.should_emit("TCP-10.0.0.1:5555-10.0.0.2:4444", t0 + Duration::from_secs(9)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_ttl_boundary_emits_again() {
        let dedup = AlertDeduplicator::new();
        let t0 = Instant::now();

        assert!(dedup.should_emit("k", t0));
        assert!(!dedup.should_emit("k", t0 + Duration::from_millis(9_999)));
        assert!(dedup.should_emit("k", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_suppression_does_not_extend_window() {
        let dedup = AlertDeduplicator::new();
        let t0 = Instant::now();

        assert!(dedup.should_emit("k", t0));
        assert!(!dedup.should_emit("k", t0 + Duration::from_secs(5)));
        assert!(dedup.should_emit("k", t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_expired_entries_purged() {
        let dedup = AlertDeduplicator::new();
        let t0 = Instant::now();

        for i in 0..50 {
            dedup.should_emit(&format!("key-{}", i), t0);
        }
        assert_eq!(dedup.len(), 50);

        dedup.should_emit("fresh", t0 + Duration::from_secs(30));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_distinct_keys_independent() {
        let dedup = AlertDeduplicator::new();
        let t0 = Instant::now();

        assert!(dedup.should_emit("ICMP-8-10.0.0.1-10.0.0.2", t0));
        assert!(dedup.should_emit("ICMP-0-10.0.0.2-10.0.0.1", t0));
        assert!(!dedup.should_emit("ICMP-8-10.0.0.1-10.0.0.2", t0));
    }

    #[test]
    fn test_capacity_bound() {
        let dedup = AlertDeduplicator::with_config(DEFAULT_TTL, 3);
        let t0 = Instant::now();

        for key in ["a", "b", "c", "d"] {
            assert!(dedup.should_emit(key, t0));
        }
        assert_eq!(dedup.len(), 3);
        // "a" was evicted as the oldest entry
        assert!(dedup.should_emit("a", t0));
    }

    #[test]
    fn test_concurrent_producers_emit_once() {
        let dedup = Arc::new(AlertDeduplicator::new());
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || dedup.should_emit("shared", now))
            })
            .collect();

        let emitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|emitted| *emitted)
            .count();
        assert_eq!(emitted, 1);
    }
}
