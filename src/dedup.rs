// Copyright 2025 Cowboy AI, LLC.

//! Bounded deduplication for source connectors
//!
//! The polled remote source returns overlapping result pages, so its
//! connector must drop business keys it has already published. The store is
//! a capacity-bounded LRU: memory stays flat under unbounded key spaces,
//! at the cost of possibly re-admitting a key evicted long ago.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Default number of business keys remembered per connector
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Capacity-bounded set of already-processed business keys
#[derive(Debug)]
pub struct DedupStore {
    seen: LruCache<String, ()>,
}

impl DedupStore {
    /// Create a store remembering at most `capacity` keys
    pub fn new(capacity: usize) -> Self {
        let capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_DEDUP_CAPACITY).unwrap());
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Record a key; returns `true` when the key was not already present.
    ///
    /// A repeated key refreshes its recency so hot keys survive eviction.
    pub fn insert(&mut self, key: &str) -> bool {
        self.seen.put(key.to_string(), ()).is_none()
    }

    /// Whether the key is currently remembered (does not refresh recency)
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Number of keys currently remembered
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_is_fresh() {
        let mut store = DedupStore::new(8);
        assert!(store.insert("SALE-1"));
        assert!(!store.insert("SALE-1"));
        assert!(store.insert("SALE-2"));
    }

    #[test]
    fn test_capacity_bound_evicts_oldest() {
        let mut store = DedupStore::new(2);
        store.insert("a");
        store.insert("b");
        store.insert("c");

        assert_eq!(store.len(), 2);
        // "a" was least recently used and is gone; re-inserting reports fresh
        assert!(!store.contains("a"));
        assert!(store.insert("a"));
    }

    #[test]
    fn test_reinsert_refreshes_recency() {
        let mut store = DedupStore::new(2);
        store.insert("a");
        store.insert("b");
        store.insert("a"); // refresh
        store.insert("c"); // evicts "b", not "a"

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
    }

    #[test]
    fn test_zero_capacity_falls_back_to_default() {
        let store = DedupStore::new(0);
        assert!(store.is_empty());
    }
}
