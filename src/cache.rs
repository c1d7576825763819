//! Content-addressed embedding cache.
//!
//! Maps a SHA-256 digest of the input text to a previously computed
//! embedding, so unchanged content is never re-embedded within a process
//! lifetime. Entries live only in memory; a restart or an explicit
//! [`clear`](EmbeddingCache::clear) empties the cache.
//!
//! Query-time and document-time embeddings are keyed under different
//! prefixes, so the same literal string used both ways does not alias.
//!
//! Eviction is by insertion order, not recency: when the cache is full, the
//! oldest 20% of entries are dropped in one pass. This approximates LRU
//! without tracking accesses — an entry that is read constantly still ages
//! out on schedule.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Whether a cached embedding belongs to indexed content or a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Document,
    Query,
}

impl CacheScope {
    fn prefix(&self) -> &'static str {
        match self {
            CacheScope::Document => "doc:",
            CacheScope::Query => "query:",
        }
    }
}

/// Cache statistics exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from cache, formatted to one decimal.
    pub hit_rate: String,
}

/// Bounded in-memory embedding cache.
pub struct EmbeddingCache {
    entries: HashMap<String, Vec<f32>>,
    /// Keys in insertion order, for eviction.
    order: VecDeque<String>,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
            hits: 0,
            misses: 0,
        }
    }

    fn cache_key(scope: CacheScope, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(scope.prefix().as_bytes());
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up an embedding, counting the hit or miss.
    pub fn get(&mut self, scope: CacheScope, text: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(scope, text);
        match self.entries.get(&key) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store an embedding, evicting the oldest 20% of entries first if full.
    pub fn put(&mut self, scope: CacheScope, text: &str, embedding: Vec<f32>) {
        let key = Self::cache_key(scope, text);
        if self.entries.contains_key(&key) {
            self.entries.insert(key, embedding);
            return;
        }

        if self.entries.len() >= self.max_size {
            let remove_count = (self.max_size / 5).max(1);
            for _ in 0..remove_count {
                if let Some(old) = self.order.pop_front() {
                    self.entries.remove(&old);
                }
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, embedding);
    }

    /// Drop every entry and reset the counters. Returns how many entries
    /// were held.
    pub fn clear(&mut self) -> usize {
        let size = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.hits = 0;
        self.misses = 0;
        size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: format!("{:.1}%", hit_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let mut cache = EmbeddingCache::new(10);
        assert!(cache.get(CacheScope::Document, "alpha").is_none());

        cache.put(CacheScope::Document, "alpha", vec![1.0, 2.0]);
        assert_eq!(
            cache.get(CacheScope::Document, "alpha"),
            Some(vec![1.0, 2.0])
        );

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, "50.0%");
    }

    #[test]
    fn query_and_document_scopes_do_not_alias() {
        let mut cache = EmbeddingCache::new(10);
        cache.put(CacheScope::Document, "alpha", vec![1.0]);
        assert!(cache.get(CacheScope::Query, "alpha").is_none());
        assert!(cache.get(CacheScope::Document, "alpha").is_some());
    }

    #[test]
    fn eviction_drops_oldest_fifth() {
        let mut cache = EmbeddingCache::new(10);
        for i in 0..10 {
            cache.put(CacheScope::Document, &format!("t{}", i), vec![i as f32]);
        }
        assert_eq!(cache.len(), 10);

        // The 11th insert evicts the 2 oldest (20% of 10) before inserting.
        cache.put(CacheScope::Document, "t10", vec![10.0]);
        assert_eq!(cache.len(), 9);
        assert!(cache.get(CacheScope::Document, "t0").is_none());
        assert!(cache.get(CacheScope::Document, "t1").is_none());
        assert!(cache.get(CacheScope::Document, "t2").is_some());
        assert!(cache.get(CacheScope::Document, "t10").is_some());
    }

    #[test]
    fn repeated_put_does_not_grow() {
        let mut cache = EmbeddingCache::new(10);
        cache.put(CacheScope::Document, "alpha", vec![1.0]);
        cache.put(CacheScope::Document, "alpha", vec![2.0]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(CacheScope::Document, "alpha"), Some(vec![2.0]));
    }

    #[test]
    fn clear_resets_everything() {
        let mut cache = EmbeddingCache::new(10);
        cache.put(CacheScope::Document, "alpha", vec![1.0]);
        cache.get(CacheScope::Document, "alpha");
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }
}
