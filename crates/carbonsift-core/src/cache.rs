//! Signature cache for memoized confidence results
//!
//! Keyed by a content fingerprint (SHA-256 of the payload) plus the adapter
//! name, so identical byte sequences skip re-classification. Entries expire
//! lazily on read via a TTL and are evicted oldest-first on capacity
//! overflow, with ties broken by lowest confidence score and then key order.

use crate::types::ConfidenceResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the signature cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction kicks in
    pub max_entries: usize,

    /// Time-to-live for entries, checked lazily on read
    pub ttl: Duration,

    /// Payloads larger than this bypass the cache entirely
    pub max_data_size: usize,

    /// When false, results scoring below `min_confidence_to_cache` are not admitted
    pub cache_low_confidence: bool,

    /// Admission floor for confidence scores
    pub min_confidence_to_cache: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl: Duration::from_secs(300),
            max_data_size: 1024 * 1024,
            cache_low_confidence: false,
            min_confidence_to_cache: 0.3,
        }
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    /// Live entry count
    pub size: usize,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses (including expired entries)
    pub misses: u64,
    /// Hits over total lookups, 0.0 when no lookups happened
    pub hit_rate: f64,
    /// Approximate memory footprint of cached entries
    pub memory_usage_bytes: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ConfidenceResult,
    created_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CacheKey {
    adapter: String,
    digest: [u8; 32],
}

/// Bounded, time-expiring memo of adapter confidence results
#[derive(Debug)]
pub struct SignatureCache {
    config: CacheConfig,
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl SignatureCache {
    /// Create a cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Replace the configuration. Existing entries are kept; the new limits
    /// apply from the next insert.
    pub fn configure(&mut self, config: CacheConfig) {
        self.config = config;
    }

    fn key(adapter: &str, data: &[u8]) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(data);
        CacheKey {
            adapter: adapter.to_string(),
            digest: hasher.finalize().into(),
        }
    }

    /// Look up a cached result for this adapter and byte sequence.
    ///
    /// Oversized payloads always miss without touching the counters; expired
    /// entries are removed on the way out and count as misses.
    pub fn get(&mut self, adapter: &str, data: &[u8]) -> Option<ConfidenceResult> {
        if data.len() > self.config.max_data_size {
            return None;
        }

        let key = Self::key(adapter, data);
        match self.entries.get(&key) {
            Some(entry) if entry.created_at.elapsed() <= self.config.ttl => {
                self.hits += 1;
                Some(entry.result.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a result, subject to the admission policy and size ceiling.
    /// Returns whether the entry was admitted.
    pub fn insert(&mut self, adapter: &str, data: &[u8], result: ConfidenceResult) -> bool {
        if data.len() > self.config.max_data_size {
            return false;
        }
        if !self.config.cache_low_confidence && result.score < self.config.min_confidence_to_cache {
            return false;
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_one();
        }

        let key = Self::key(adapter, data);
        self.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: Instant::now(),
            },
        );
        true
    }

    /// Evict the entry least likely to be useful: oldest first, ties broken
    /// by lowest score, then key order. Deterministic for a given state.
    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by(|(ka, a), (kb, b)| {
                a.created_at
                    .cmp(&b.created_at)
                    .then(
                        a.result
                            .score
                            .partial_cmp(&b.result.score)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
                    .then(ka.cmp(kb))
            })
            .map(|(k, _)| k.clone());

        if let Some(key) = victim {
            debug!(adapter = %key.adapter, "evicting cache entry");
            self.entries.remove(&key);
        }
    }

    /// Drop all entries and reset hit/miss counters
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Snapshot of size, hit/miss counters, and approximate memory usage
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let memory_usage_bytes = self
            .entries
            .iter()
            .map(|(k, e)| {
                std::mem::size_of::<CacheKey>()
                    + std::mem::size_of::<CacheEntry>()
                    + k.adapter.len()
                    + e.result.adapter.len()
                    + e.result.evidence.len()
            })
            .sum();

        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
            memory_usage_bytes,
        }
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
