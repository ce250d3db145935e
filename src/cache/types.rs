//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key type - hex digest of query and context
pub type CacheKey = String;

/// Cached payload. Restricted to JSON-representable data (strings, numbers,
/// bools, nested maps and sequences) so snapshots stay portable.
pub type CacheValue = serde_json::Value;

/// Caller context attached to a query (user, tenant, session...).
/// Ordered so that hashing is independent of insertion order.
pub type QueryContext = BTreeMap<String, String>;

/// Named reusable sub-parts of a response
pub type ComponentMap = BTreeMap<String, CacheValue>;

/// Snapshot of cache performance counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheMetrics {
    /// Number of `check_cache_relevance` calls
    pub total_requests: u64,

    /// Lookups that returned content
    pub cache_hits: u64,

    /// Lookups that returned nothing
    pub cache_misses: u64,

    /// cache_hits / total_requests, 0.0 when idle
    pub hit_rate: f64,

    /// cache_misses / total_requests, 0.0 when idle
    pub miss_rate: f64,

    /// Bytes held by entries plus component maps
    pub memory_usage_bytes: u64,

    /// Hits served by the exact key path
    pub exact_hits: u64,

    /// Hits served by similarity matching
    pub similarity_hits: u64,

    /// Entries removed to satisfy memory or entry budgets
    pub eviction_count: u64,

    /// Entries removed by expiry or relevance invalidation
    pub invalidation_count: u64,

    /// Placeholder entries inserted by warming
    pub warmed_entries: u64,

    /// Inserted / matched ratio of the most recent warming pass
    pub warming_success_rate: f64,

    /// Running mean of lookup latency in microseconds
    pub average_lookup_micros: f64,

    /// Live entry count at the time of the snapshot
    pub entry_count: usize,
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheMetrics {{ requests: {}, hits: {}, misses: {}, hit_rate: {:.2}, entries: {}, memory: {} bytes, evictions: {} }}",
            self.total_requests,
            self.cache_hits,
            self.cache_misses,
            self.hit_rate,
            self.entry_count,
            self.memory_usage_bytes,
            self.eviction_count
        )
    }
}

/// Lock-free counters shared by foreground calls and background loops
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    exact_hits: AtomicU64,
    similarity_hits: AtomicU64,
    eviction_count: AtomicU64,
    invalidation_count: AtomicU64,
    warmed_entries: AtomicU64,
    // f64 values stored as raw bits
    warming_success_rate: AtomicU64,
    lookup_micros_total: AtomicU64,
}

/// Which lookup path produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HitKind {
    Exact,
    Similarity,
}

impl MetricsRecorder {
    pub(crate) fn record_hit(&self, kind: HitKind, elapsed_micros: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        match kind {
            HitKind::Exact => self.exact_hits.fetch_add(1, Ordering::Relaxed),
            HitKind::Similarity => self.similarity_hits.fetch_add(1, Ordering::Relaxed),
        };
        self.lookup_micros_total
            .fetch_add(elapsed_micros, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self, elapsed_micros: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.lookup_micros_total
            .fetch_add(elapsed_micros, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.eviction_count
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidations(&self, count: usize) {
        self.invalidation_count
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_warming(&self, matched: usize, inserted: usize) {
        self.warmed_entries
            .fetch_add(inserted as u64, Ordering::Relaxed);
        if matched > 0 {
            let rate = inserted as f64 / matched as f64;
            self.warming_success_rate
                .store(rate.to_bits(), Ordering::Relaxed);
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.cache_hits,
            &self.cache_misses,
            &self.exact_hits,
            &self.similarity_hits,
            &self.eviction_count,
            &self.invalidation_count,
            &self.warmed_entries,
            &self.warming_success_rate,
            &self.lookup_micros_total,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Build a metrics snapshot; memory and entry count come from the store
    pub(crate) fn snapshot(&self, memory_usage_bytes: u64, entry_count: usize) -> CacheMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let (hit_rate, miss_rate, average_lookup_micros) = if total_requests == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let total = total_requests as f64;
            (
                cache_hits as f64 / total,
                cache_misses as f64 / total,
                self.lookup_micros_total.load(Ordering::Relaxed) as f64 / total,
            )
        };

        CacheMetrics {
            total_requests,
            cache_hits,
            cache_misses,
            hit_rate,
            miss_rate,
            memory_usage_bytes,
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            similarity_hits: self.similarity_hits.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            invalidation_count: self.invalidation_count.load(Ordering::Relaxed),
            warmed_entries: self.warmed_entries.load(Ordering::Relaxed),
            warming_success_rate: f64::from_bits(
                self.warming_success_rate.load(Ordering::Relaxed),
            ),
            average_lookup_micros,
            entry_count,
        }
    }
}
