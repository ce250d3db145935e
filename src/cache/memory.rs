//! Memory-bounded eviction and compression
//!
//! Entries are ranked by a composite score of relevance, recency and access
//! frequency, less a penalty for large payloads. The lowest-scoring entry
//! goes first; ties go to the entry that has waited longest since its last
//! access. Large payloads are gzip-compressed before anything is evicted.

use crate::cache::config::CacheConfig;
use crate::cache::entry::CacheEntry;
use crate::cache::store::StoreState;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Hours after which an unread entry has no recency credit left
const RECENCY_WINDOW_HOURS: f64 = 168.0;

/// Accesses at which the frequency component saturates
const FREQUENCY_SATURATION: f64 = 10.0;

/// Payload size at which the size penalty is fully applied
const SIZE_PENALTY_BYTES: f64 = 100_000.0;

fn default_size_penalty() -> f64 {
    0.1
}

/// Weights of the eviction score components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvictionWeights {
    pub relevance: f64,
    pub recency: f64,
    pub frequency: f64,

    /// Subtracted in proportion to payload size, up to 100 KB
    #[serde(default = "default_size_penalty")]
    pub size_penalty: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            relevance: 0.4,
            recency: 0.3,
            frequency: 0.3,
            size_penalty: default_size_penalty(),
        }
    }
}

impl EvictionWeights {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.relevance, self.recency, self.frequency, self.size_penalty];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(CacheError::ConfigurationError(
                "eviction weights must be non-negative".to_string(),
            ));
        }
        if self.relevance + self.recency + self.frequency == 0.0 {
            return Err(CacheError::ConfigurationError(
                "at least one eviction weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of an optimization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub initial_memory_bytes: u64,
    pub final_memory_bytes: u64,
    pub initial_entries: u64,
    pub final_entries: u64,
    pub compressed_entries: u64,
    pub evicted_entries: u64,
    pub memory_saved_bytes: u64,
}

impl OptimizationReport {
    /// Flat name -> value view of the report
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        [
            ("initial_memory_bytes", self.initial_memory_bytes),
            ("final_memory_bytes", self.final_memory_bytes),
            ("initial_entries", self.initial_entries),
            ("final_entries", self.final_entries),
            ("compressed_entries", self.compressed_entries),
            ("evicted_entries", self.evicted_entries),
            ("memory_saved_bytes", self.memory_saved_bytes),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Byte and entry limits an eviction pass works towards
#[derive(Debug, Clone, Copy)]
struct Budget {
    bytes: u64,
    entries: usize,
}

impl Budget {
    fn exceeded_by(&self, state: &StoreState) -> bool {
        state.entries_bytes() as u64 > self.bytes || state.len() > self.entries
    }
}

#[derive(Debug, Clone)]
pub struct MemoryOptimizer {
    max_memory_bytes: u64,
    max_entries: usize,
    pressure_ratio: f64,
    low_water_ratio: f64,
    compression_threshold: Option<usize>,
    weights: EvictionWeights,
}

impl MemoryOptimizer {
    /// Optimizer without compression whose write-triggered passes free down
    /// to the full budget
    pub fn new(max_memory_bytes: u64, max_entries: usize, weights: EvictionWeights) -> Self {
        Self {
            max_memory_bytes,
            max_entries,
            pressure_ratio: 1.0,
            low_water_ratio: 1.0,
            compression_threshold: None,
            weights,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_memory_bytes: config.max_memory_bytes(),
            max_entries: config.max_entries,
            pressure_ratio: config.memory_pressure_ratio,
            low_water_ratio: config.eviction_low_water_ratio,
            compression_threshold: config.compression_threshold_bytes,
            weights: config.eviction_weights,
        }
    }

    pub fn with_compression_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn with_low_water_ratio(mut self, ratio: f64) -> Self {
        self.low_water_ratio = ratio;
        self
    }

    /// Composite keep-score; lower is evicted first
    pub fn score(&self, entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        let hours_idle = entry.time_since_access(now).as_secs_f64() / 3600.0;
        let recency = (1.0 - hours_idle / RECENCY_WINDOW_HOURS).max(0.0);
        let frequency = (entry.access_count as f64 / FREQUENCY_SATURATION).min(1.0);
        let size = (entry.size_bytes as f64 / SIZE_PENALTY_BYTES).min(1.0);

        let score = self.weights.relevance * entry.relevance_score
            + self.weights.recency * recency
            + self.weights.frequency * frequency
            - self.weights.size_penalty * size;
        score.max(0.0)
    }

    fn full_budget(&self) -> Budget {
        Budget {
            bytes: self.max_memory_bytes,
            entries: self.max_entries,
        }
    }

    fn low_water_budget(&self) -> Budget {
        Budget {
            bytes: (self.max_memory_bytes as f64 * self.low_water_ratio) as u64,
            entries: (self.max_entries as f64 * self.low_water_ratio) as usize,
        }
    }

    /// Whether a write should trigger an immediate eviction pass
    pub fn under_pressure(&self, state: &StoreState) -> bool {
        let threshold = self.max_memory_bytes as f64 * self.pressure_ratio;
        state.entries_bytes() as f64 > threshold || state.len() > self.max_entries
    }

    /// Compress large entries, then evict lowest-scoring entries until both
    /// budgets hold
    pub fn optimize(&self, state: &mut StoreState, now: DateTime<Utc>) -> OptimizationReport {
        let initial = (state.entries_bytes() as u64, state.len() as u64);

        let compressed = match self.compression_threshold {
            Some(threshold) => state.compress_large_entries(threshold),
            None => 0,
        };
        self.evict(state, now, self.full_budget(), None);

        let report = self.report(initial, state, compressed);
        if report.evicted_entries > 0 || report.compressed_entries > 0 {
            info!(
                "Memory optimization compressed {} entries, evicted {}, freed {} bytes",
                report.compressed_entries, report.evicted_entries, report.memory_saved_bytes
            );
        }
        report
    }

    /// Eviction pass after a write put the store under pressure.
    ///
    /// Frees down to the low-water mark of both budgets and never evicts
    /// `protected`, the entry that was just written.
    pub fn relieve_pressure(
        &self,
        state: &mut StoreState,
        now: DateTime<Utc>,
        protected: &str,
    ) -> OptimizationReport {
        let initial = (state.entries_bytes() as u64, state.len() as u64);
        self.evict(state, now, self.low_water_budget(), Some(protected));
        self.report(initial, state, 0)
    }

    fn evict(
        &self,
        state: &mut StoreState,
        now: DateTime<Utc>,
        budget: Budget,
        protected: Option<&str>,
    ) {
        if !budget.exceeded_by(state) {
            return;
        }

        let mut ranked: Vec<(f64, DateTime<Utc>, String)> = state
            .entries()
            .filter(|e| Some(e.key.as_str()) != protected)
            .map(|e| (self.score(e, now), e.last_accessed, e.key.clone()))
            .collect();
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        for (score, _, key) in ranked {
            if !budget.exceeded_by(state) {
                break;
            }
            if let Some(evicted) = state.remove(&key) {
                debug!(
                    "Evicted cache entry {} (score {:.3}, {} bytes)",
                    key, score, evicted.size_bytes
                );
            }
        }
    }

    fn report(&self, initial: (u64, u64), state: &StoreState, compressed: usize) -> OptimizationReport {
        let (initial_memory_bytes, initial_entries) = initial;
        let final_memory_bytes = state.entries_bytes() as u64;
        let final_entries = state.len() as u64;
        OptimizationReport {
            initial_memory_bytes,
            final_memory_bytes,
            initial_entries,
            final_entries,
            compressed_entries: compressed as u64,
            evicted_entries: initial_entries.saturating_sub(final_entries),
            memory_saved_bytes: initial_memory_bytes.saturating_sub(final_memory_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::QueryContext;
    use serde_json::json;

    fn entry(query: &str) -> CacheEntry {
        CacheEntry::new(query, QueryContext::new(), json!("0123456789"), &[])
    }

    #[test]
    fn test_weights_validation() {
        assert!(EvictionWeights::default().validate().is_ok());
        let negative = EvictionWeights {
            relevance: -1.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
        let zero = EvictionWeights {
            relevance: 0.0,
            recency: 0.0,
            frequency: 0.0,
            size_penalty: 0.1,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_score_components() {
        let optimizer = MemoryOptimizer::new(1024, 10, EvictionWeights::default());
        let mut e = entry("q");
        let now = e.last_accessed;

        // Fresh, full relevance, never hit; a 12 byte payload barely counts
        assert!((optimizer.score(&e, now) - 0.7).abs() < 1e-4);

        for _ in 0..20 {
            e.mark_accessed(now);
        }
        assert!((optimizer.score(&e, now) - 1.0).abs() < 1e-4);

        let week_later = now + chrono::Duration::hours(200);
        assert!((optimizer.score(&e, week_later) - 0.7).abs() < 1e-4);
    }

    #[test]
    fn test_large_entries_score_lower() {
        let optimizer = MemoryOptimizer::new(1024, 10, EvictionWeights::default());
        let small = entry("small");
        let mut large = small.clone();
        large.size_bytes = 250_000;
        let now = small.last_accessed;

        let gap = optimizer.score(&small, now) - optimizer.score(&large, now);
        assert!((gap - 0.1).abs() < 1e-3);

        // Never negative
        let mut worthless = large.clone();
        worthless.set_relevance(0.0);
        let much_later = now + chrono::Duration::hours(500);
        assert_eq!(optimizer.score(&worthless, much_later), 0.0);
    }

    #[test]
    fn test_optimize_within_budget_is_noop() {
        let optimizer = MemoryOptimizer::new(1024 * 1024, 10, EvictionWeights::default());
        let mut state = StoreState::default();
        state.insert(entry("a"));
        state.insert(entry("b"));

        let report = optimizer.optimize(&mut state, Utc::now());
        assert_eq!(report.evicted_entries, 0);
        assert_eq!(report.initial_memory_bytes, report.final_memory_bytes);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_evicts_lowest_score_first() {
        let optimizer = MemoryOptimizer::new(1024 * 1024, 2, EvictionWeights::default());
        let mut state = StoreState::default();
        let weak = entry("weak").with_relevance(0.1);
        let mid = entry("mid").with_relevance(0.5);
        let strong = entry("strong").with_relevance(0.9);
        let weak_key = weak.key.clone();
        state.insert(weak);
        state.insert(mid);
        state.insert(strong);

        let report = optimizer.optimize(&mut state, Utc::now());

        assert_eq!(report.evicted_entries, 1);
        assert_eq!(report.final_entries, 2);
        assert!(!state.contains_key(&weak_key));
    }

    #[test]
    fn test_tie_breaks_on_oldest_access() {
        let optimizer = MemoryOptimizer::new(1024 * 1024, 1, EvictionWeights::default());
        let now = Utc::now();
        let mut state = StoreState::default();
        let mut older = entry("older");
        let mut newer = entry("newer");
        // Both past the recency window so scores tie
        older.last_accessed = now - chrono::Duration::hours(300);
        newer.last_accessed = now - chrono::Duration::hours(200);
        let newer_key = newer.key.clone();
        state.insert(older);
        state.insert(newer);

        optimizer.optimize(&mut state, now);

        assert_eq!(state.len(), 1);
        assert!(state.contains_key(&newer_key));
    }

    #[test]
    fn test_memory_budget_enforced() {
        let e = entry("sized");
        let size = e.size_bytes as u64;
        let optimizer = MemoryOptimizer::new(size * 3, 100, EvictionWeights::default());
        let mut state = StoreState::default();
        for i in 0..10 {
            state.insert(entry(&format!("query {}", i)));
        }

        let report = optimizer.optimize(&mut state, Utc::now());

        assert!(report.final_memory_bytes <= size * 3);
        assert_eq!(report.final_entries, 3);
        assert_eq!(report.memory_saved_bytes, size * 7);
        assert_eq!(report.to_map()["evicted_entries"], 7);
    }

    #[test]
    fn test_under_pressure() {
        let e = entry("sized");
        let size = e.size_bytes as u64;
        let config = CacheConfig {
            max_entries: 100,
            ..Default::default()
        };
        let mut optimizer = MemoryOptimizer::from_config(&config);
        optimizer.max_memory_bytes = size * 10;

        let mut state = StoreState::default();
        for i in 0..8 {
            state.insert(entry(&format!("query {}", i)));
        }
        assert!(!optimizer.under_pressure(&state));

        state.insert(entry("one more"));
        state.insert(entry("and another"));
        assert!(optimizer.under_pressure(&state));
    }

    #[test]
    fn test_relieve_pressure_keeps_protected_entry() {
        let optimizer =
            MemoryOptimizer::new(1024 * 1024, 2, EvictionWeights::default()).with_low_water_ratio(0.7);
        let now = Utc::now();
        let mut state = StoreState::default();
        for query in ["alpha", "beta"] {
            let mut popular = entry(query);
            for _ in 0..10 {
                popular.mark_accessed(now);
            }
            state.insert(popular);
        }
        let fresh = entry("gamma");
        let fresh_key = fresh.key.clone();
        state.insert(fresh);

        // The fresh entry scores lowest but survives its own write
        assert!(optimizer.under_pressure(&state));
        let report = optimizer.relieve_pressure(&mut state, now, &fresh_key);

        assert!(state.contains_key(&fresh_key));
        assert_eq!(state.len(), 1);
        assert_eq!(report.evicted_entries, 2);
    }

    #[test]
    fn test_relieve_pressure_frees_to_low_water_mark() {
        let optimizer =
            MemoryOptimizer::new(1024 * 1024, 10, EvictionWeights::default()).with_low_water_ratio(0.7);
        let mut state = StoreState::default();
        for i in 0..11 {
            state.insert(entry(&format!("query {}", i)));
        }
        let newest = entry("newest");
        let newest_key = newest.key.clone();
        state.insert(newest);

        let report = optimizer.relieve_pressure(&mut state, Utc::now(), &newest_key);

        assert_eq!(state.len(), 7);
        assert_eq!(report.evicted_entries, 5);
        assert!(!optimizer.under_pressure(&state));
    }

    #[test]
    fn test_optimize_compresses_before_evicting() {
        let big = CacheEntry::new(
            "big",
            QueryContext::new(),
            json!("repeat after me. ".repeat(1_000)),
            &[],
        );
        let big_key = big.key.clone();
        let big_size = big.size_bytes as u64;
        let optimizer = MemoryOptimizer::new(big_size, 10, EvictionWeights::default())
            .with_compression_threshold(Some(10_000));
        let mut state = StoreState::default();
        state.insert(big);
        state.insert(entry("small"));

        let report = optimizer.optimize(&mut state, Utc::now());

        // Compression alone brings the store back under budget
        assert_eq!(report.compressed_entries, 1);
        assert_eq!(report.evicted_entries, 0);
        assert!(report.memory_saved_bytes > 0);
        assert_eq!(report.to_map()["compressed_entries"], 1);
        assert!(state.get(&big_key).unwrap().is_compressed());
    }
}
