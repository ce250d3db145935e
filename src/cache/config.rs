//! Configuration for the smart cache

use crate::cache::invalidation::InvalidationPolicy;
use crate::cache::memory::EvictionWeights;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Longest accepted `default_ttl`; expiry timestamps stay representable
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Configuration for the smart cache manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory budget for cached entries, in megabytes
    pub max_memory_mb: u64,

    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// Minimum similarity score (0.0 - 1.0) for a similarity hit
    pub similarity_threshold: f64,

    /// Directory holding the snapshot file
    pub cache_dir: PathBuf,

    /// Interval between invalidation + memory optimization passes
    pub cleanup_interval: Duration,

    /// Interval between predictive warming passes
    pub warming_interval: Duration,

    /// Default time-to-live for cache entries
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0), spreads expiry of entries written together
    pub ttl_jitter: f64,

    /// Time for an idle entry's relevance to halve
    pub relevance_half_life: Duration,

    /// Relevance restored on every hit (capped at 1.0)
    pub hit_relevance_boost: f64,

    /// Keyword overlap (0.0 - 1.0) needed to fold a query into an existing pattern
    pub pattern_match_threshold: f64,

    /// Upper bound on learned usage patterns
    pub max_patterns: usize,

    /// Minutes either side of "now" that still count as a time-pattern match
    pub warming_tolerance_minutes: u32,

    /// Background warming ignores patterns below this confidence
    pub warming_min_confidence: f64,

    /// Fraction of the memory budget that triggers eviction on write
    pub memory_pressure_ratio: f64,

    /// Fraction of both budgets a write-triggered eviction frees down to
    pub eviction_low_water_ratio: f64,

    /// Entries larger than this are gzip-compressed by memory optimization.
    /// `None` disables compression.
    pub compression_threshold_bytes: Option<usize>,

    /// Context keys that define a tenant boundary for cross-context reuse
    pub scope_keys: Vec<String>,

    /// Weights of the composite score used for eviction
    pub eviction_weights: EvictionWeights,

    /// Policy applied by the background cleanup loop
    pub cleanup_policy: InvalidationPolicy,

    /// Save a snapshot at the end of every cleanup pass
    pub autosave: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 50,
            max_entries: 1_000,
            similarity_threshold: 0.65,
            cache_dir: PathBuf::from("data/cache"),
            // Cleanup every hour, warming every 30 minutes
            cleanup_interval: Duration::from_secs(3600),
            warming_interval: Duration::from_secs(1800),
            default_ttl: Duration::from_secs(24 * 3600),
            ttl_jitter: 0.0,
            relevance_half_life: Duration::from_secs(7 * 24 * 3600),
            hit_relevance_boost: 0.1,
            pattern_match_threshold: 0.5,
            max_patterns: 1_000,
            warming_tolerance_minutes: 0,
            warming_min_confidence: 0.7,
            memory_pressure_ratio: 0.9,
            eviction_low_water_ratio: 0.7,
            compression_threshold_bytes: Some(10_000),
            scope_keys: vec!["tenant_id".to_string(), "user_id".to_string()],
            eviction_weights: EvictionWeights::default(),
            cleanup_policy: InvalidationPolicy::new().with_min_relevance(0.2),
            autosave: false,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Memory budget in bytes
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_mb == 0 {
            return Err(config_error("max_memory_mb must be greater than 0"));
        }

        if self.max_entries == 0 {
            return Err(config_error("max_entries must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(config_error(
                "similarity_threshold must be between 0.0 and 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(config_error("ttl_jitter must be between 0.0 and 1.0"));
        }

        if !(0.0..=1.0).contains(&self.pattern_match_threshold) {
            return Err(config_error(
                "pattern_match_threshold must be between 0.0 and 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.memory_pressure_ratio) || self.memory_pressure_ratio == 0.0 {
            return Err(config_error(
                "memory_pressure_ratio must be in (0.0, 1.0]",
            ));
        }

        if !(0.0..=self.memory_pressure_ratio).contains(&self.eviction_low_water_ratio)
            || self.eviction_low_water_ratio == 0.0
        {
            return Err(config_error(
                "eviction_low_water_ratio must be in (0.0, memory_pressure_ratio]",
            ));
        }

        if !(0.0..=1.0).contains(&self.warming_min_confidence) {
            return Err(config_error(
                "warming_min_confidence must be between 0.0 and 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.hit_relevance_boost) {
            return Err(config_error(
                "hit_relevance_boost must be between 0.0 and 1.0",
            ));
        }

        if self.compression_threshold_bytes == Some(0) {
            return Err(config_error(
                "compression_threshold_bytes must be greater than 0 when set",
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(config_error("default_ttl must be greater than 0"));
        }

        if self.default_ttl > MAX_TTL {
            return Err(config_error("default_ttl must not exceed 100 years"));
        }

        if self.cleanup_interval.is_zero() || self.warming_interval.is_zero() {
            return Err(config_error(
                "cleanup_interval and warming_interval must be greater than 0",
            ));
        }

        if self.relevance_half_life.is_zero() {
            return Err(config_error("relevance_half_life must be greater than 0"));
        }

        if self.max_patterns == 0 {
            return Err(config_error("max_patterns must be greater than 0"));
        }

        self.eviction_weights.validate()?;

        Ok(())
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }

    /// Load configuration from `SMART_CACHE_*` environment variables,
    /// reading a `.env` file first if one exists.
    ///
    /// Unset variables keep their defaults; unparsable ones are reported as
    /// a configuration error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("SMART_CACHE_MAX_MEMORY_MB")? {
            config.max_memory_mb = v;
        }
        if let Some(v) = env_parse::<usize>("SMART_CACHE_MAX_ENTRIES")? {
            config.max_entries = v;
        }
        if let Some(v) = env_parse::<f64>("SMART_CACHE_SIMILARITY_THRESHOLD")? {
            config.similarity_threshold = v;
        }
        if let Ok(dir) = std::env::var("SMART_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse::<u64>("SMART_CACHE_CLEANUP_INTERVAL_SECONDS")? {
            config.cleanup_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("SMART_CACHE_WARMING_INTERVAL_SECONDS")? {
            config.warming_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("SMART_CACHE_DEFAULT_TTL_SECONDS")? {
            config.default_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("SMART_CACHE_COMPRESSION_THRESHOLD_BYTES")? {
            // 0 turns compression off
            config.compression_threshold_bytes = (v > 0).then_some(v);
        }
        if let Some(v) = env_parse::<bool>("SMART_CACHE_AUTOSAVE")? {
            config.autosave = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn config_error(message: &str) -> CacheError {
    CacheError::ConfigurationError(message.to_string())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            warn!("Invalid value for {}: {:?}", name, raw);
            CacheError::ConfigurationError(format!("{} has an invalid value: {:?}", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_memory_mb: Option<u64>,
    max_entries: Option<usize>,
    similarity_threshold: Option<f64>,
    cache_dir: Option<PathBuf>,
    cleanup_interval: Option<Duration>,
    warming_interval: Option<Duration>,
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    relevance_half_life: Option<Duration>,
    hit_relevance_boost: Option<f64>,
    pattern_match_threshold: Option<f64>,
    max_patterns: Option<usize>,
    warming_tolerance_minutes: Option<u32>,
    warming_min_confidence: Option<f64>,
    memory_pressure_ratio: Option<f64>,
    eviction_low_water_ratio: Option<f64>,
    compression_threshold_bytes: Option<Option<usize>>,
    scope_keys: Option<Vec<String>>,
    eviction_weights: Option<EvictionWeights>,
    cleanup_policy: Option<InvalidationPolicy>,
    autosave: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set the memory budget in megabytes
    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = Some(mb);
        self
    }

    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set similarity threshold for approximate hits
    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    /// Set snapshot directory
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set warming interval
    pub fn warming_interval(mut self, interval: Duration) -> Self {
        self.warming_interval = Some(interval);
        self
    }

    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set relevance half-life
    pub fn relevance_half_life(mut self, half_life: Duration) -> Self {
        self.relevance_half_life = Some(half_life);
        self
    }

    /// Set relevance restored on every hit
    pub fn hit_relevance_boost(mut self, boost: f64) -> Self {
        self.hit_relevance_boost = Some(boost);
        self
    }

    /// Set keyword overlap needed to merge queries into one pattern
    pub fn pattern_match_threshold(mut self, threshold: f64) -> Self {
        self.pattern_match_threshold = Some(threshold);
        self
    }

    /// Set maximum number of usage patterns
    pub fn max_patterns(mut self, max: usize) -> Self {
        self.max_patterns = Some(max);
        self
    }

    /// Set warming tolerance window in minutes
    pub fn warming_tolerance_minutes(mut self, minutes: u32) -> Self {
        self.warming_tolerance_minutes = Some(minutes);
        self
    }

    /// Set minimum confidence for background warming
    pub fn warming_min_confidence(mut self, confidence: f64) -> Self {
        self.warming_min_confidence = Some(confidence);
        self
    }

    /// Set the fraction of the memory budget that triggers eviction on write
    pub fn memory_pressure_ratio(mut self, ratio: f64) -> Self {
        self.memory_pressure_ratio = Some(ratio);
        self
    }

    /// Set the fraction of both budgets a write-triggered eviction frees down to
    pub fn eviction_low_water_ratio(mut self, ratio: f64) -> Self {
        self.eviction_low_water_ratio = Some(ratio);
        self
    }

    /// Compress entries larger than `bytes` during memory optimization
    pub fn compression_threshold_bytes(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = Some(Some(bytes));
        self
    }

    /// Never compress entries
    pub fn disable_compression(mut self) -> Self {
        self.compression_threshold_bytes = Some(None);
        self
    }

    /// Set context keys that bound cross-context reuse
    pub fn scope_keys(mut self, keys: Vec<String>) -> Self {
        self.scope_keys = Some(keys);
        self
    }

    /// Set eviction score weights
    pub fn eviction_weights(mut self, weights: EvictionWeights) -> Self {
        self.eviction_weights = Some(weights);
        self
    }

    /// Set the background cleanup policy
    pub fn cleanup_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.cleanup_policy = Some(policy);
        self
    }

    /// Enable or disable snapshot after each cleanup pass
    pub fn autosave(mut self, enable: bool) -> Self {
        self.autosave = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_memory_mb: self.max_memory_mb.unwrap_or(defaults.max_memory_mb),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            warming_interval: self.warming_interval.unwrap_or(defaults.warming_interval),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            relevance_half_life: self
                .relevance_half_life
                .unwrap_or(defaults.relevance_half_life),
            hit_relevance_boost: self
                .hit_relevance_boost
                .unwrap_or(defaults.hit_relevance_boost),
            pattern_match_threshold: self
                .pattern_match_threshold
                .unwrap_or(defaults.pattern_match_threshold),
            max_patterns: self.max_patterns.unwrap_or(defaults.max_patterns),
            warming_tolerance_minutes: self
                .warming_tolerance_minutes
                .unwrap_or(defaults.warming_tolerance_minutes),
            warming_min_confidence: self
                .warming_min_confidence
                .unwrap_or(defaults.warming_min_confidence),
            memory_pressure_ratio: self
                .memory_pressure_ratio
                .unwrap_or(defaults.memory_pressure_ratio),
            eviction_low_water_ratio: self
                .eviction_low_water_ratio
                .unwrap_or(defaults.eviction_low_water_ratio),
            compression_threshold_bytes: self
                .compression_threshold_bytes
                .unwrap_or(defaults.compression_threshold_bytes),
            scope_keys: self.scope_keys.unwrap_or(defaults.scope_keys),
            eviction_weights: self.eviction_weights.unwrap_or(defaults.eviction_weights),
            cleanup_policy: self.cleanup_policy.unwrap_or(defaults.cleanup_policy),
            autosave: self.autosave.unwrap_or(defaults.autosave),
        }
    }
}
