//! Smart cache manager facade
//!
//! [`SmartCacheManager`] owns one cache instance: the entry/component store,
//! the usage pattern tracker, metrics and the background loops. There is no
//! process-wide instance; two managers never share state except through a
//! snapshot on disk.

use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, TAG_FULL_RESPONSE};
use crate::cache::invalidation::InvalidationPolicy;
use crate::cache::key::{allows_cross_context, cache_key, hash_context, hash_query, scope_hash};
use crate::cache::memory::{MemoryOptimizer, OptimizationReport};
use crate::cache::patterns::{UsagePattern, UsagePatternTracker};
use crate::cache::persistence::{CacheSnapshot, PersistenceAdapter};
use crate::cache::relevance::RelevanceEngine;
use crate::cache::similarity::{QuerySimilarityScorer, TokenOverlapScorer};
use crate::cache::store::CacheStore;
use crate::cache::tasks::{BackgroundTasks, TaskState};
use crate::cache::types::{
    CacheKey, CacheMetrics, CacheValue, ComponentMap, HitKind, MetricsRecorder, QueryContext,
};
use crate::cache::warming::WarmingScheduler;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Local, NaiveTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Counts from one background cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub invalidated: usize,
    pub evicted: usize,
}

/// State shared between the facade and the background loops
pub(crate) struct CacheCore {
    config: CacheConfig,
    store: CacheStore,
    tracker: RwLock<UsagePatternTracker>,
    scorer: Arc<dyn QuerySimilarityScorer>,
    relevance: RelevanceEngine,
    optimizer: MemoryOptimizer,
    warming: WarmingScheduler,
    persistence: PersistenceAdapter,
    metrics: MetricsRecorder,
}

fn elapsed_micros(started: Instant) -> u64 {
    started.elapsed().as_micros().min(u64::MAX as u128) as u64
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

impl CacheCore {
    pub(crate) fn new(config: CacheConfig) -> Result<Self> {
        Self::with_scorer(config, Arc::new(TokenOverlapScorer::new()))
    }

    pub(crate) fn with_scorer(
        config: CacheConfig,
        scorer: Arc<dyn QuerySimilarityScorer>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store: CacheStore::new(),
            tracker: RwLock::new(UsagePatternTracker::from_config(&config)),
            relevance: RelevanceEngine::from_config(&config),
            optimizer: MemoryOptimizer::from_config(&config),
            warming: WarmingScheduler::from_config(&config),
            persistence: PersistenceAdapter::from_config(&config),
            metrics: MetricsRecorder::default(),
            scorer,
            config,
        })
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn cache_response<T, C>(
        &self,
        query: &str,
        context: &QueryContext,
        response: &T,
        components: Option<&C>,
    ) -> Result<CacheKey>
    where
        T: Serialize + ?Sized,
        C: Serialize + ?Sized,
    {
        // Serialize everything before touching the store
        let content = serde_json::to_value(response)
            .map_err(|e| CacheError::SerializationError(format!("response: {}", e)))?;
        let components: ComponentMap = match components {
            Some(components) => {
                match serde_json::to_value(components)
                    .map_err(|e| CacheError::SerializationError(format!("components: {}", e)))?
                {
                    CacheValue::Object(map) => map.into_iter().collect(),
                    other => {
                        return Err(CacheError::SerializationError(format!(
                            "components must serialize to a map, got {}",
                            other
                        )))
                    }
                }
            }
            None => ComponentMap::new(),
        };

        let entry = CacheEntry::new(query, context.clone(), content, &self.config.scope_keys)
            .with_ttl(self.config.ttl_with_jitter())
            .with_tag(TAG_FULL_RESPONSE);
        let key = entry.key.clone();
        let query_hash = entry.query_hash.clone();

        {
            let mut state = self.store.write().await;
            debug!("Caching response for key: {} ({} bytes)", key, entry.size_bytes);
            state.insert(entry);
            state.merge_components(&query_hash, components);

            if self.optimizer.under_pressure(&state) {
                let report = self.optimizer.relieve_pressure(&mut state, Utc::now(), &key);
                if report.evicted_entries > 0 {
                    warn!(
                        "Cache under memory pressure, evicted {} entries ({} bytes freed)",
                        report.evicted_entries, report.memory_saved_bytes
                    );
                    self.metrics
                        .record_evictions(report.evicted_entries as usize);
                }
            }
        }

        self.tracker.write().await.observe(query, context);
        Ok(key)
    }

    async fn check_relevance(&self, query: &str, context: &QueryContext) -> Option<CacheValue> {
        let started = Instant::now();
        let now = Utc::now();
        let query_hash = hash_query(query);
        let context_hash = hash_context(context);
        let key = cache_key(&query_hash, &context_hash);

        let mut state = self.store.write().await;

        // Exact key
        let mut unusable = false;
        if let Some(entry) = state.get_mut(&key) {
            if self.relevance.is_live(entry, now) {
                match entry.response() {
                    Ok(content) => {
                        self.relevance.record_hit(entry, now);
                        drop(state);
                        self.metrics
                            .record_hit(HitKind::Exact, elapsed_micros(started));
                        debug!("Exact cache hit: {}", key);
                        return Some(content);
                    }
                    Err(e) => error!("Unreadable cache entry {}: {}", key, e),
                }
            }
            unusable = true;
        }
        if unusable {
            state.remove(&key);
            self.metrics.record_invalidations(1);
            debug!("Dropped expired or unreadable cache entry on lookup: {}", key);
        }

        // Best similarity match among compatible live entries
        let cross_context = allows_cross_context(context);
        let caller_scope = scope_hash(context, &self.config.scope_keys);
        let mut best: Option<(f64, DateTime<Utc>, CacheKey)> = None;

        for entry in state.entries() {
            if !self.relevance.is_live(entry, now) {
                continue;
            }
            let compatible = entry.context_hash == context_hash
                || (cross_context && entry.scope_hash == caller_scope);
            if !compatible {
                continue;
            }

            let score = clamp_score(self.scorer.score(query, &entry.query, context, &entry.context));
            let better = match &best {
                None => true,
                Some((best_score, best_access, _)) => {
                    score > *best_score
                        || (score == *best_score && entry.last_accessed > *best_access)
                }
            };
            if better {
                best = Some((score, entry.last_accessed, entry.key.clone()));
            }
        }

        let threshold = self.config.similarity_threshold;
        if let Some((score, _, matched)) = best.filter(|(s, _, _)| *s > 0.0 && *s >= threshold) {
            if let Some(entry) = state.get_mut(&matched) {
                match entry.response() {
                    Ok(content) => {
                        self.relevance.record_hit(entry, now);
                        drop(state);
                        self.metrics
                            .record_hit(HitKind::Similarity, elapsed_micros(started));
                        debug!(
                            "Similarity cache hit via {} (score {:.3}, scorer {})",
                            matched,
                            score,
                            self.scorer.name()
                        );
                        return Some(content);
                    }
                    Err(e) => {
                        error!("Unreadable cache entry {}: {}", matched, e);
                        state.remove(&matched);
                        self.metrics.record_invalidations(1);
                    }
                }
            }
        }

        drop(state);
        self.metrics.record_miss(elapsed_micros(started));
        debug!("Cache miss for query hash: {}", query_hash);
        None
    }

    async fn invalidate(&self, policy: &InvalidationPolicy) -> usize {
        let removed = {
            let mut state = self.store.write().await;
            self.relevance.invalidate(&mut state, policy, Utc::now())
        };

        if !removed.is_empty() {
            info!("Invalidated {} cache entries", removed.len());
        }
        self.metrics.record_invalidations(removed.len());
        removed.len()
    }

    async fn warm_at(&self, patterns: &[UsagePattern], now: NaiveTime) -> usize {
        let outcome = {
            let mut state = self.store.write().await;
            self.warming.warm(&mut state, patterns, now)
        };

        self.metrics.record_warming(outcome.matched, outcome.inserted);
        if outcome.matched > 0 {
            info!(
                "Cache warming at {}: {} patterns due, {} placeholders inserted",
                now.format("%H:%M"),
                outcome.matched,
                outcome.inserted
            );
        }
        outcome.inserted
    }

    async fn optimize(&self) -> OptimizationReport {
        let report = {
            let mut state = self.store.write().await;
            self.optimizer.optimize(&mut state, Utc::now())
        };
        self.metrics
            .record_evictions(report.evicted_entries as usize);
        report
    }

    async fn metrics(&self) -> CacheMetrics {
        let (memory, entries) = {
            let state = self.store.read().await;
            (state.memory_usage_bytes() as u64, state.len())
        };
        self.metrics.snapshot(memory, entries)
    }

    /// Capture store then tracker, in lock order
    async fn snapshot(&self) -> CacheSnapshot {
        let state = self.store.read().await;
        let (entries, components) = state.export();
        let patterns = self.tracker.read().await.patterns().to_vec();
        drop(state);
        CacheSnapshot::new(entries, components, patterns)
    }

    pub(crate) async fn save(&self) -> Result<PathBuf> {
        let snapshot = self.snapshot().await;
        let path = self.persistence.save(&snapshot).await?;
        info!(
            "Saved cache snapshot with {} entries and {} patterns to {}",
            snapshot.entries.len(),
            snapshot.patterns.len(),
            path.display()
        );
        Ok(path)
    }

    pub(crate) async fn load(&self) -> Result<bool> {
        let snapshot = match self.persistence.load().await? {
            Some(snapshot) => snapshot,
            None => return Ok(false),
        };

        let entry_count = snapshot.entries.len();
        let pattern_count = snapshot.patterns.len();
        {
            let mut state = self.store.write().await;
            state.replace(snapshot.entries.into_values(), snapshot.components);
            self.tracker.write().await.replace(snapshot.patterns);
        }

        info!(
            "Loaded cache snapshot from {} ({} entries, {} patterns, saved {})",
            self.persistence.snapshot_path().display(),
            entry_count,
            pattern_count,
            snapshot.saved_at
        );
        Ok(true)
    }

    pub(crate) async fn run_cleanup_pass(&self) -> Result<CleanupSummary> {
        let invalidated = self.invalidate(&self.config.cleanup_policy).await;
        let evicted = self.optimize().await.evicted_entries as usize;
        if self.config.autosave {
            self.save().await?;
        }
        Ok(CleanupSummary {
            invalidated,
            evicted,
        })
    }

    pub(crate) async fn run_warming_pass(&self) -> usize {
        let patterns = self
            .tracker
            .read()
            .await
            .confident_patterns(self.config.warming_min_confidence);
        if patterns.is_empty() {
            return 0;
        }
        self.warm_at(&patterns, Local::now().time()).await
    }
}

/// Semantic response cache with predictive warming and background maintenance
///
/// # Example
///
/// ```no_run
/// use smart_cache::{CacheConfig, QueryContext, SmartCacheManager};
///
/// # async fn example() -> smart_cache::Result<()> {
/// let cache = SmartCacheManager::new(CacheConfig::default())?;
/// let mut context = QueryContext::new();
/// context.insert("user_id".to_string(), "alice".to_string());
///
/// if cache.check_cache_relevance("weather in paris", &context).await.is_none() {
///     let answer = "Sunny, 21°C";
///     cache.cache_response("weather in paris", &context, &answer).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct SmartCacheManager {
    core: Arc<CacheCore>,
    tasks: Mutex<BackgroundTasks>,
}

impl std::fmt::Debug for SmartCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartCacheManager")
            .field("config", &self.core.config)
            .field("scorer", &self.core.scorer.name())
            .finish()
    }
}

impl SmartCacheManager {
    /// Create a manager with the default token-overlap scorer.
    ///
    /// Fails with [`CacheError::ConfigurationError`] on an invalid config.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::from_core(CacheCore::new(config)?)
    }

    /// Create a manager with a custom similarity scorer
    pub fn with_scorer(config: CacheConfig, scorer: Arc<dyn QuerySimilarityScorer>) -> Result<Self> {
        Self::from_core(CacheCore::with_scorer(config, scorer)?)
    }

    fn from_core(core: CacheCore) -> Result<Self> {
        info!(
            "Smart cache initialized (budget {} MB, {} entries, similarity {} >= {})",
            core.config.max_memory_mb,
            core.config.max_entries,
            core.scorer.name(),
            core.config.similarity_threshold
        );
        Ok(Self {
            core: Arc::new(core),
            tasks: Mutex::new(BackgroundTasks::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    /// Direct access to the underlying store
    pub fn store(&self) -> &CacheStore {
        &self.core.store
    }

    /// Cache a computed response together with named reusable components.
    ///
    /// `components` must serialize to a map. Nothing is stored when the
    /// response or any component cannot be serialized.
    pub async fn cache_response_components<T, C>(
        &self,
        query: &str,
        context: &QueryContext,
        response: &T,
        components: &C,
    ) -> Result<CacheKey>
    where
        T: Serialize + ?Sized,
        C: Serialize + ?Sized,
    {
        self.core
            .cache_response(query, context, response, Some(components))
            .await
    }

    /// Cache a computed response without components
    pub async fn cache_response<T>(
        &self,
        query: &str,
        context: &QueryContext,
        response: &T,
    ) -> Result<CacheKey>
    where
        T: Serialize + ?Sized,
    {
        self.core
            .cache_response::<T, ComponentMap>(query, context, response, None)
            .await
    }

    /// Look up a cached response for `query`: exact key first, then the most
    /// similar compatible entry above the similarity threshold.
    ///
    /// Only entries written under the same context are considered, unless the
    /// caller sets `allow_cross_context = "true"`, which widens the search to
    /// entries sharing the caller's tenant/user scope.
    pub async fn check_cache_relevance(
        &self,
        query: &str,
        context: &QueryContext,
    ) -> Option<CacheValue> {
        self.core.check_relevance(query, context).await
    }

    /// Components cached for a query, under any context
    pub async fn get_cached_components(&self, query: &str) -> Option<ComponentMap> {
        self.core.store.components(&hash_query(query)).await
    }

    /// Remove entries the policy rejects: expired, low relevance, too old,
    /// idle, or cached under a context value that has since changed
    pub async fn implement_intelligent_invalidation(&self, policy: &InvalidationPolicy) -> usize {
        self.core.invalidate(policy).await
    }

    /// Insert placeholders for patterns due at the current local time
    pub async fn warm_cache_based_on_patterns(&self, patterns: &[UsagePattern]) -> usize {
        self.core.warm_at(patterns, Local::now().time()).await
    }

    /// Insert placeholders for patterns due at `time`
    pub async fn warm_cache_at(&self, patterns: &[UsagePattern], time: NaiveTime) -> usize {
        self.core.warm_at(patterns, time).await
    }

    /// Compress large entries, then evict low-value entries until memory and
    /// entry budgets hold
    pub async fn optimize_cache_memory_usage(&self) -> OptimizationReport {
        self.core.optimize().await
    }

    pub async fn get_cache_metrics(&self) -> CacheMetrics {
        self.core.metrics().await
    }

    pub fn reset_metrics(&self) {
        self.core.metrics.reset();
    }

    /// Copy of the learned usage patterns
    pub async fn usage_patterns(&self) -> Vec<UsagePattern> {
        self.core.tracker.read().await.patterns().to_vec()
    }

    /// Write a snapshot to `cache_dir`. Failures are logged and reported as `false`.
    pub async fn save_cache_to_disk(&self) -> bool {
        match self.core.save().await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Failed to save cache snapshot to {}: {}",
                    self.core.persistence.snapshot_path().display(),
                    e
                );
                false
            }
        }
    }

    /// Replace the cache with the snapshot in `cache_dir`.
    ///
    /// Returns `false` when there is no snapshot or it cannot be read; the
    /// in-memory cache is left untouched in that case.
    pub async fn load_cache_from_disk(&self) -> bool {
        match self.core.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(
                    "Failed to load cache snapshot from {}: {}",
                    self.core.persistence.snapshot_path().display(),
                    e
                );
                false
            }
        }
    }

    /// Spawn the cleanup and warming loops. No-op when already running.
    pub async fn start_background_tasks(&self) {
        self.tasks.lock().await.start(Arc::clone(&self.core));
    }

    /// Stop both loops and wait for them to finish. No-op when stopped.
    pub async fn stop_background_tasks(&self) {
        self.tasks.lock().await.stop().await;
    }

    pub async fn task_state(&self) -> TaskState {
        self.tasks.lock().await.state()
    }

    pub async fn background_tasks_running(&self) -> bool {
        self.tasks.lock().await.is_running()
    }
}
