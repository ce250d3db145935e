//! Relevance scoring and invalidation passes
//!
//! Relevance decays exponentially with the time since it was last refreshed
//! and is partially restored by every hit. Decay is applied lazily: whenever
//! an entry is hit or an invalidation pass visits it.

use crate::cache::config::CacheConfig;
use crate::cache::entry::CacheEntry;
use crate::cache::invalidation::{InvalidationPolicy, InvalidationReason};
use crate::cache::store::StoreState;
use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RelevanceEngine {
    half_life: Duration,
    hit_boost: f64,
}

impl RelevanceEngine {
    pub fn new(half_life: Duration, hit_boost: f64) -> Self {
        Self {
            half_life,
            hit_boost: hit_boost.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.relevance_half_life, config.hit_relevance_boost)
    }

    /// Whether the entry can still be served
    pub fn is_live(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        !entry.is_expired_at(now)
    }

    /// Relevance the entry would have at `now` without mutating it
    pub fn decayed_score(&self, entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - entry.relevance_updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let half_lives = elapsed.as_secs_f64() / self.half_life.as_secs_f64().max(f64::EPSILON);
        entry.relevance_score * 0.5_f64.powf(half_lives)
    }

    /// Apply decay accumulated since the last refresh
    pub fn refresh(&self, entry: &mut CacheEntry, now: DateTime<Utc>) {
        let score = self.decayed_score(entry, now);
        entry.set_relevance(score);
        if now > entry.relevance_updated_at {
            entry.relevance_updated_at = now;
        }
    }

    /// Access bookkeeping for a served hit
    pub fn record_hit(&self, entry: &mut CacheEntry, now: DateTime<Utc>) {
        self.refresh(entry, now);
        entry.mark_accessed(now);
        entry.set_relevance(entry.relevance_score + self.hit_boost);
    }

    /// Refresh every entry and remove those the policy rejects.
    /// Runs entirely under the caller's write guard.
    pub fn invalidate(
        &self,
        state: &mut StoreState,
        policy: &InvalidationPolicy,
        now: DateTime<Utc>,
    ) -> Vec<(CacheKey, InvalidationReason)> {
        let mut doomed = Vec::new();
        for entry in state.entries_mut() {
            self.refresh(entry, now);
            if let Some(reason) = policy.should_invalidate(entry, now) {
                doomed.push((entry.key.clone(), reason));
            }
        }

        for (key, reason) in &doomed {
            debug!("Invalidating cache entry ({}): {}", reason, key);
            state.remove(key);
        }

        doomed
    }
}
