//! Predictive cache warming
//!
//! A pattern is "due" when one of its observed times of day matches the
//! current local time (within a tolerance, wrapping around midnight). Due
//! patterns get a placeholder entry so that the first lookup of the day can
//! tell the caller what is about to be asked for.

use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, TAG_PREDICTED, TAG_WARMED};
use crate::cache::patterns::{
    UsagePattern, SESSION_CONTEXT_KEY, SESSION_PATTERN_PREFIX, USER_CONTEXT_KEY,
    USER_PATTERN_PREFIX,
};
use crate::cache::store::StoreState;
use crate::cache::types::{CacheValue, QueryContext};
use chrono::{NaiveTime, Timelike, Utc};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// `type` field of placeholder content
pub const PREDICTED_CONTENT_TYPE: &str = "predicted";

/// Key set to `true` in placeholder content only. Namespaced so a computed
/// response that happens to carry `"type": "predicted"` is not mistaken
/// for a placeholder.
pub const PLACEHOLDER_MARKER_KEY: &str = "__smart_cache_placeholder";

/// Result of one warming pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmingOutcome {
    /// Patterns whose time window matched
    pub matched: usize,
    /// Placeholders actually inserted
    pub inserted: usize,
}

/// Whether a cached value is a warming placeholder rather than a real response
pub fn is_warmed_placeholder(value: &CacheValue) -> bool {
    value
        .get(PLACEHOLDER_MARKER_KEY)
        .and_then(|marker| marker.as_bool())
        .unwrap_or(false)
}

fn minute_of_day(time: NaiveTime) -> i64 {
    (time.hour() * 60 + time.minute()) as i64
}

/// Minutes between two times of day, going the short way round the clock
fn circular_distance(a: NaiveTime, b: NaiveTime) -> i64 {
    let diff = (minute_of_day(a) - minute_of_day(b)).rem_euclid(MINUTES_PER_DAY);
    diff.min(MINUTES_PER_DAY - diff)
}

/// Context a placeholder is keyed under, rebuilt from the pattern's markers
pub fn placeholder_context(pattern: &UsagePattern) -> QueryContext {
    let mut context = QueryContext::new();
    for marker in &pattern.context_patterns {
        if let Some(user) = marker.strip_prefix(USER_PATTERN_PREFIX) {
            context
                .entry(USER_CONTEXT_KEY.to_string())
                .or_insert_with(|| user.to_string());
        } else if let Some(session) = marker.strip_prefix(SESSION_PATTERN_PREFIX) {
            context
                .entry(SESSION_CONTEXT_KEY.to_string())
                .or_insert_with(|| session.to_string());
        }
    }
    context
}

#[derive(Debug, Clone)]
pub struct WarmingScheduler {
    tolerance_minutes: u32,
    placeholder_ttl: Duration,
    scope_keys: Vec<String>,
}

impl WarmingScheduler {
    pub fn new(tolerance_minutes: u32, placeholder_ttl: Duration, scope_keys: Vec<String>) -> Self {
        Self {
            tolerance_minutes,
            placeholder_ttl,
            scope_keys,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.warming_tolerance_minutes,
            config.default_ttl,
            config.scope_keys.clone(),
        )
    }

    /// Whether any observed time of the pattern falls within the tolerance of `now`
    pub fn is_due(&self, pattern: &UsagePattern, now: NaiveTime) -> bool {
        pattern.time_patterns.iter().any(|raw| {
            match NaiveTime::parse_from_str(raw, "%H:%M") {
                Ok(seen) => circular_distance(seen, now) <= self.tolerance_minutes as i64,
                Err(e) => {
                    warn!("Ignoring malformed time pattern {:?}: {}", raw, e);
                    false
                }
            }
        })
    }

    /// Placeholder entry predicted for `pattern`
    pub fn placeholder(&self, pattern: &UsagePattern) -> CacheEntry {
        let content = json!({
            PLACEHOLDER_MARKER_KEY: true,
            "type": PREDICTED_CONTENT_TYPE,
            "pattern": pattern.query_pattern,
            "confidence": pattern.prediction_confidence,
            "generated_at": Utc::now().to_rfc3339(),
        });

        CacheEntry::new(
            pattern.query_pattern.clone(),
            placeholder_context(pattern),
            content,
            &self.scope_keys,
        )
        .with_ttl(self.placeholder_ttl)
        .with_relevance(pattern.prediction_confidence)
        .with_tag(TAG_WARMED)
        .with_tag(TAG_PREDICTED)
    }

    /// Insert placeholders for every due pattern; existing keys are left alone
    pub fn warm(
        &self,
        state: &mut StoreState,
        patterns: &[UsagePattern],
        now: NaiveTime,
    ) -> WarmingOutcome {
        let mut outcome = WarmingOutcome::default();

        for pattern in patterns.iter().filter(|p| self.is_due(p, now)) {
            outcome.matched += 1;
            let entry = self.placeholder(pattern);
            if state.contains_key(&entry.key) {
                debug!("Skipping warm-up of existing key: {}", entry.key);
                continue;
            }
            debug!(
                "Warming cache for pattern '{}' (confidence {:.2})",
                pattern.query_pattern, pattern.prediction_confidence
            );
            state.insert(entry);
            outcome.inserted += 1;
        }

        outcome
    }
}
