//! Cache invalidation policy
//!
//! An entry is invalidated when it has expired, when it was computed under a
//! context value that has since changed, when its decayed relevance falls
//! below `min_relevance`, or when it exceeds the optional age and idle
//! limits. Entries carrying one of `tags_to_exclude` are never invalidated
//! by a policy pass (they can still be evicted for memory).

use crate::cache::entry::CacheEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Reason for cache invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry passed its expiry time
    Expired,

    /// Relevance decayed below the policy threshold
    LowRelevance,

    /// Entry is older than `max_age`
    MaxAge,

    /// Entry has not been read for longer than `max_idle`
    Idle,

    /// Entry was cached under an outdated value of a watched context key
    ContextChanged,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::LowRelevance => write!(f, "relevance below threshold"),
            InvalidationReason::MaxAge => write!(f, "maximum age exceeded"),
            InvalidationReason::Idle => write!(f, "unused for too long"),
            InvalidationReason::ContextChanged => write!(f, "context changed"),
        }
    }
}

/// Criteria for `implement_intelligent_invalidation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationPolicy {
    /// Entries below this relevance are removed
    pub min_relevance: f64,

    /// Entries older than this are removed
    pub max_age: Option<Duration>,

    /// Entries not accessed for this long are removed
    pub max_idle: Option<Duration>,

    /// Entries carrying any of these tags are kept
    pub tags_to_exclude: BTreeSet<String>,

    /// Current value of context keys whose change makes cached answers stale.
    /// An entry whose context holds a different value for one of these keys
    /// is removed; entries without the key are unaffected.
    #[serde(default)]
    pub context_changes: BTreeMap<String, String>,
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self {
            min_relevance: 0.3,
            max_age: None,
            // One week without a hit
            max_idle: Some(Duration::from_secs(7 * 24 * 3600)),
            tags_to_exclude: BTreeSet::new(),
            context_changes: BTreeMap::new(),
        }
    }
}

impl InvalidationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_max_idle(mut self, max_idle: Option<Duration>) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn excluding_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_to_exclude.insert(tag.into());
        self
    }

    /// Invalidate entries cached while `key` had a value other than `current`
    pub fn with_context_change(mut self, key: impl Into<String>, current: impl Into<String>) -> Self {
        self.context_changes.insert(key.into(), current.into());
        self
    }

    fn context_changed(&self, entry: &CacheEntry) -> bool {
        self.context_changes.iter().any(|(key, current)| {
            entry
                .context
                .get(key)
                .map(|cached| cached != current)
                .unwrap_or(false)
        })
    }

    /// Check if an entry should be invalidated at `now`
    pub fn should_invalidate(
        &self,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> Option<InvalidationReason> {
        if self.tags_to_exclude.iter().any(|t| entry.has_tag(t)) {
            return None;
        }

        if entry.is_expired_at(now) {
            return Some(InvalidationReason::Expired);
        }

        if self.context_changed(entry) {
            return Some(InvalidationReason::ContextChanged);
        }

        if entry.relevance_score < self.min_relevance {
            return Some(InvalidationReason::LowRelevance);
        }

        if let Some(max_age) = self.max_age {
            if entry.age(now) > max_age {
                return Some(InvalidationReason::MaxAge);
            }
        }

        if let Some(max_idle) = self.max_idle {
            if entry.time_since_access(now) > max_idle {
                return Some(InvalidationReason::Idle);
            }
        }

        None
    }
}
