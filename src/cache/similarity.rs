//! Query similarity scoring
//!
//! The manager never hard-codes how two queries are compared: it holds an
//! `Arc<dyn QuerySimilarityScorer>` supplied at construction. The default
//! [`TokenOverlapScorer`] is a Jaccard index over normalized keywords; an
//! embedding-based scorer can be dropped in without touching the cache.

use crate::cache::types::QueryContext;
use std::collections::BTreeSet;

/// Words that carry no topical signal and are dropped before comparison
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "do", "does", "for",
    "from", "get", "give", "how", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or",
    "please", "show", "tell", "that", "the", "this", "to", "was", "what", "whats", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Scores how interchangeable two queries are
pub trait QuerySimilarityScorer: Send + Sync {
    /// Similarity in [0, 1]. Must be deterministic for identical inputs.
    fn score(
        &self,
        query_a: &str,
        query_b: &str,
        context_a: &QueryContext,
        context_b: &QueryContext,
    ) -> f64;

    /// Name used in logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Lower-cased alphanumeric words of `text`, apostrophes folded away
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\'', "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Keyword set used for overlap scoring
pub fn keywords(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| !is_stop_word(w))
        .collect()
}

/// Jaccard index of two sets; two empty sets score 0
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Share of keys on which two contexts agree
fn context_agreement(a: &QueryContext, b: &QueryContext) -> f64 {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if keys.is_empty() {
        return 1.0;
    }
    let agreeing = keys.iter().filter(|k| a.get(**k) == b.get(**k)).count();
    agreeing as f64 / keys.len() as f64
}

/// Jaccard similarity over stop-word-free keyword sets, optionally blended
/// with context agreement
#[derive(Debug, Clone, Default)]
pub struct TokenOverlapScorer {
    context_weight: f64,
}

impl TokenOverlapScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend in context agreement with the given weight (0.0 - 1.0)
    pub fn with_context_weight(mut self, weight: f64) -> Self {
        self.context_weight = weight.clamp(0.0, 1.0);
        self
    }
}

impl QuerySimilarityScorer for TokenOverlapScorer {
    fn score(
        &self,
        query_a: &str,
        query_b: &str,
        context_a: &QueryContext,
        context_b: &QueryContext,
    ) -> f64 {
        let query_score = jaccard(&keywords(query_a), &keywords(query_b));
        if self.context_weight == 0.0 {
            return query_score;
        }
        let context_score = context_agreement(context_a, context_b);
        (1.0 - self.context_weight) * query_score + self.context_weight * context_score
    }

    fn name(&self) -> &'static str {
        "token_overlap"
    }
}

/// Returns the same score for every pair. `FixedScorer(0.0)` disables
/// similarity hits entirely.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer(pub f64);

impl QuerySimilarityScorer for FixedScorer {
    fn score(&self, _: &str, _: &str, _: &QueryContext, _: &QueryContext) -> f64 {
        self.0
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
