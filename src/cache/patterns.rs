//! Usage pattern learning
//!
//! Every cached query is reduced to a keyword template (numbers, e-mail
//! addresses and URLs replaced by placeholders, stop words dropped) and
//! folded into the closest known pattern. Patterns remember the local
//! times of day and the users/sessions they were seen with, which is what
//! predictive warming keys on.

use crate::cache::config::CacheConfig;
use crate::cache::similarity::{is_stop_word, tokenize};
use crate::cache::types::QueryContext;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

pub const NUMBER_PLACEHOLDER: &str = "[NUMBER]";
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL]";
pub const URL_PLACEHOLDER: &str = "[URL]";

/// Longest template kept for a query
const MAX_TEMPLATE_TOKENS: usize = 10;

const INITIAL_CONFIDENCE: f64 = 0.5;
const MAX_CONFIDENCE: f64 = 0.95;

/// Context key holding the caller's user id
pub const USER_CONTEXT_KEY: &str = "user_id";
/// Context key holding the caller's session type
pub const SESSION_CONTEXT_KEY: &str = "session_type";

pub const USER_PATTERN_PREFIX: &str = "user:";
pub const SESSION_PATTERN_PREFIX: &str = "session:";

/// A learned recurring query shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePattern {
    /// Space separated keyword template
    pub query_pattern: String,
    pub frequency: u64,
    /// Local times of day ("HH:MM") the pattern was observed at
    pub time_patterns: BTreeSet<String>,
    /// "user:<id>" / "session:<type>" markers
    pub context_patterns: BTreeSet<String>,
    pub user_patterns: BTreeSet<String>,
    pub prediction_confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl UsagePattern {
    fn new(template: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            query_pattern: template.join(" "),
            frequency: 0,
            time_patterns: BTreeSet::new(),
            context_patterns: BTreeSet::new(),
            user_patterns: BTreeSet::new(),
            prediction_confidence: INITIAL_CONFIDENCE,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn tokens(&self) -> BTreeSet<String> {
        self.query_pattern
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn record(&mut self, context: &QueryContext, at: DateTime<Local>) {
        self.frequency += 1;
        self.time_patterns.insert(at.format("%H:%M").to_string());
        if let Some(user) = context.get(USER_CONTEXT_KEY) {
            self.context_patterns
                .insert(format!("{}{}", USER_PATTERN_PREFIX, user));
            self.user_patterns.insert(user.clone());
        }
        if let Some(session) = context.get(SESSION_CONTEXT_KEY) {
            self.context_patterns
                .insert(format!("{}{}", SESSION_PATTERN_PREFIX, session));
        }
        self.prediction_confidence = if self.frequency <= 1 {
            INITIAL_CONFIDENCE
        } else {
            (self.frequency as f64 / 10.0).min(MAX_CONFIDENCE)
        };
        self.last_seen = at.with_timezone(&Utc);
    }

    /// Keep only the keywords shared with `template`, preserving order
    fn narrow_to(&mut self, template: &BTreeSet<String>) {
        let shared: Vec<&str> = self
            .query_pattern
            .split_whitespace()
            .filter(|t| template.contains(*t))
            .collect();
        if !shared.is_empty() {
            self.query_pattern = shared.join(" ");
        }
    }
}

fn looks_like_email(word: &str) -> bool {
    match word.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn looks_like_url(word: &str) -> bool {
    let lower = word.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
}

fn looks_like_number(word: &str) -> bool {
    let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
    !trimmed.is_empty() && trimmed.replace([',', '.'], "").chars().all(|c| c.is_ascii_digit())
}

/// Reduce a query to its keyword template
pub fn query_template(query: &str) -> Vec<String> {
    let mut template = Vec::new();
    for word in query.split_whitespace() {
        if looks_like_url(word) {
            template.push(URL_PLACEHOLDER.to_string());
        } else if looks_like_email(word) {
            template.push(EMAIL_PLACEHOLDER.to_string());
        } else if looks_like_number(word) {
            template.push(NUMBER_PLACEHOLDER.to_string());
        } else {
            template.extend(tokenize(word).into_iter().filter(|t| !is_stop_word(t)));
        }
    }
    template.truncate(MAX_TEMPLATE_TOKENS);
    template
}

/// |A ∩ B| / min(|A|, |B|)
fn overlap_coefficient(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

/// Bounded collection of usage patterns
#[derive(Debug, Clone)]
pub struct UsagePatternTracker {
    patterns: Vec<UsagePattern>,
    match_threshold: f64,
    max_patterns: usize,
}

impl Default for UsagePatternTracker {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl UsagePatternTracker {
    pub fn new(match_threshold: f64, max_patterns: usize) -> Self {
        Self {
            patterns: Vec::new(),
            match_threshold,
            max_patterns: max_patterns.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.pattern_match_threshold, config.max_patterns)
    }

    /// Record a query seen now
    pub fn observe(&mut self, query: &str, context: &QueryContext) -> bool {
        self.observe_at(query, context, Local::now())
    }

    /// Record a query seen at `at`. Returns false when the query has no
    /// keywords to learn from.
    pub fn observe_at(&mut self, query: &str, context: &QueryContext, at: DateTime<Local>) -> bool {
        let template = query_template(query);
        if template.is_empty() {
            return false;
        }
        let template_set: BTreeSet<String> = template.iter().cloned().collect();

        let best = self
            .patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (i, overlap_coefficient(&p.tokens(), &template_set), p.frequency))
            .filter(|(_, overlap, _)| *overlap >= self.match_threshold)
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.2.cmp(&b.2))
            })
            .map(|(i, _, _)| i);

        match best {
            Some(index) => {
                let pattern = &mut self.patterns[index];
                pattern.narrow_to(&template_set);
                pattern.record(context, at);
                debug!(
                    "Updated usage pattern '{}' (frequency {})",
                    pattern.query_pattern, pattern.frequency
                );
            }
            None => {
                let mut pattern = UsagePattern::new(template);
                pattern.first_seen = at.with_timezone(&Utc);
                pattern.record(context, at);
                debug!("New usage pattern '{}'", pattern.query_pattern);
                self.patterns.push(pattern);
                self.enforce_limit();
            }
        }
        true
    }

    /// Drop least-frequent, then least-recently-seen patterns over the limit
    fn enforce_limit(&mut self) {
        while self.patterns.len() > self.max_patterns {
            let victim = self
                .patterns
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.frequency
                        .cmp(&b.frequency)
                        .then(a.last_seen.cmp(&b.last_seen))
                })
                .map(|(i, _)| i);
            match victim {
                Some(index) => {
                    let dropped = self.patterns.swap_remove(index);
                    debug!("Dropped usage pattern '{}'", dropped.query_pattern);
                }
                None => break,
            }
        }
    }

    pub fn patterns(&self) -> &[UsagePattern] {
        &self.patterns
    }

    /// Patterns eligible for background warming
    pub fn confident_patterns(&self, min_confidence: f64) -> Vec<UsagePattern> {
        self.patterns
            .iter()
            .filter(|p| p.prediction_confidence >= min_confidence)
            .cloned()
            .collect()
    }

    /// Replace all patterns, e.g. from a snapshot
    pub fn replace(&mut self, patterns: Vec<UsagePattern>) {
        self.patterns = patterns;
        self.enforce_limit();
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx(user: &str) -> QueryContext {
        let mut ctx = QueryContext::new();
        ctx.insert(USER_CONTEXT_KEY.to_string(), user.to_string());
        ctx
    }

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, hour, minute, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn test_query_template_placeholders() {
        assert_eq!(
            query_template("Email bob@example.com about order 1234 at https://shop.example.com"),
            vec![
                "email",
                EMAIL_PLACEHOLDER,
                "about",
                "order",
                NUMBER_PLACEHOLDER,
                URL_PLACEHOLDER
            ]
        );
    }

    #[test]
    fn test_query_template_drops_stop_words_and_caps_length() {
        assert_eq!(query_template("What is the weather in Paris?"), vec!["weather", "paris"]);

        let long = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        assert_eq!(query_template(long).len(), 10);
        assert!(query_template("is the a").is_empty());
    }

    #[test]
    fn test_similar_queries_share_a_pattern() {
        let mut tracker = UsagePatternTracker::default();
        for city in ["paris", "london", "tokyo"] {
            tracker.observe_at(&format!("weather in {}", city), &ctx("alice"), at(9, 0));
        }

        assert_eq!(tracker.len(), 1);
        let pattern = &tracker.patterns()[0];
        assert!(pattern.frequency >= 3);
        assert_eq!(pattern.query_pattern, "weather");
        assert!(pattern.context_patterns.contains("user:alice"));
        assert!(pattern.user_patterns.contains("alice"));
        assert!(pattern.time_patterns.contains("09:00"));
    }

    #[test]
    fn test_unrelated_queries_get_separate_patterns() {
        let mut tracker = UsagePatternTracker::default();
        tracker.observe_at("weather in paris", &ctx("alice"), at(9, 0));
        tracker.observe_at("stock price apple", &ctx("alice"), at(9, 0));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_confidence_progression() {
        let mut tracker = UsagePatternTracker::default();
        tracker.observe_at("daily report", &ctx("bob"), at(8, 30));
        assert_eq!(tracker.patterns()[0].prediction_confidence, 0.5);

        for _ in 0..6 {
            tracker.observe_at("daily report", &ctx("bob"), at(8, 30));
        }
        assert!((tracker.patterns()[0].prediction_confidence - 0.7).abs() < 1e-9);

        for _ in 0..20 {
            tracker.observe_at("daily report", &ctx("bob"), at(8, 30));
        }
        assert_eq!(tracker.patterns()[0].prediction_confidence, 0.95);
        assert_eq!(tracker.confident_patterns(0.7).len(), 1);
        assert!(tracker.confident_patterns(0.96).is_empty());
    }

    #[test]
    fn test_session_context_pattern() {
        let mut tracker = UsagePatternTracker::default();
        let mut context = ctx("carol");
        context.insert(SESSION_CONTEXT_KEY.to_string(), "mobile".to_string());
        tracker.observe_at("inbox summary", &context, at(7, 45));

        let pattern = &tracker.patterns()[0];
        assert!(pattern.context_patterns.contains("session:mobile"));
        assert!(pattern.context_patterns.contains("user:carol"));
    }

    #[test]
    fn test_max_patterns_drops_least_frequent() {
        let mut tracker = UsagePatternTracker::new(0.5, 2);
        tracker.observe_at("weather forecast", &ctx("a"), at(9, 0));
        tracker.observe_at("weather forecast", &ctx("a"), at(9, 0));
        tracker.observe_at("stock prices", &ctx("a"), at(9, 1));
        tracker.observe_at("football scores", &ctx("a"), at(9, 2));

        assert_eq!(tracker.len(), 2);
        let names: Vec<&str> = tracker
            .patterns()
            .iter()
            .map(|p| p.query_pattern.as_str())
            .collect();
        assert!(names.contains(&"weather forecast"));
        // The older of the two single-hit patterns went first
        assert!(names.contains(&"football scores"));
    }

    #[test]
    fn test_empty_template_is_ignored() {
        let mut tracker = UsagePatternTracker::default();
        assert!(!tracker.observe("what is it", &ctx("a")));
        assert!(tracker.is_empty());
    }
}
