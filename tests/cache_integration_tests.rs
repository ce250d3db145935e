//! Integration tests for the smart cache
//!
//! These tests exercise the public manager API end to end:
//! - Exact and similarity lookups
//! - Component reuse
//! - Relevance-based invalidation
//! - Pattern learning and predictive warming
//! - Metrics
//! - Concurrency and throughput

use chrono::{Duration as ChronoDuration, Local, NaiveTime, Utc};
use serde::Serialize;
use serde_json::json;
use smart_cache::cache::{
    is_warmed_placeholder, CacheEntry, CacheConfig, FixedScorer, InvalidationPolicy,
    QueryContext, SmartCacheManager, UsagePattern, TAG_PREDICTED, TAG_WARMED,
};
use smart_cache::CacheError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ctx(pairs: &[(&str, &str)]) -> QueryContext {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn manager() -> SmartCacheManager {
    SmartCacheManager::new(CacheConfig::default()).unwrap()
}

fn pattern(query: &str, times: &[String], confidence: f64) -> UsagePattern {
    UsagePattern {
        query_pattern: query.to_string(),
        frequency: 10,
        time_patterns: times.iter().cloned().collect(),
        context_patterns: BTreeSet::from(["user:alice".to_string()]),
        user_patterns: BTreeSet::from(["alice".to_string()]),
        prediction_confidence: confidence,
        first_seen: Utc::now(),
        last_seen: Utc::now(),
    }
}

#[derive(Serialize)]
struct StockReport {
    ticker: String,
    price: f64,
    signals: Vec<String>,
}

#[tokio::test]
async fn test_cache_then_lookup_returns_response() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice"), ("tenant_id", "acme")]);
    let report = StockReport {
        ticker: "AAPL".to_string(),
        price: 190.5,
        signals: vec!["buy".to_string()],
    };

    cache
        .cache_response_components(
            "stock report for AAPL",
            &context,
            &report,
            &BTreeMap::<String, i32>::new(),
        )
        .await
        .unwrap();

    let hit = cache
        .check_cache_relevance("stock report for AAPL", &context)
        .await;
    assert_eq!(
        hit,
        Some(json!({"ticker": "AAPL", "price": 190.5, "signals": ["buy"]}))
    );
}

#[tokio::test]
async fn test_unrelated_query_misses() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice")]);
    cache
        .cache_response("weather in paris", &context, &"sunny")
        .await
        .unwrap();

    let result = cache
        .check_cache_relevance("quarterly revenue projections", &context)
        .await;
    assert!(result.is_none());
}

#[tokio::test]
async fn test_components_cached_alongside_query() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice")]);
    let components = BTreeMap::from([
        ("stock_data", json!({"AAPL": [189.0, 190.5]})),
        ("market_indicators", json!({"rsi": 61})),
    ]);

    cache
        .cache_response_components("market overview", &context, &"overview", &components)
        .await
        .unwrap();

    let cached = cache.get_cached_components("market overview").await.unwrap();
    assert!(cached.contains_key("stock_data"));
    assert!(cached.contains_key("market_indicators"));

    // Later writes merge, new values win
    cache
        .cache_response_components(
            "market overview",
            &context,
            &"overview v2",
            &BTreeMap::from([("market_indicators", json!({"rsi": 70}))]),
        )
        .await
        .unwrap();
    let cached = cache.get_cached_components("market overview").await.unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached["market_indicators"], json!({"rsi": 70}));
}

#[tokio::test]
async fn test_invalidation_removes_expired_and_irrelevant() {
    let cache = manager();
    let expired = CacheEntry::new("expired", QueryContext::new(), json!(1), &[])
        .with_expiration(Utc::now() - ChronoDuration::minutes(5));
    let irrelevant =
        CacheEntry::new("irrelevant", QueryContext::new(), json!(2), &[]).with_relevance(0.1);
    let relevant =
        CacheEntry::new("relevant", QueryContext::new(), json!(3), &[]).with_relevance(0.9);
    let relevant_key = relevant.key.clone();

    cache.store().set(expired).await;
    cache.store().set(irrelevant).await;
    cache.store().set(relevant).await;

    let removed = cache
        .implement_intelligent_invalidation(&InvalidationPolicy::new().with_min_relevance(0.3))
        .await;

    assert_eq!(removed, 2);
    let remaining = cache.store().all().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, relevant_key);
}

#[tokio::test]
async fn test_invalidation_on_context_change() {
    let cache = manager();
    let old_plan = ctx(&[("user_id", "alice"), ("plan", "free")]);
    let new_plan = ctx(&[("user_id", "alice"), ("plan", "pro")]);
    cache
        .cache_response("what can I do", &old_plan, &"limited features")
        .await
        .unwrap();
    cache
        .cache_response("what can I do", &new_plan, &"all features")
        .await
        .unwrap();
    cache
        .cache_response("unrelated", &QueryContext::new(), &"kept")
        .await
        .unwrap();

    let policy = InvalidationPolicy::new().with_context_change("plan", "pro");
    assert_eq!(cache.implement_intelligent_invalidation(&policy).await, 1);

    assert!(cache.check_cache_relevance("what can I do", &old_plan).await.is_none());
    assert_eq!(
        cache.check_cache_relevance("what can I do", &new_plan).await,
        Some(json!("all features"))
    );
    assert_eq!(cache.store().len().await, 2);
}

#[tokio::test]
async fn test_invalidation_drops_orphaned_components() {
    let cache = manager();
    let context = QueryContext::new();
    cache
        .cache_response_components(
            "fading query",
            &context,
            &"answer",
            &BTreeMap::from([("part", 1)]),
        )
        .await
        .unwrap();

    let policy = InvalidationPolicy::new().with_min_relevance(1.1);
    assert_eq!(cache.implement_intelligent_invalidation(&policy).await, 1);
    assert!(cache.get_cached_components("fading query").await.is_none());
    assert_eq!(cache.get_cache_metrics().await.memory_usage_bytes, 0);
}

#[tokio::test]
async fn test_warming_matches_exactly_one_pattern() {
    let cache = manager();
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let patterns = vec![
        pattern("morning briefing", &["09:00".to_string()], 0.9),
        pattern("late digest", &["23:59".to_string()], 0.9),
    ];

    let warmed = cache.warm_cache_at(&patterns, nine).await;
    assert_eq!(warmed, 1);

    let entries = cache.store().all().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].has_tag(TAG_WARMED));
    assert!(entries[0].has_tag(TAG_PREDICTED));
    assert_eq!(entries[0].query, "morning briefing");

    // Second pass leaves the placeholder alone
    assert_eq!(cache.warm_cache_at(&patterns, nine).await, 0);
}

#[tokio::test]
async fn test_warming_against_current_time() {
    let cache = manager();
    let now = Local::now();
    // Cover a minute rollover between here and the warming call
    let times = vec![
        now.format("%H:%M").to_string(),
        (now + ChronoDuration::minutes(1)).format("%H:%M").to_string(),
    ];
    let patterns = vec![pattern("inbox summary", &times, 0.8)];

    assert_eq!(cache.warm_cache_based_on_patterns(&patterns).await, 1);

    // The placeholder is served for the pattern's own query and context
    let hit = cache
        .check_cache_relevance("inbox summary", &ctx(&[("user_id", "alice")]))
        .await
        .unwrap();
    assert!(is_warmed_placeholder(&hit));
    assert_eq!(hit["confidence"], json!(0.8));

    let metrics = cache.get_cache_metrics().await;
    assert_eq!(metrics.warmed_entries, 1);
    assert_eq!(metrics.warming_success_rate, 1.0);
}

#[tokio::test]
async fn test_pattern_learning_from_similar_queries() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice")]);

    for city in ["paris", "london", "berlin"] {
        cache
            .cache_response(&format!("weather in {}", city), &context, &"forecast")
            .await
            .unwrap();
    }

    let patterns = cache.usage_patterns().await;
    assert_eq!(patterns.len(), 1);
    assert!(patterns[0].frequency >= 3);
    assert!(!patterns[0].time_patterns.is_empty());
    assert!(patterns[0].context_patterns.contains("user:alice"));
}

#[tokio::test]
async fn test_metrics_after_hit_and_miss() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice")]);
    cache
        .cache_response("weather in paris", &context, &"sunny")
        .await
        .unwrap();

    assert!(cache
        .check_cache_relevance("weather in paris", &context)
        .await
        .is_some());
    assert!(cache
        .check_cache_relevance("completely different topic", &context)
        .await
        .is_none());

    let metrics = cache.get_cache_metrics().await;
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.hit_rate, 0.5);
    assert_eq!(metrics.miss_rate, 0.5);
    assert!(metrics.memory_usage_bytes > 0);

    cache.reset_metrics();
    let metrics = cache.get_cache_metrics().await;
    assert_eq!(metrics.total_requests, 0);
    // Reset counters, not contents
    assert_eq!(metrics.entry_count, 1);
}

#[tokio::test]
async fn test_cross_tenant_isolation() {
    let cache = SmartCacheManager::with_scorer(CacheConfig::default(), Arc::new(FixedScorer(1.0)))
        .unwrap();
    let acme = ctx(&[("tenant_id", "acme"), ("user_id", "alice")]);
    cache
        .cache_response("payroll summary", &acme, &"acme payroll")
        .await
        .unwrap();

    // Same user id, different tenant, even with cross-context opt-in
    let globex = ctx(&[
        ("tenant_id", "globex"),
        ("user_id", "alice"),
        ("allow_cross_context", "true"),
    ]);
    assert!(cache
        .check_cache_relevance("payroll summary", &globex)
        .await
        .is_none());

    // Exact query text under another context is still a different key
    let other_user = ctx(&[("tenant_id", "acme"), ("user_id", "bob")]);
    assert!(cache
        .check_cache_relevance("payroll summary", &other_user)
        .await
        .is_none());
}

#[tokio::test]
async fn test_serialization_failure_is_atomic() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice")]);
    let bad_components: std::collections::HashMap<(i32, i32), &str> =
        [((1, 2), "tuple keys cannot become JSON object keys")]
            .into_iter()
            .collect();

    let result = cache
        .cache_response_components("bad write", &context, &"fine", &bad_components)
        .await;

    assert!(matches!(result, Err(CacheError::SerializationError(_))));
    assert!(cache.store().is_empty().await);
    assert!(cache.get_cached_components("bad write").await.is_none());
    assert!(cache
        .check_cache_relevance("bad write", &context)
        .await
        .is_none());
}

#[tokio::test]
async fn test_memory_optimization_respects_budgets() {
    let config = CacheConfig::builder().max_entries(1_000).build();
    let cache = SmartCacheManager::new(config).unwrap();
    let context = QueryContext::new();

    for i in 0..20 {
        cache
            .cache_response(&format!("entry number {}", i), &context, &"x".repeat(100))
            .await
            .unwrap();
    }

    // Nothing to do inside the budget
    let report = cache.optimize_cache_memory_usage().await;
    assert_eq!(report.evicted_entries, 0);
    assert_eq!(report.initial_entries, 20);
    assert_eq!(report.to_map()["final_entries"], 20);
}

#[tokio::test]
async fn test_fresh_write_survives_full_cache() {
    let config = CacheConfig::builder().max_entries(2).build();
    let cache = SmartCacheManager::new(config).unwrap();
    let context = ctx(&[("user_id", "alice")]);

    for (i, query) in ["alpha forecast", "beta forecast"].iter().enumerate() {
        cache.cache_response(query, &context, &i).await.unwrap();
        for _ in 0..10 {
            assert!(cache.check_cache_relevance(query, &context).await.is_some());
        }
    }

    // Lowest eviction score of the three, yet it must be served right away
    cache
        .cache_response("gamma forecast", &context, &3)
        .await
        .unwrap();
    assert_eq!(
        cache.check_cache_relevance("gamma forecast", &context).await,
        Some(json!(3))
    );
    assert!(cache.store().len().await <= 2);
}

#[tokio::test]
async fn test_large_response_compressed_and_served() {
    let cache = manager();
    let context = ctx(&[("user_id", "alice")]);
    let article = json!({"title": "Annual report", "body": "revenue grew steadily. ".repeat(2_000)});
    let key = cache
        .cache_response("annual report", &context, &article)
        .await
        .unwrap();
    cache.cache_response("short note", &context, &"tiny").await.unwrap();

    let report = cache.optimize_cache_memory_usage().await;

    assert_eq!(report.compressed_entries, 1);
    assert_eq!(report.evicted_entries, 0);
    assert!(report.memory_saved_bytes > 0);
    assert!(cache.store().get(&key).await.unwrap().is_compressed());
    assert_eq!(
        cache.check_cache_relevance("annual report", &context).await,
        Some(article)
    );
}

#[tokio::test]
async fn test_unrepresentable_ttl_rejected() {
    let config = CacheConfig::builder()
        .default_ttl(Duration::from_secs(1_000_000 * 365 * 24 * 3600))
        .build();
    assert!(matches!(
        SmartCacheManager::new(config),
        Err(CacheError::ConfigurationError(_))
    ));
}

#[tokio::test]
async fn test_concurrent_writes_and_reads() {
    let cache = Arc::new(manager());

    let writers = (0..50).map(|i| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            let context = ctx(&[("user_id", "alice")]);
            cache
                .cache_response(&format!("concurrent query {}", i), &context, &i)
                .await
        })
    });
    for result in futures::future::join_all(writers).await {
        tokio_test::assert_ok!(result.unwrap());
    }

    let readers = (0..50).map(|i| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            let context = ctx(&[("user_id", "alice")]);
            cache
                .check_cache_relevance(&format!("concurrent query {}", i), &context)
                .await
        })
    });
    let hits = futures::future::join_all(readers).await;
    assert!(hits.iter().all(|h| matches!(h, Ok(Some(_)))));

    let metrics = cache.get_cache_metrics().await;
    assert_eq!(metrics.entry_count, 50);
    assert_eq!(metrics.cache_hits, 50);
}

#[tokio::test]
async fn test_same_key_race_last_write_wins() {
    let cache = Arc::new(manager());
    let context = ctx(&[("user_id", "alice")]);

    let tasks = (0..20).map(|i| {
        let cache = Arc::clone(&cache);
        let context = context.clone();
        tokio::spawn(async move { cache.cache_response("shared", &context, &i).await })
    });
    futures::future::join_all(tasks).await;

    assert_eq!(cache.store().len().await, 1);
    let value = cache
        .check_cache_relevance("shared", &context)
        .await
        .unwrap();
    assert!(value.as_i64().map(|v| (0..20).contains(&v)).unwrap_or(false));
}

#[tokio::test]
async fn test_hundred_entries_throughput() {
    let cache = manager();
    let context = ctx(&[("user_id", "loadtest")]);
    let start = Instant::now();

    for i in 0..100 {
        cache
            .cache_response(
                &format!("load test query {}", i),
                &context,
                &json!({"result": i}),
            )
            .await
            .unwrap();
    }
    for i in 0..100 {
        let hit = cache
            .check_cache_relevance(&format!("load test query {}", i), &context)
            .await;
        assert_eq!(hit, Some(json!({"result": i})));
    }

    assert!(start.elapsed() < Duration::from_secs(5));
    let metrics = cache.get_cache_metrics().await;
    assert_eq!(metrics.cache_hits, 100);
    assert_eq!(metrics.hit_rate, 1.0);
}
