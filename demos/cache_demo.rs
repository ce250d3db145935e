//! Smart Cache Demo Application
//!
//! Walks through lookups, component reuse, pattern learning, warming,
//! invalidation, memory optimization and snapshots.
//!
//! Usage:
//!   cargo run --example cache_demo
//!
//! Environment variables (also read from `.env`):
//!   SMART_CACHE_DIR                  - Snapshot directory (default: data/cache)
//!   SMART_CACHE_MAX_MEMORY_MB        - Memory budget (default: 50)
//!   SMART_CACHE_SIMILARITY_THRESHOLD - Minimum similarity for a hit (default: 0.65)
//!   RUST_LOG                         - Log filter (default: smart_cache=info,cache_demo=info)

use chrono::Local;
use serde::Serialize;
use smart_cache::cache::is_warmed_placeholder;
use smart_cache::{CacheConfig, InvalidationPolicy, QueryContext, SmartCacheManager};
use std::collections::BTreeMap;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Serialize)]
struct WeatherReport {
    city: String,
    forecast: String,
    temperature_c: f64,
}

fn user_context(user: &str) -> QueryContext {
    QueryContext::from([
        ("user_id".to_string(), user.to_string()),
        ("session_type".to_string(), "web".to_string()),
    ])
}

/// Stand-in for an expensive model call
fn compute_weather(city: &str) -> WeatherReport {
    WeatherReport {
        city: city.to_string(),
        forecast: "partly cloudy".to_string(),
        temperature_c: 18.5,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("smart_cache=info,cache_demo=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Smart Cache Demo ===");

    let config = CacheConfig::from_env()?;
    info!("Snapshot directory: {}", config.cache_dir.display());
    let cache = SmartCacheManager::new(config)?;

    if cache.load_cache_from_disk().await {
        info!("Restored previous cache snapshot");
    }
    cache.start_background_tasks().await;

    let alice = user_context("alice");

    info!("\n--- Lookups ---");
    for city in ["Paris", "London", "Berlin"] {
        let query = format!("weather in {}", city);
        match cache.check_cache_relevance(&query, &alice).await {
            Some(hit) if is_warmed_placeholder(&hit) => {
                info!("Predicted query '{}' (placeholder {})", query, hit);
            }
            Some(hit) => info!("Cache hit for '{}': {}", query, hit),
            None => {
                let report = compute_weather(city);
                let components = BTreeMap::from([
                    ("forecast", report.forecast.clone()),
                    ("city", report.city.clone()),
                ]);
                cache
                    .cache_response_components(&query, &alice, &report, &components)
                    .await?;
                info!("Computed and cached '{}'", query);
            }
        }
    }

    // A rephrasing is served by similarity
    let rephrased = "what's the weather in paris";
    match cache.check_cache_relevance(rephrased, &alice).await {
        Some(hit) => info!("Similarity hit for '{}': {}", rephrased, hit),
        None => warn!("No similar entry for '{}'", rephrased),
    }

    if let Some(components) = cache.get_cached_components("weather in Paris").await {
        info!("Reusable components: {:?}", components.keys().collect::<Vec<_>>());
    }

    info!("\n--- Usage Patterns ---");
    let patterns = cache.usage_patterns().await;
    for pattern in &patterns {
        info!(
            "'{}' seen {} times at {:?} (confidence {:.2})",
            pattern.query_pattern,
            pattern.frequency,
            pattern.time_patterns,
            pattern.prediction_confidence
        );
    }

    info!("\n--- Warming ---");
    let warmed = cache.warm_cache_at(&patterns, Local::now().time()).await;
    info!("Warmed {} placeholder entries", warmed);

    info!("\n--- Maintenance ---");
    let invalidated = cache
        .implement_intelligent_invalidation(&InvalidationPolicy::new())
        .await;
    info!("Invalidated {} entries", invalidated);

    let report = cache.optimize_cache_memory_usage().await;
    info!("Memory optimization: {:?}", report.to_map());

    info!("\n--- Metrics ---");
    info!("{}", cache.get_cache_metrics().await);

    cache.stop_background_tasks().await;
    if cache.save_cache_to_disk().await {
        info!("Snapshot saved");
    } else {
        warn!("Snapshot could not be saved");
    }

    info!("\n=== Demo Complete ===");
    Ok(())
}
