//! # smart-cache
//!
//! Semantic response caching and computation reuse for AI pipelines.
//!
//! ## Overview
//!
//! A [`SmartCacheManager`] answers "have we already computed something close
//! enough to this?" before an expensive model call, and stores the result
//! afterwards. It learns when and by whom queries are asked, warms the cache
//! ahead of predictable demand, keeps itself inside a memory budget and can
//! snapshot its state to disk.
//!
//! ```no_run
//! use smart_cache::{CacheConfig, InvalidationPolicy, QueryContext, SmartCacheManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = SmartCacheManager::new(CacheConfig::from_env()?)?;
//!     cache.load_cache_from_disk().await;
//!     cache.start_background_tasks().await;
//!
//!     let context = QueryContext::from([("user_id".to_string(), "alice".to_string())]);
//!     match cache.check_cache_relevance("stock report for AAPL", &context).await {
//!         Some(hit) => println!("cached: {}", hit),
//!         None => {
//!             let report = serde_json::json!({"summary": "..."});
//!             cache
//!                 .cache_response("stock report for AAPL", &context, &report)
//!                 .await?;
//!         }
//!     }
//!
//!     cache
//!         .implement_intelligent_invalidation(&InvalidationPolicy::new())
//!         .await;
//!     cache.stop_background_tasks().await;
//!     cache.save_cache_to_disk().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber itself;
//! binaries choose one (see `demos/cache_demo.rs`).

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheMetrics, CacheStore, CacheValue,
    ComponentMap, EvictionWeights, FixedScorer, InvalidationPolicy, InvalidationReason,
    OptimizationReport, QueryContext, QuerySimilarityScorer, SmartCacheManager, TaskState,
    TokenOverlapScorer, UsagePattern,
};
pub use error::{CacheError, Result};
