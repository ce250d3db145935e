//! # Smart Response Cache
//!
//! A semantic cache that sits between an AI response pipeline and its
//! callers, so that repeated or closely related questions reuse earlier work
//! instead of paying for another model call.
//!
//! ## Features
//!
//! - **Exact and similarity lookup**: exact key first, then the closest
//!   compatible entry scored by a pluggable [`QuerySimilarityScorer`]
//! - **Context isolation**: entries are only shared across contexts on
//!   explicit opt-in, and never across tenants or users
//! - **Component reuse**: named sub-results cached per query
//! - **Relevance decay**: idle entries lose relevance and are invalidated
//! - **Predictive warming**: learned usage patterns pre-populate placeholders
//! - **Memory bounds**: gzip for large responses and composite-score eviction
//!   under a byte and entry budget
//! - **Snapshots**: crash-safe JSON persistence with schema versioning
//! - **Background maintenance**: cancellable cleanup and warming loops
//!
//! ## Example
//!
//! ```rust
//! use smart_cache::cache::{CacheConfig, QueryContext, SmartCacheManager};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .max_memory_mb(64)
//!     .max_entries(10_000)
//!     .default_ttl(Duration::from_secs(3600))
//!     .build();
//!
//! let cache = SmartCacheManager::new(config)?;
//! let context = QueryContext::from([("user_id".to_string(), "alice".to_string())]);
//!
//! cache
//!     .cache_response("weather in paris", &context, &"Sunny, 21°C")
//!     .await?;
//!
//! if let Some(value) = cache.check_cache_relevance("Weather in Paris", &context).await {
//!     println!("Cache hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod manager;
pub mod memory;
pub mod patterns;
pub mod persistence;
pub mod relevance;
pub mod similarity;
pub mod store;
pub mod tasks;
pub mod types;
pub mod warming;

pub use compression::CompressedContent;
pub use config::{CacheConfig, CacheConfigBuilder, MAX_TTL};
pub use entry::{CacheEntry, TAG_FULL_RESPONSE, TAG_PREDICTED, TAG_WARMED};
pub use invalidation::{InvalidationPolicy, InvalidationReason};
pub use key::CROSS_CONTEXT_FLAG;
pub use manager::{CleanupSummary, SmartCacheManager};
pub use memory::{EvictionWeights, MemoryOptimizer, OptimizationReport};
pub use patterns::{UsagePattern, UsagePatternTracker};
pub use persistence::{CacheSnapshot, PersistenceAdapter};
pub use relevance::RelevanceEngine;
pub use similarity::{FixedScorer, QuerySimilarityScorer, TokenOverlapScorer};
pub use store::CacheStore;
pub use tasks::TaskState;
pub use types::{CacheKey, CacheMetrics, CacheValue, ComponentMap, QueryContext};
pub use warming::{is_warmed_placeholder, WarmingScheduler};
