//! Cache entry with TTL, access and relevance bookkeeping

use crate::cache::compression::CompressedContent;
use crate::cache::key::{cache_key, hash_context, hash_query, scope_hash};
use crate::cache::types::{CacheKey, CacheValue, QueryContext};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Tag carried by entries written through `cache_response_components`
pub const TAG_FULL_RESPONSE: &str = "full_response";
/// Tag carried by placeholder entries created by warming
pub const TAG_WARMED: &str = "warmed";
/// Tag marking content that was predicted rather than computed
pub const TAG_PREDICTED: &str = "predicted";

/// One cached query -> response unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Unique key, `query_hash:context_hash`
    pub key: CacheKey,

    /// Cached response payload; `Null` while the entry is compressed
    pub content: CacheValue,

    /// Gzip form of the payload, set by memory optimization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<CompressedContent>,

    /// Query text the response was computed for
    pub query: String,

    /// Context the response was computed under
    pub context: QueryContext,

    /// When the entry was created
    pub timestamp: DateTime<Utc>,

    /// Last access time (for recency scoring)
    pub last_accessed: DateTime<Utc>,

    /// Number of hits served by this entry
    pub access_count: u64,

    pub context_hash: String,
    pub query_hash: String,

    /// Digest of the tenant/user subset of the context
    pub scope_hash: String,

    /// Estimated usefulness in [0, 1]
    pub relevance_score: f64,

    /// When `relevance_score` was last decayed or boosted
    pub relevance_updated_at: DateTime<Utc>,

    /// Byte size of the serialized content
    pub size_bytes: usize,

    /// Absolute expiry; `None` never expires
    pub expiry_time: Option<DateTime<Utc>>,

    /// Provenance and categorization markers
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    /// Create an entry for `query` under `context` with full relevance and no expiry
    pub fn new(
        query: impl Into<String>,
        context: QueryContext,
        content: CacheValue,
        scope_keys: &[String],
    ) -> Self {
        let query = query.into();
        let now = Utc::now();
        let query_hash = hash_query(&query);
        let context_hash = hash_context(&context);

        Self {
            key: cache_key(&query_hash, &context_hash),
            size_bytes: serialized_size(&content),
            content,
            compressed: None,
            scope_hash: scope_hash(&context, scope_keys),
            query,
            context,
            timestamp: now,
            last_accessed: now,
            access_count: 0,
            context_hash,
            query_hash,
            relevance_score: 1.0,
            relevance_updated_at: now,
            expiry_time: None,
            tags: BTreeSet::new(),
        }
    }

    /// Expire `ttl` from now. A TTL beyond the representable time range
    /// leaves the entry without expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiry_time = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.timestamp.checked_add_signed(ttl));
        self
    }

    /// Expire at an absolute time
    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expiry_time = Some(expires_at);
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.set_relevance(score);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time.map(|t| now > t).unwrap_or(false)
    }

    /// Get time until expiration, `None` if expired or never expiring
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let expiry = self.expiry_time?;
        (expiry - Utc::now()).to_std().ok()
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Get the age of the entry
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Get time since last access
    pub fn time_since_access(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_accessed)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// Set relevance, clamped to [0, 1]
    pub fn set_relevance(&mut self, score: f64) {
        self.relevance_score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
    }

    /// Check if entry has a specific tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether this is a warming placeholder rather than a computed response
    pub fn is_warmed(&self) -> bool {
        self.has_tag(TAG_WARMED)
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed.is_some()
    }

    /// Replace the payload with its gzip form when that is smaller.
    ///
    /// Returns whether the entry was compressed; `size_bytes` follows the
    /// stored form.
    pub fn compress(&mut self) -> Result<bool> {
        if self.compressed.is_some() {
            return Ok(false);
        }
        let packed = CompressedContent::encode(&self.content)?;
        if packed.compressed_size() >= self.size_bytes {
            return Ok(false);
        }
        self.size_bytes = packed.compressed_size();
        self.content = CacheValue::Null;
        self.compressed = Some(packed);
        Ok(true)
    }

    /// The response payload, decompressed if needed
    pub fn response(&self) -> Result<CacheValue> {
        match &self.compressed {
            Some(packed) => packed.decode(),
            None => Ok(self.content.clone()),
        }
    }
}

/// Byte size of a value's JSON encoding
pub fn serialized_size(value: &CacheValue) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
