//! Cache key derivation
//!
//! Keys and digests are truncated SHA-256 over a canonical form, so they are
//! stable across processes and survive a snapshot round-trip.

use crate::cache::types::{CacheKey, QueryContext};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Context flag that lets a lookup reuse entries written under a different
/// context, as long as the scope (tenant/user) is the same.
pub const CROSS_CONTEXT_FLAG: &str = "allow_cross_context";

const DIGEST_HEX_LEN: usize = 16;

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    hex[..DIGEST_HEX_LEN].to_string()
}

/// Digest of a query, case and surrounding whitespace insensitive
pub fn hash_query(query: &str) -> String {
    digest(query.trim().to_lowercase().as_str())
}

/// Digest of a full context map. The cross-context flag is a lookup hint, not
/// part of the context identity.
pub fn hash_context(context: &QueryContext) -> String {
    let canonical: BTreeMap<&str, &str> = context
        .iter()
        .filter(|(k, _)| k.as_str() != CROSS_CONTEXT_FLAG)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    digest(&serde_json::to_string(&canonical).unwrap_or_default())
}

/// Digest of the scope-defining subset of a context (e.g. tenant and user).
/// Missing keys hash as absent, so "no user" only matches "no user".
pub fn scope_hash(context: &QueryContext, scope_keys: &[String]) -> String {
    let scope: BTreeMap<&str, Option<&str>> = scope_keys
        .iter()
        .map(|k| (k.as_str(), context.get(k).map(String::as_str)))
        .collect();
    digest(&serde_json::to_string(&scope).unwrap_or_default())
}

/// Key for the exact-match path
pub fn cache_key(query_hash: &str, context_hash: &str) -> CacheKey {
    format!("{}:{}", query_hash, context_hash)
}

/// Whether the caller opted into reuse across contexts within its scope
pub fn allows_cross_context(context: &QueryContext) -> bool {
    context
        .get(CROSS_CONTEXT_FLAG)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
