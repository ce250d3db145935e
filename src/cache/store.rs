//! Entry and component storage behind a single store-wide lock
//!
//! Every read and write of the entry map, the component map and the size
//! bookkeeping goes through one `tokio::sync::RwLock`. Maintenance passes
//! (invalidation, eviction, warming) take the write guard once and work on
//! [`StoreState`] directly, so foreground calls never observe a pass half
//! applied.

use crate::cache::entry::{serialized_size, CacheEntry};
use crate::cache::types::{CacheKey, ComponentMap};
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Thread-safe store of cache entries and their reusable components
#[derive(Debug, Default)]
pub struct CacheStore {
    state: RwLock<StoreState>,
}

/// Data guarded by the store lock
#[derive(Debug, Default)]
pub struct StoreState {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// query_hash -> {component name -> value}
    components: HashMap<String, ComponentMap>,

    /// query_hash -> number of live entries with that hash
    query_refs: HashMap<String, usize>,

    /// Sum of `size_bytes` over entries
    entries_bytes: usize,

    /// Serialized size of all component maps
    components_bytes: usize,
}

impl StoreState {
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut CacheEntry> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_bytes(&self) -> usize {
        self.entries_bytes
    }

    pub fn memory_usage_bytes(&self) -> usize {
        self.entries_bytes + self.components_bytes
    }

    pub fn components(&self, query_hash: &str) -> Option<&ComponentMap> {
        self.components.get(query_hash)
    }

    /// Insert or replace an entry, returning the replaced one (last write wins)
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.key.clone();
        self.entries_bytes += entry.size_bytes;
        *self.query_refs.entry(entry.query_hash.clone()).or_insert(0) += 1;

        let replaced = self.entries.insert(key, entry);
        if let Some(old) = &replaced {
            self.entries_bytes = self.entries_bytes.saturating_sub(old.size_bytes);
            self.release_query_ref(&old.query_hash);
            debug!("Replaced cache entry: {}", old.key);
        }
        replaced
    }

    /// Remove an entry; drops its component map once no entry shares the query hash
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.entries_bytes = self.entries_bytes.saturating_sub(entry.size_bytes);
        self.release_query_ref(&entry.query_hash);
        Some(entry)
    }

    /// Merge components for a query hash; new names win on conflict
    pub fn merge_components(&mut self, query_hash: &str, components: ComponentMap) {
        if components.is_empty() {
            return;
        }
        let map = self.components.entry(query_hash.to_string()).or_default();
        let before = component_map_size(map);
        map.extend(components);
        let after = component_map_size(map);
        self.components_bytes = self.components_bytes.saturating_sub(before) + after;
    }

    /// Gzip every uncompressed entry larger than `threshold` bytes, keeping
    /// the byte accounting in step. Returns the number of entries compressed.
    pub fn compress_large_entries(&mut self, threshold: usize) -> usize {
        let mut compressed = 0;
        for entry in self.entries.values_mut() {
            if entry.is_compressed() || entry.size_bytes <= threshold {
                continue;
            }
            let before = entry.size_bytes;
            match entry.compress() {
                Ok(true) => {
                    self.entries_bytes = self.entries_bytes.saturating_sub(before) + entry.size_bytes;
                    compressed += 1;
                    debug!(
                        "Compressed cache entry {} ({} -> {} bytes)",
                        entry.key, before, entry.size_bytes
                    );
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to compress cache entry {}: {}", entry.key, e),
            }
        }
        compressed
    }

    /// Remove every entry
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.components.clear();
        self.query_refs.clear();
        self.entries_bytes = 0;
        self.components_bytes = 0;
        count
    }

    /// Clone out entries and components for a snapshot
    pub fn export(&self) -> (HashMap<CacheKey, CacheEntry>, HashMap<String, ComponentMap>) {
        (self.entries.clone(), self.components.clone())
    }

    /// Replace the whole store contents, rebuilding size bookkeeping.
    /// Component maps with no owning entry are discarded.
    pub fn replace(
        &mut self,
        entries: impl IntoIterator<Item = CacheEntry>,
        components: HashMap<String, ComponentMap>,
    ) {
        self.clear();
        for entry in entries {
            self.insert(entry);
        }
        for (query_hash, map) in components {
            if self.query_refs.contains_key(&query_hash) {
                self.merge_components(&query_hash, map);
            }
        }
    }

    fn release_query_ref(&mut self, query_hash: &str) {
        let remaining = match self.query_refs.get_mut(query_hash) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            self.query_refs.remove(query_hash);
            if let Some(map) = self.components.remove(query_hash) {
                self.components_bytes = self
                    .components_bytes
                    .saturating_sub(component_map_size(&map));
                debug!("Dropped orphaned components for query hash: {}", query_hash);
            }
        }
    }
}

fn component_map_size(map: &ComponentMap) -> usize {
    map.iter()
        .map(|(name, value)| name.len() + serialized_size(value))
        .sum()
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of an entry without touching its access statistics
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.state.read().await.get(key).cloned()
    }

    /// Insert or replace an entry
    pub async fn set(&self, entry: CacheEntry) {
        debug!("Storing cache entry: {}", entry.key);
        self.state.write().await.insert(entry);
    }

    /// Insert an entry and merge its components in one critical section
    pub async fn set_with_components(&self, entry: CacheEntry, components: ComponentMap) {
        let mut state = self.state.write().await;
        let query_hash = entry.query_hash.clone();
        state.insert(entry);
        state.merge_components(&query_hash, components);
    }

    /// Remove an entry, returning whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        self.state.write().await.remove(key).is_some()
    }

    /// Point-in-time copy of every entry, safe to iterate while others mutate
    pub async fn all(&self) -> Vec<CacheEntry> {
        self.state.read().await.entries().cloned().collect()
    }

    /// Component map cached for a query hash
    pub async fn components(&self, query_hash: &str) -> Option<ComponentMap> {
        self.state.read().await.components(query_hash).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Sum of entry sizes in bytes
    pub async fn entries_bytes(&self) -> usize {
        self.state.read().await.entries_bytes()
    }

    /// Entry sizes plus component sizes in bytes
    pub async fn memory_usage_bytes(&self) -> usize {
        self.state.read().await.memory_usage_bytes()
    }

    /// Remove all entries and components
    pub async fn clear(&self) -> usize {
        self.state.write().await.clear()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().await
    }
}
