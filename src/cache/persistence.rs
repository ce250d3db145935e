//! Snapshot persistence
//!
//! The whole cache (entries, component maps and usage patterns) is written
//! as one JSON document tagged with a schema version. Writes go to a unique
//! temporary file in the target directory which is then renamed over the
//! snapshot, so a failed save never leaves a half-written file behind.

use crate::cache::config::CacheConfig;
use crate::cache::entry::CacheEntry;
use crate::cache::patterns::UsagePattern;
use crate::cache::types::{CacheKey, ComponentMap};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Snapshot file name inside `cache_dir`
pub const SNAPSHOT_FILE_NAME: &str = "smart_cache.json";

/// Schema version written by this build
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// On-disk image of a cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub entries: HashMap<CacheKey, CacheEntry>,
    pub components: HashMap<String, ComponentMap>,
    pub patterns: Vec<UsagePattern>,
}

impl CacheSnapshot {
    pub fn new(
        entries: HashMap<CacheKey, CacheEntry>,
        components: HashMap<String, ComponentMap>,
        patterns: Vec<UsagePattern>,
    ) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            entries,
            components,
            patterns,
        }
    }

    /// Remove entries that expired before `now`, returning how many were dropped
    pub fn drop_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }
}

/// Bring an older snapshot document up to the current schema
fn migrate(document: Value, from_version: u32) -> Result<Value> {
    match from_version {
        SNAPSHOT_SCHEMA_VERSION => Ok(document),
        other => Err(CacheError::PersistenceError(format!(
            "no migration path from snapshot schema version {}",
            other
        ))),
    }
}

/// Reads and writes snapshots under one directory
#[derive(Debug, Clone)]
pub struct PersistenceAdapter {
    dir: PathBuf,
}

impl PersistenceAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.cache_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Write a snapshot atomically, returning the final path
    pub async fn save(&self, snapshot: &CacheSnapshot) -> Result<PathBuf> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CacheError::PersistenceError(format!(
                "failed to create cache directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.snapshot_path();
        let temp_path = self
            .dir
            .join(format!("{}.{}.tmp", SNAPSHOT_FILE_NAME, Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&temp_path, &data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CacheError::PersistenceError(format!(
                "failed to write {}: {}",
                temp_path.display(),
                e
            )));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CacheError::PersistenceError(format!(
                "failed to move snapshot into place at {}: {}",
                path.display(),
                e
            )));
        }

        debug!(
            "Wrote cache snapshot ({} entries, {} bytes) to {}",
            snapshot.entries.len(),
            data.len(),
            path.display()
        );
        Ok(path)
    }

    /// Read the snapshot, dropping entries that have expired since it was saved.
    ///
    /// Returns `Ok(None)` when no snapshot exists.
    pub async fn load(&self) -> Result<Option<CacheSnapshot>> {
        let path = self.snapshot_path();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No cache snapshot at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(CacheError::PersistenceError(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let document: Value = serde_json::from_slice(&data).map_err(|e| {
            CacheError::PersistenceError(format!("corrupt snapshot {}: {}", path.display(), e))
        })?;

        let raw_version = document
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                CacheError::PersistenceError(format!(
                    "snapshot {} has no schema_version",
                    path.display()
                ))
            })?;
        let version = u32::try_from(raw_version).map_err(|_| {
            CacheError::PersistenceError(format!(
                "snapshot {} has an out of range schema_version {}",
                path.display(),
                raw_version
            ))
        })?;

        if version > SNAPSHOT_SCHEMA_VERSION {
            error!(
                "Refusing snapshot {} written by a newer schema ({})",
                path.display(),
                version
            );
            return Err(CacheError::UnsupportedSnapshotVersion {
                found: version,
                supported: SNAPSHOT_SCHEMA_VERSION,
            });
        }

        let document = migrate(document, version)?;
        let mut snapshot: CacheSnapshot = serde_json::from_value(document).map_err(|e| {
            CacheError::PersistenceError(format!("corrupt snapshot {}: {}", path.display(), e))
        })?;
        snapshot.schema_version = SNAPSHOT_SCHEMA_VERSION;

        let expired = snapshot.drop_expired(Utc::now());
        if expired > 0 {
            debug!("Dropped {} expired entries from snapshot", expired);
        }

        Ok(Some(snapshot))
    }
}
