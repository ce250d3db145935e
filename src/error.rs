//! Error types for cache operations
//!
//! A cache miss is not an error: lookups return `Option`. The variants below
//! cover caller mistakes (bad configuration, unserializable payloads) and
//! snapshot I/O, which the manager degrades to a `false` return.

use thiserror::Error;

/// Main error type for smart cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Response or component could not be represented as a cache value
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid configuration, rejected at construction time
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Stored content could not be compressed or restored
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Snapshot could not be written or read
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Snapshot was written by a newer format than this build understands
    #[error("Unsupported snapshot schema version {found} (supported up to {supported})")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },

    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
