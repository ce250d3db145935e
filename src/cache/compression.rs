//! Gzip storage for large cached responses

use crate::cache::types::CacheValue;
use crate::error::{CacheError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// JSON encoding of a response, gzip-compressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedContent {
    pub data: Vec<u8>,

    /// Size of the JSON encoding before compression
    pub original_size_bytes: usize,
}

impl CompressedContent {
    pub fn encode(value: &CacheValue) -> Result<Self> {
        let json = serde_json::to_vec(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(&json)
            .map_err(|e| CacheError::CompressionError(e.to_string()))?;
        let data = encoder
            .finish()
            .map_err(|e| CacheError::CompressionError(e.to_string()))?;

        Ok(Self {
            data,
            original_size_bytes: json.len(),
        })
    }

    pub fn decode(&self) -> Result<CacheValue> {
        let mut decoder = GzDecoder::new(self.data.as_slice());
        let mut json = Vec::with_capacity(self.original_size_bytes);
        decoder
            .read_to_end(&mut json)
            .map_err(|e| CacheError::CompressionError(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn compressed_size(&self) -> usize {
        self.data.len()
    }
}
