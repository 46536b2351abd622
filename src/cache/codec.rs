//! Entry Codec Module
//!
//! Pure transforms between logical cache values and stored entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, CacheValue, Compressor, GzipCompressor};
use crate::error::{CacheError, Result};

// == Decoded ==
/// Outcome of reading a stored entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// No entry exists for the key
    Missing,
    /// An entry exists but its TTL has elapsed; the caller should purge it
    Expired,
    /// A live value
    Value(CacheValue),
}

impl Decoded {
    pub fn into_value(self) -> Option<CacheValue> {
        match self {
            Decoded::Value(value) => Some(value),
            Decoded::Missing | Decoded::Expired => None,
        }
    }
}

// == Entry Codec ==
/// Encodes values into entries and decodes them back.
///
/// Compression is an optional stage: without a compressor every payload is
/// stored as-is, with one only binary payloads are compressed.
#[derive(Debug, Clone, Default)]
pub struct EntryCodec {
    compressor: Option<Arc<dyn Compressor>>,
}

impl EntryCodec {
    /// Creates a codec that stores every payload unchanged.
    pub fn plain() -> Self {
        Self { compressor: None }
    }

    /// Creates a codec that compresses binary payloads.
    pub fn compressing(compressor: Arc<dyn Compressor>) -> Self {
        Self {
            compressor: Some(compressor),
        }
    }

    pub fn compresses(&self) -> bool {
        self.compressor.is_some()
    }

    // == Encode ==
    /// Builds the entry stored for `key`.
    ///
    /// A compression failure is returned as an error rather than falling back
    /// to the raw payload, which might not fit in a single document.
    ///
    /// # Arguments
    /// * `key` - Cache key the entry is stored under
    /// * `value` - Payload; only binary payloads are compressed
    /// * `ttl_seconds` - Lifetime counted from `now`
    /// * `now` - Write instant
    ///
    /// # Returns
    /// The entry, flagged `compressed` when its value holds gzip bytes.
    pub fn encode(
        &self,
        key: &str,
        value: CacheValue,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let mut entry = CacheEntry::new(key, value, ttl_seconds, now);

        if let (Some(compressor), CacheValue::Bytes(raw)) = (&self.compressor, &entry.value) {
            let packed = compressor.compress(raw)?;
            entry.value = CacheValue::Bytes(packed);
            entry.compressed = true;
        }

        Ok(entry)
    }

    // == Decode ==
    /// Turns a looked-up entry back into a value.
    ///
    /// Compressed entries are always inflated, even when this codec does not
    /// compress new writes, so buckets shared between differently configured
    /// stores stay readable.
    ///
    /// # Returns
    /// `Decoded::Missing` for no entry, `Decoded::Expired` once `now` reaches
    /// its expiry, otherwise the stored value.
    pub fn decode(&self, entry: Option<CacheEntry>, now: DateTime<Utc>) -> Result<Decoded> {
        let Some(entry) = entry else {
            return Ok(Decoded::Missing);
        };

        if entry.is_expired_at(now) {
            return Ok(Decoded::Expired);
        }

        if !entry.compressed {
            return Ok(Decoded::Value(entry.value));
        }

        let CacheValue::Bytes(packed) = entry.value else {
            return Err(CacheError::Compression(format!(
                "Entry {} is flagged compressed but holds a non-binary value",
                entry.key
            )));
        };

        let raw = match &self.compressor {
            Some(compressor) => compressor.decompress(&packed)?,
            None => GzipCompressor::default().decompress(&packed)?,
        };
        Ok(Decoded::Value(CacheValue::Bytes(raw)))
    }
}
