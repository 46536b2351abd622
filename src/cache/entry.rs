//! Cache Entry Module
//!
//! Defines the stored document for a cache slot and the payload it carries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Document field holding the expiry instant, indexed for TTL sweeps
pub const EXPIRE_FIELD: &str = "expireAt";

// == Cache Value ==
/// A logical cache payload.
///
/// Structured values travel as JSON; raw byte buffers are kept apart so they
/// can be compressed before storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    /// Any serializable value, including `0`, `false` and `null`
    Json(Value),
    /// A binary payload
    Bytes(Vec<u8>),
}

impl CacheValue {
    /// Returns true for binary payloads, the only kind eligible for compression.
    pub fn is_binary(&self) -> bool {
        matches!(self, CacheValue::Bytes(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            CacheValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Bytes(bytes) => Some(bytes),
            CacheValue::Json(_) => None,
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::Json(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Bytes(bytes)
    }
}

impl From<&[u8]> for CacheValue {
    fn from(bytes: &[u8]) -> Self {
        CacheValue::Bytes(bytes.to_vec())
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Json(Value::String(value))
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        CacheValue::Json(Value::Bool(value))
    }
}

impl From<i32> for CacheValue {
    fn from(value: i32) -> Self {
        CacheValue::Json(Value::from(value))
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Json(Value::from(value))
    }
}

impl From<u64> for CacheValue {
    fn from(value: u64) -> Self {
        CacheValue::Json(Value::from(value))
    }
}

impl From<f64> for CacheValue {
    fn from(value: f64) -> Self {
        CacheValue::Json(Value::from(value))
    }
}

// == Cache Entry ==
/// The document persisted for one key of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unique key within the bucket
    pub key: String,
    /// Stored payload, compressed bytes when `compressed` is set
    pub value: CacheValue,
    /// Instant at which the entry is dead
    #[serde(rename = "expireAt")]
    pub expire_at: DateTime<Utc>,
    /// Set only when `value` holds gzip-compressed bytes
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an uncompressed entry expiring `ttl_seconds` after `now`.
    ///
    /// # Arguments
    /// * `key` - Key within the bucket
    /// * `value` - Payload stored as given
    /// * `ttl_seconds` - Lifetime; saturates at the latest representable instant
    /// * `now` - Write instant
    pub fn new(
        key: impl Into<String>,
        value: CacheValue,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            expire_at: expiry_from(now, ttl_seconds),
            compressed: false,
        }
    }

    // == Is Expired ==
    /// Checks expiration against the given instant.
    ///
    /// An entry is expired once `now` reaches `expire_at`, so a TTL that has
    /// fully elapsed never yields a hit.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self) -> std::time::Duration {
        (self.expire_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Computes `now + ttl_seconds`, saturating at the largest representable instant.
pub fn expiry_from(now: DateTime<Utc>, ttl_seconds: u64) -> DateTime<Utc> {
    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
