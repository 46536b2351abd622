//! Cache Store Module
//!
//! The public cache surface: every operation waits for the shared backend
//! handle, runs the entry codec and issues one backend call.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task;
use tracing::{debug, warn};

use crate::backend::{Connector, Database, Filter};
use crate::cache::handle::{initialize, Ready, StartupQueue, StoreHandle, Ticket};
use crate::cache::{CacheEntry, CacheValue, Decoded, EntryCodec, GzipCompressor};
use crate::config::{StoreInput, StoreOptions};
use crate::error::{CacheError, Result};

// == Document Cache ==
/// A cache whose entries live in a document store bucket.
///
/// Cloning is cheap and clones share the same backend handle. Values are
/// never held in process memory: every read goes to the backend.
#[derive(Clone)]
pub struct DocumentCache {
    ready: Ready,
    queue: Arc<StartupQueue>,
    codec: EntryCodec,
    bucket: String,
    default_ttl: u64,
}

impl DocumentCache {
    // == Constructor ==
    /// Creates a store from any accepted input shape.
    ///
    /// The connection is started immediately when a runtime is available;
    /// operations issued before it completes wait for it and then run in the
    /// order they were issued. Connection and configuration failures surface
    /// from the first operations, not here.
    ///
    /// # Arguments
    /// * `input` - A handle, a connection string or options
    /// * `connector` - Dials the connection string when the input needs one
    pub fn new(input: impl Into<StoreInput>, connector: Arc<dyn Connector>) -> Self {
        Self::build(input.into(), Some(connector))
    }

    /// Creates a store on a database handle owned by the caller.
    ///
    /// No connection is opened and `close` leaves the handle alone.
    ///
    /// # Arguments
    /// * `database` - Open handle the entries are stored through
    /// * `options` - Bucket, TTL and compression settings
    pub fn with_handle(database: Arc<dyn Database>, options: StoreOptions) -> Self {
        Self::build(StoreInput::Handle(database, options), None)
    }

    fn build(input: StoreInput, connector: Option<Arc<dyn Connector>>) -> Self {
        let (ready, options) = initialize(input, connector);

        Self {
            ready,
            queue: Arc::new(StartupQueue::default()),
            codec: codec_for(&options),
            bucket: options.collection_name().to_string(),
            default_ttl: options.default_ttl(),
        }
    }

    /// The bucket (collection) holding this store's entries.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub fn is_compression_enabled(&self) -> bool {
        self.codec.compresses()
    }

    /// Waits for the backend handle.
    pub async fn handle(&self) -> Result<Arc<StoreHandle>> {
        self.ready.clone().await
    }

    /// Waits for the backend handle, in line behind earlier operations while
    /// startup is still in progress. The ticket must be held until the
    /// operation's backend call has returned.
    async fn enter(&self) -> Result<(Arc<StoreHandle>, Option<Ticket<'_>>)> {
        if self.ready.peek().is_some() && self.queue.is_empty() {
            return Ok((self.handle().await?, None));
        }
        let ticket = self.queue.join().await;
        let handle = self.handle().await?;
        Ok((handle, Some(ticket)))
    }

    // == Get ==
    /// Retrieves the value stored under `key`.
    ///
    /// Returns `Ok(None)` when no entry exists or its TTL has elapsed; an
    /// elapsed entry is purged in the background. A stored JSON `null` comes
    /// back as `Some(CacheValue::Json(Value::Null))`.
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let (handle, ticket) = self.enter().await?;
        let record = handle.database().find_one(handle.bucket(), key).await?;
        drop(ticket);
        let now = Utc::now();

        let decoded = if record.as_ref().is_some_and(|r| r.compressed) {
            let codec = self.codec.clone();
            task::spawn_blocking(move || codec.decode(record, now))
                .await
                .map_err(|e| CacheError::Compression(e.to_string()))??
        } else {
            self.codec.decode(record, now)?
        };

        match decoded {
            Decoded::Value(value) => {
                debug!("GET {}: hit", key);
                Ok(Some(value))
            }
            Decoded::Missing => {
                debug!("GET {}: miss", key);
                Ok(None)
            }
            Decoded::Expired => {
                debug!("GET {}: expired, purging", key);
                spawn_purge(handle, key.to_string(), now);
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// # Arguments
    /// * `key` - Cache key, unique within the bucket
    /// * `value` - JSON or binary payload; binary payloads are compressed when enabled
    /// * `ttl` - Lifetime in seconds; `None` or zero uses the store default
    ///
    /// # Returns
    /// The value as given, once the backend has accepted the write.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<u64>,
    ) -> Result<CacheValue> {
        let value = value.into();
        let ttl = ttl.filter(|t| *t > 0).unwrap_or(self.default_ttl);
        let (handle, _ticket) = self.enter().await?;

        let entry = self.encode(key, value.clone(), ttl).await?;
        let compressed = entry.compressed;
        handle.database().upsert(handle.bucket(), key, entry).await?;

        debug!("SET {} ttl={}s compressed={}", key, ttl, compressed);
        Ok(value)
    }

    // == Delete ==
    /// Removes the entry for `key`. Succeeds when there is none.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let (handle, _ticket) = self.enter().await?;
        let removed = handle
            .database()
            .remove(handle.bucket(), &Filter::Key(key.to_string()))
            .await?;
        debug!("DEL {}: removed {}", key, removed);
        Ok(())
    }

    // == Clear ==
    /// Removes every entry in the bucket.
    pub async fn clear(&self) -> Result<()> {
        let (handle, _ticket) = self.enter().await?;
        let removed = handle.database().remove(handle.bucket(), &Filter::All).await?;
        debug!("CLEAR {}: removed {}", handle.bucket(), removed);
        Ok(())
    }

    // == Typed Access ==
    /// Retrieves and deserializes a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(CacheValue::Json(value)) => Ok(Some(serde_json::from_value(value)?)),
            Some(CacheValue::Bytes(_)) => Err(CacheError::Serialization(format!(
                "Entry {} holds binary data, not JSON",
                key
            ))),
            None => Ok(None),
        }
    }

    /// Serializes and stores a value as JSON.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, CacheValue::Json(value), ttl).await?;
        Ok(())
    }

    // == Close ==
    /// Closes the connection if this store opened it.
    ///
    /// Handles supplied by the caller stay open. Operations still in flight
    /// when closing may fail.
    pub async fn close(&self) -> Result<()> {
        let (handle, _ticket) = self.enter().await?;
        handle.close().await
    }

    async fn encode(&self, key: &str, value: CacheValue, ttl: u64) -> Result<CacheEntry> {
        let now = Utc::now();
        if !(self.codec.compresses() && value.is_binary()) {
            return self.codec.encode(key, value, ttl, now);
        }

        let codec = self.codec.clone();
        let key = key.to_string();
        task::spawn_blocking(move || codec.encode(&key, value, ttl, now))
            .await
            .map_err(|e| CacheError::Compression(e.to_string()))?
    }
}

impl fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCache")
            .field("bucket", &self.bucket)
            .field("default_ttl", &self.default_ttl)
            .field("codec", &self.codec)
            .finish()
    }
}

fn codec_for(options: &StoreOptions) -> EntryCodec {
    if !options.compression {
        return EntryCodec::plain();
    }
    let gzip = options
        .compression_level
        .map(GzipCompressor::new)
        .unwrap_or_default();
    EntryCodec::compressing(Arc::new(gzip))
}

/// Deletes an entry observed as expired, unless it has been rewritten since.
fn spawn_purge(handle: Arc<StoreHandle>, key: String, now: chrono::DateTime<Utc>) {
    tokio::spawn(async move {
        let filter = Filter::ExpiredKey(key.clone(), now);
        if let Err(e) = handle.database().remove(handle.bucket(), &filter).await {
            warn!("Failed to purge expired entry {}: {}", key, e);
        }
    });
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Database, MemoryConnector};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn store() -> DocumentCache {
        DocumentCache::new(StoreInput::default(), Arc::new(MemoryConnector::new()))
    }

    #[tokio::test]
    async fn test_store_set_and_get() {
        let cache = store();

        let returned = cache.set("key1", "value1", None).await.unwrap();
        assert_eq!(returned, CacheValue::from("value1"));

        let value = cache.get("key1").await.unwrap();
        assert_eq!(value, Some(CacheValue::from("value1")));
    }

    #[tokio::test]
    async fn test_store_get_nonexistent() {
        let cache = store();
        assert_eq!(cache.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_null_is_not_absent() {
        let cache = store();
        cache.set("null", Value::Null, None).await.unwrap();

        assert_eq!(
            cache.get("null").await.unwrap(),
            Some(CacheValue::Json(Value::Null))
        );
    }

    #[tokio::test]
    async fn test_store_delete() {
        let cache = store();

        cache.set("key1", "value1", None).await.unwrap();
        cache.delete("key1").await.unwrap();
        assert_eq!(cache.get("key1").await.unwrap(), None);

        // Deleting again is not an error
        cache.delete("key1").await.unwrap();
    }

    #[tokio::test]
    async fn test_store_overwrite() {
        let cache = store();

        cache.set("key1", "value1", None).await.unwrap();
        cache.set("key1", "value2", None).await.unwrap();

        assert_eq!(cache.get("key1").await.unwrap(), Some(CacheValue::from("value2")));
    }

    #[tokio::test]
    async fn test_store_default_ttl() {
        let cache = store();
        cache.set("key1", "value1", None).await.unwrap();
        cache.set("key2", "value2", Some(0)).await.unwrap();

        let handle = cache.handle().await.unwrap();
        for key in ["key1", "key2"] {
            let entry = handle
                .database()
                .find_one(handle.bucket(), key)
                .await
                .unwrap()
                .unwrap();
            let remaining = entry.ttl_remaining().as_secs();
            assert!((59..=60).contains(&remaining), "{key}: {remaining}");
        }
    }

    #[tokio::test]
    async fn test_store_ttl_expiration_purges() {
        let connector = MemoryConnector::new();
        let cache = DocumentCache::new(
            StoreInput::uri("mongodb://localhost/app"),
            Arc::new(connector.clone()),
        );

        cache.set("key1", "value1", Some(1)).await.unwrap();
        assert!(cache.get("key1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("key1").await.unwrap(), None);

        // Background purge removes the document
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.server().document_count("app", "cacheman").await, 0);
    }

    #[tokio::test]
    async fn test_store_clear() {
        let cache = store();
        cache.set("a", 1, None).await.unwrap();
        cache.set("b", 2, None).await.unwrap();

        cache.clear().await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_json_helpers() {
        let cache = store();
        cache
            .set_json("user", &json!({"name": "ada", "age": 36}), None)
            .await
            .unwrap();

        let user: Option<Value> = cache.get_json("user").await.unwrap();
        assert_eq!(user, Some(json!({"name": "ada", "age": 36})));

        cache.set("blob", vec![1u8, 2], None).await.unwrap();
        let result = cache.get_json::<Value>("blob").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_store_compression_settings() {
        let options = StoreOptions {
            compression: true,
            compression_level: Some(9),
            collection: Some("blobs".to_string()),
            ttl: Some(120),
            ..StoreOptions::default()
        };
        let cache = DocumentCache::new(options, Arc::new(MemoryConnector::new()));

        assert!(cache.is_compression_enabled());
        assert_eq!(cache.bucket(), "blobs");
        assert_eq!(cache.default_ttl(), 120);

        cache.set("bin", vec![9u8; 4096], None).await.unwrap();
        let handle = cache.handle().await.unwrap();
        let stored = handle
            .database()
            .find_one("blobs", "bin")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.compressed);
        assert_eq!(
            cache.get("bin").await.unwrap(),
            Some(CacheValue::Bytes(vec![9u8; 4096]))
        );
    }

    #[tokio::test]
    async fn test_store_get_reports_corrupt_compressed_entry() {
        let connector = MemoryConnector::new();
        let db = connector.database("app");
        let mut entry = CacheEntry::new("bad", CacheValue::Bytes(b"junk".to_vec()), 60, Utc::now());
        entry.compressed = true;
        db.upsert("cacheman", "bad", entry).await.unwrap();

        let cache = DocumentCache::with_handle(db, StoreOptions::default());

        let result = cache.get("bad").await;
        assert!(matches!(result, Err(CacheError::Compression(_))));
    }

    #[tokio::test]
    async fn test_store_with_handle_needs_no_connector() {
        let db = MemoryConnector::new().database("app");
        let cache = DocumentCache::with_handle(db.clone(), StoreOptions::default());

        cache.set("k", "v", None).await.unwrap();
        cache.close().await.unwrap();

        assert!(!cache.handle().await.unwrap().owns_connection());
        assert!(db.find_one("cacheman", "k").await.unwrap().is_some());
    }
}
