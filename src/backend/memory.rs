//! In-memory document backend
//!
//! Emulates a document server inside the process: databases hold buckets,
//! buckets hold entries keyed by `key`, and TTL indexes on `expireAt` are
//! honoured by a background monitor that sweeps on an interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::{Client, ConnectOptions, Connector, Database, Filter, IndexSpec};
use crate::cache::{expiry_from, CacheEntry, CacheValue, EXPIRE_FIELD};
use crate::error::{CacheError, Result};
use crate::tasks::spawn_ttl_monitor;
use crate::uri::ConnectionUri;

/// Database selected when the connection string names none
pub const DEFAULT_DATABASE: &str = "test";

/// Sweep interval of the TTL monitor, matching common document servers
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Per-document size ceiling, matching common document servers
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

// == Collection ==
#[derive(Debug, Default)]
struct Collection {
    documents: HashMap<String, CacheEntry>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Grace period of the TTL index on `expireAt`, if one exists.
    fn ttl_grace(&self) -> Option<u64> {
        self.indexes
            .iter()
            .find(|index| index.field == EXPIRE_FIELD)
            .and_then(|index| index.expire_after_seconds)
    }
}

type Buckets = HashMap<String, Collection>;

// == Memory Server ==
/// State shared by every connection to one in-memory server.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    databases: Arc<RwLock<HashMap<String, Buckets>>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    // == Purge Expired ==
    /// Removes documents whose TTL index says they are dead.
    ///
    /// Buckets without a TTL index are left alone. Returns the number of
    /// documents removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut databases = self.databases.write().await;
        let mut removed = 0;

        for buckets in databases.values_mut() {
            for collection in buckets.values_mut() {
                let Some(grace) = collection.ttl_grace() else {
                    continue;
                };
                let before = collection.documents.len();
                collection
                    .documents
                    .retain(|_, entry| now < expiry_from(entry.expire_at, grace));
                removed += before - collection.documents.len();
            }
        }

        removed
    }

    /// Number of documents currently stored in a bucket, expired or not.
    pub async fn document_count(&self, database: &str, bucket: &str) -> usize {
        self.databases
            .read()
            .await
            .get(database)
            .and_then(|buckets| buckets.get(bucket))
            .map(|collection| collection.documents.len())
            .unwrap_or(0)
    }

    /// Indexes defined on a bucket.
    pub async fn indexes(&self, database: &str, bucket: &str) -> Vec<IndexSpec> {
        self.databases
            .read()
            .await
            .get(database)
            .and_then(|buckets| buckets.get(bucket))
            .map(|collection| collection.indexes.clone())
            .unwrap_or_default()
    }
}

// == Memory Database ==
/// A handle on one database of a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    server: MemoryServer,
    closed: Arc<AtomicBool>,
    max_document_bytes: usize,
}

impl MemoryDatabase {
    fn new(name: impl Into<String>, server: MemoryServer, max_document_bytes: usize) -> Self {
        Self {
            name: name.into(),
            server,
            closed: Arc::new(AtomicBool::new(false)),
            max_document_bytes,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("client is closed".to_string()));
        }
        Ok(())
    }

    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_index(&self, bucket: &str, spec: &IndexSpec) -> Result<()> {
        self.check_open()?;
        let mut databases = self.server.databases.write().await;
        let collection = databases
            .entry(self.name.clone())
            .or_default()
            .entry(bucket.to_string())
            .or_default();

        match collection.indexes.iter().find(|i| i.field == spec.field) {
            Some(existing) if existing == spec => Ok(()),
            Some(existing) => Err(CacheError::Backend(format!(
                "index on {} already exists with different options: {:?}",
                existing.field, existing
            ))),
            None => {
                debug!("Created index on {}.{}.{}", self.name, bucket, spec.field);
                collection.indexes.push(spec.clone());
                Ok(())
            }
        }
    }

    async fn find_one(&self, bucket: &str, key: &str) -> Result<Option<CacheEntry>> {
        self.check_open()?;
        let databases = self.server.databases.read().await;
        Ok(databases
            .get(&self.name)
            .and_then(|buckets| buckets.get(bucket))
            .and_then(|collection| collection.documents.get(key))
            .cloned())
    }

    async fn upsert(&self, bucket: &str, key: &str, entry: CacheEntry) -> Result<()> {
        self.check_open()?;
        let size = document_size(&entry);
        if size > self.max_document_bytes {
            return Err(CacheError::Backend(format!(
                "document for {} is {} bytes, exceeding the {} byte limit",
                key, size, self.max_document_bytes
            )));
        }
        let mut databases = self.server.databases.write().await;
        databases
            .entry(self.name.clone())
            .or_default()
            .entry(bucket.to_string())
            .or_default()
            .documents
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, bucket: &str, filter: &Filter) -> Result<u64> {
        self.check_open()?;
        let mut databases = self.server.databases.write().await;
        let Some(collection) = databases
            .get_mut(&self.name)
            .and_then(|buckets| buckets.get_mut(bucket))
        else {
            return Ok(0);
        };

        let removed = match filter {
            Filter::Key(key) => collection.documents.remove(key).map_or(0, |_| 1),
            Filter::ExpiredKey(key, now) => {
                let expired = collection
                    .documents
                    .get(key)
                    .is_some_and(|entry| entry.is_expired_at(*now));
                if expired {
                    collection.documents.remove(key);
                }
                usize::from(expired)
            }
            Filter::All => {
                let count = collection.documents.len();
                collection.documents.clear();
                count
            }
        };
        Ok(removed as u64)
    }
}

/// Approximate stored size: key plus payload.
fn document_size(entry: &CacheEntry) -> usize {
    let payload = match &entry.value {
        CacheValue::Bytes(bytes) => bytes.len(),
        CacheValue::Json(value) => value.to_string().len(),
    };
    entry.key.len() + payload
}

// == Memory Client ==
/// A connection opened by [`MemoryConnector`].
///
/// Owns the TTL monitor task; closing the client stops it and makes every
/// further call on its database fail.
#[derive(Debug)]
pub struct MemoryClient {
    database: MemoryDatabase,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryClient {
    pub fn is_closed(&self) -> bool {
        self.database.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Client for MemoryClient {
    fn default_database(&self) -> Result<Arc<dyn Database>> {
        self.database.check_open()?;
        Ok(Arc::new(self.database.clone()))
    }

    async fn close(&self) -> Result<()> {
        if self.database.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let monitor = self
            .monitor
            .lock()
            .map_err(|e| CacheError::Backend(e.to_string()))?
            .take();
        if let Some(handle) = monitor {
            handle.abort();
        }
        info!("Closed connection to database {}", self.database.name);
        Ok(())
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        if let Ok(mut monitor) = self.monitor.lock() {
            if let Some(handle) = monitor.take() {
                handle.abort();
            }
        }
    }
}

// == Memory Connector ==
/// Opens connections to one in-memory server.
///
/// Clones share the server, so every connection sees the same documents.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
    credentials: Option<(String, String)>,
    monitor_interval: Duration,
    max_document_bytes: usize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            server: MemoryServer::new(),
            credentials: None,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }

    /// Requires connections to authenticate with these credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit;
        self
    }

    pub fn server(&self) -> &MemoryServer {
        &self.server
    }

    /// A pre-connected handle on `name`, not tied to any client.
    pub fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        Arc::new(MemoryDatabase::new(
            name,
            self.server.clone(),
            self.max_document_bytes,
        ))
    }

    fn authenticate(&self, uri: &ConnectionUri) -> Result<()> {
        let Some((user, pass)) = &self.credentials else {
            return Ok(());
        };
        let supplied = (uri.username.as_deref(), uri.password.as_deref());
        if supplied == (Some(user.as_str()), Some(pass.as_str())) {
            Ok(())
        } else {
            Err(CacheError::Connection("authentication failed".to_string()))
        }
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, uri: &str, options: &ConnectOptions) -> Result<Arc<dyn Client>> {
        let parsed = ConnectionUri::parse(uri)?;
        self.authenticate(&parsed)?;

        let name = parsed
            .database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        debug!(
            "Connecting to {} hosts, database {}, {} driver options",
            parsed.hosts.len(),
            name,
            options.len()
        );

        let monitor = spawn_ttl_monitor(self.server.clone(), self.monitor_interval);

        Ok(Arc::new(MemoryClient {
            database: MemoryDatabase::new(name, self.server.clone(), self.max_document_bytes),
            monitor: Mutex::new(Some(monitor)),
        }))
    }
}
