//! Backend Module
//!
//! The document store the cache rides on. The store is reached only through
//! the traits below, so any engine that can look up, upsert and remove a
//! document by key can be substituted.
//!
//! # Implementations
//! - [`memory`]: an in-process document server with TTL indexes

pub mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::CacheEntry;
use crate::error::Result;

pub use memory::{MemoryClient, MemoryConnector, MemoryDatabase};

/// Driver options handed to [`Connector::connect`].
pub type ConnectOptions = BTreeMap<String, Value>;

// == Filter ==
/// Selects the documents a remove call applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// The single document with this key
    Key(String),
    /// The document with this key, only if it expired at or before the instant
    ExpiredKey(String, DateTime<Utc>),
    /// Every document in the bucket
    All,
}

// == Index Spec ==
/// A single-field index, optionally expiring documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub field: String,
    pub ascending: bool,
    /// Grace period after the indexed instant before the document is swept
    pub expire_after_seconds: Option<u64>,
}

impl IndexSpec {
    /// Ascending TTL index on `field`.
    pub fn ttl(field: impl Into<String>, expire_after_seconds: u64) -> Self {
        Self {
            field: field.into(),
            ascending: true,
            expire_after_seconds: Some(expire_after_seconds),
        }
    }
}

// == Database ==
/// A handle addressing buckets (collections) of one logical database.
#[async_trait]
pub trait Database: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Creates the index if missing. Conflicting definitions are reported as errors.
    async fn ensure_index(&self, bucket: &str, spec: &IndexSpec) -> Result<()>;

    async fn find_one(&self, bucket: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Inserts the entry or replaces the one stored under `key`.
    async fn upsert(&self, bucket: &str, key: &str, entry: CacheEntry) -> Result<()>;

    /// Removes the matching documents and returns how many were removed.
    async fn remove(&self, bucket: &str, filter: &Filter) -> Result<u64>;
}

// == Client ==
/// An open connection.
#[async_trait]
pub trait Client: Send + Sync {
    /// The database named by the connection string.
    fn default_database(&self) -> Result<Arc<dyn Database>>;

    async fn close(&self) -> Result<()>;
}

// == Connector ==
/// Opens connections from a connection string.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, uri: &str, options: &ConnectOptions) -> Result<Arc<dyn Client>>;
}
