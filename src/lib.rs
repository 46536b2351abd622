//! Doc Cache - A cache store backed by a document database
//!
//! Provides get/set/delete/clear with per-entry expiration and optional
//! compression of binary payloads. Entries live in one bucket of a document
//! store reached through the [`backend`] traits; an in-memory implementation
//! is included.
//!
//! ```ignore
//! use std::sync::Arc;
//! use doc_cache::{backend::MemoryConnector, DocumentCache, StoreInput};
//!
//! let cache = DocumentCache::new(
//!     StoreInput::uri("mongodb://127.0.0.1:27017/app"),
//!     Arc::new(MemoryConnector::new()),
//! );
//! cache.set("greeting", "hello", Some(30)).await?;
//! assert!(cache.get("greeting").await?.is_some());
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;
pub mod uri;

pub use cache::{CacheValue, DocumentCache};
pub use config::{StoreInput, StoreOptions};
pub use error::{CacheError, Result};
