//! Error types for the cache store
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache store.
///
/// The type is `Clone` because a failed initialization is replayed to every
/// operation waiting on the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No usable connection target could be resolved
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend could not be reached or rejected the credentials
    #[error("Connection error: {0}")]
    Connection(String),

    /// Compressing or decompressing a payload failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// A storage call failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// A typed value could not be converted to or from its stored form
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache store.
pub type Result<T> = std::result::Result<T, CacheError>;
