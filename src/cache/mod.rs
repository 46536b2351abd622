//! Cache Module
//!
//! Provides a document-store backed cache with TTL expiration and optional
//! gzip compression of binary payloads.

mod codec;
mod compression;
mod entry;
mod handle;
mod store;


// Re-export public types
pub use codec::{Decoded, EntryCodec};
pub use compression::{Compressor, GzipCompressor};
pub use entry::{expiry_from, CacheEntry, CacheValue, EXPIRE_FIELD};
pub use handle::{connect_options, StoreHandle, DEFAULT_URI};
pub use store::DocumentCache;
