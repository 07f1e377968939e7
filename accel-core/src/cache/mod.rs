//! Bounded LRU blob cache with a durable JSON index and crash-safe writes.
//!
//! The cache owns a `FileBlobStore`-shaped directory tree exclusively: no
//! other component writes into it. See `LruCache` for the operations; the
//! module is split into `entry` (the persisted record shape), `index` (the
//! on-disk JSON index + tempfile/rename persistence), and `lru` (the
//! in-memory recency structure and the public API).

mod entry;
mod index;
mod lru;

pub use entry::CacheEntry;
pub use lru::{CacheError, CacheResult, CacheStats, LruCache};
