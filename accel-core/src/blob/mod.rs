//! Content-addressed byte storage.
//!
//! `Digest` is the `<alg>:<hex>` identity shared across the whole crate —
//! the cache, the proxy, P2P, and TUF targets all key on it. `BlobStore` is
//! the capability trait; `FileBlobStore` and `MemoryBlobStore` are its two
//! concrete shapes, and `CachedBlobStore` decorates any primary with a
//! bounded in-memory secondary.

mod cached;
pub(crate) mod digest;
mod file_store;
mod memory_store;

pub use cached::CachedBlobStore;
pub use digest::Digest;
pub use file_store::FileBlobStore;
pub use memory_store::MemoryBlobStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("size mismatch: declared {declared}, wrote {actual}")]
    MismatchSize { declared: u64, actual: u64 },
    #[error("digest mismatch: declared {declared}, computed {computed}")]
    DigestMismatch { declared: String, computed: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// A reader handed back by `Get`. Boxed so trait objects can be used for
/// `BlobStore` across the file/memory/cached variants.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Non-mutating existence test.
    async fn has(&self, digest: &Digest) -> bool;

    /// Streams bytes back; caller owns the reader and may drop it early.
    async fn get(&self, digest: &Digest) -> BlobResult<(BlobReader, u64)>;

    /// Ingests bytes atomically. If `size` is supplied and does not match
    /// the bytes actually written, the partial write is discarded and the
    /// call fails with `MismatchSize`.
    async fn put(
        &self,
        digest: &Digest,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: Option<u64>,
    ) -> BlobResult<u64>;

    async fn delete(&self, digest: &Digest) -> BlobResult<()>;

    async fn list(&self) -> BlobResult<Vec<Digest>>;

    async fn size(&self) -> BlobResult<u64>;
}
