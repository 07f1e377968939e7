use super::{BlobReader, BlobResult, BlobStore, Digest, MemoryBlobStore};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Decorates a primary `BlobStore` with a bounded in-memory secondary.
///
/// `get` consults the secondary first; on miss it falls through to the
/// primary and, if the blob is small enough (`size < max_secondary/10`)
/// and the secondary has room, opportunistically copies it back in the
/// background. The secondary is best-effort: any failure there never
/// affects the answer the caller gets from the primary.
pub struct CachedBlobStore<P: BlobStore> {
    primary: P,
    secondary: Arc<MemoryBlobStore>,
    max_secondary: u64,
}

impl<P: BlobStore + 'static> CachedBlobStore<P> {
    pub fn new(primary: P, max_secondary: u64) -> Self {
        Self {
            primary,
            secondary: Arc::new(MemoryBlobStore::new()),
            max_secondary,
        }
    }

    fn eligible_for_secondary(&self, size: u64) -> bool {
        size < self.max_secondary / 10 && self.secondary.total_size() + size <= self.max_secondary
    }
}

#[async_trait]
impl<P: BlobStore + 'static> BlobStore for CachedBlobStore<P> {
    async fn has(&self, digest: &Digest) -> bool {
        if self.secondary.has(digest).await {
            return true;
        }
        self.primary.has(digest).await
    }

    async fn get(&self, digest: &Digest) -> BlobResult<(BlobReader, u64)> {
        if let Ok(hit) = self.secondary.get(digest).await {
            debug!(digest = %digest, "secondary blob cache hit");
            return Ok(hit);
        }
        let (mut reader, size) = self.primary.get(digest).await?;
        if self.eligible_for_secondary(size) {
            let mut buf = Vec::with_capacity(size as usize);
            if reader.read_to_end(&mut buf).await.is_ok() {
                let secondary = self.secondary.clone();
                let digest = digest.clone();
                let buf_for_secondary = buf.clone();
                tokio::spawn(async move {
                    let mut cursor = Cursor::new(buf_for_secondary);
                    let _ = secondary.put(&digest, &mut cursor, None).await;
                });
                return Ok((Box::new(Cursor::new(buf)), size));
            }
        }
        Ok((reader, size))
    }

    async fn put(
        &self,
        digest: &Digest,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: Option<u64>,
    ) -> BlobResult<u64> {
        self.primary.put(digest, reader, size).await
    }

    async fn delete(&self, digest: &Digest) -> BlobResult<()> {
        let _ = self.secondary.delete(digest).await;
        self.primary.delete(digest).await
    }

    async fn list(&self) -> BlobResult<Vec<Digest>> {
        self.primary.list().await
    }

    async fn size(&self) -> BlobResult<u64> {
        self.primary.size().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use std::io::Cursor;

    #[tokio::test]
    async fn falls_through_to_primary_on_secondary_miss() {
        let primary = MemoryBlobStore::new();
        let digest = Digest::sha256_of(b"payload");
        let mut reader = Cursor::new(b"payload".to_vec());
        primary.put(&digest, &mut reader, None).await.unwrap();

        let cached = CachedBlobStore::new(primary, 1024 * 1024);
        let (mut r, size) = cached.get(&digest).await.unwrap();
        assert_eq!(size, 7);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"payload");
    }

    #[tokio::test]
    async fn secondary_failure_never_fails_the_read() {
        // max_secondary = 0 means nothing is ever eligible; get must still work.
        let primary = MemoryBlobStore::new();
        let digest = Digest::sha256_of(b"x");
        let mut reader = Cursor::new(b"x".to_vec());
        primary.put(&digest, &mut reader, None).await.unwrap();
        let cached = CachedBlobStore::new(primary, 0);
        let (_r, size) = cached.get(&digest).await.unwrap();
        assert_eq!(size, 1);
    }
}
