use super::{BlobError, BlobReader, BlobResult, BlobStore, Digest};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};

/// In-memory blob store. Used as the secondary tier in `CachedBlobStore`
/// and as a lightweight stand-in for tests that do not need real disk I/O.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: DashMap<Digest, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.value().len() as u64).sum()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn has(&self, digest: &Digest) -> bool {
        self.entries.contains_key(digest)
    }

    async fn get(&self, digest: &Digest) -> BlobResult<(BlobReader, u64)> {
        let bytes = self
            .entries
            .get(digest)
            .map(|e| e.value().clone())
            .ok_or_else(|| BlobError::NotFound(digest.to_string()))?;
        let len = bytes.len() as u64;
        Ok((Box::new(Cursor::new(bytes.to_vec())), len))
    }

    async fn put(
        &self,
        digest: &Digest,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: Option<u64>,
    ) -> BlobResult<u64> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        let written = buf.len() as u64;
        if let Some(expected) = size {
            if expected != written {
                return Err(BlobError::MismatchSize {
                    declared: expected,
                    actual: written,
                });
            }
        }
        self.entries.insert(digest.clone(), Bytes::from(buf));
        Ok(written)
    }

    async fn delete(&self, digest: &Digest) -> BlobResult<()> {
        self.entries.remove(digest);
        Ok(())
    }

    async fn list(&self) -> BlobResult<Vec<Digest>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    async fn size(&self) -> BlobResult<u64> {
        Ok(self.total_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        let digest = Digest::sha256_of(b"abc");
        let mut reader = Cursor::new(b"abc".to_vec());
        store.put(&digest, &mut reader, None).await.unwrap();
        let (mut r, size) = store.get(&digest).await.unwrap();
        assert_eq!(size, 3);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abc");
    }
}
