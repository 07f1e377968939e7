use super::{BlobError, BlobReader, BlobResult, BlobStore, Digest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// File-backed blob store laid out as `<root>/<digest[:2]>/<digest>`.
///
/// A single reader/writer lock serializes mutation: `put`/`delete` take the
/// write half, everything else the read half -- one writer at a time, many
/// concurrent readers.
pub struct FileBlobStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FileBlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let store = Self {
            root,
            lock: RwLock::new(()),
        };
        store.reclaim_tmp_files().await?;
        Ok(store)
    }

    fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.shard()).join(digest.as_str().replace(':', "_"))
    }

    fn tmp_path_for(&self, digest: &Digest) -> PathBuf {
        let mut p = self.path_for(digest);
        p.set_extension("tmp");
        p
    }

    /// Any `.tmp` file left behind by a crash between write and rename is
    /// invisible to `list` and safe to remove on startup.
    async fn reclaim_tmp_files(&self) -> BlobResult<()> {
        let mut shards = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(_) => return Ok(()),
        };
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(f) = files.next_entry().await? {
                if f.path().extension().map(|e| e == "tmp").unwrap_or(false) {
                    debug!(path = %f.path().display(), "reclaiming stale tmp file");
                    let _ = fs::remove_file(f.path()).await;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn has(&self, digest: &Digest) -> bool {
        let _g = self.lock.read().await;
        fs::metadata(self.path_for(digest)).await.is_ok()
    }

    async fn get(&self, digest: &Digest) -> BlobResult<(BlobReader, u64)> {
        let _g = self.lock.read().await;
        let path = self.path_for(digest);
        let meta = fs::metadata(&path)
            .await
            .map_err(|_| BlobError::NotFound(digest.to_string()))?;
        let file = fs::File::open(&path).await?;
        Ok((Box::new(file), meta.len()))
    }

    async fn put(
        &self,
        digest: &Digest,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: Option<u64>,
    ) -> BlobResult<u64> {
        let _g = self.lock.write().await;
        let final_path = self.path_for(digest);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.tmp_path_for(digest);
        let written = write_tmp_then_rename(&tmp_path, &final_path, reader).await?;
        if let Some(expected) = size {
            if expected != written {
                let _ = fs::remove_file(&final_path).await;
                return Err(BlobError::MismatchSize {
                    declared: expected,
                    actual: written,
                });
            }
        }
        Ok(written)
    }

    async fn delete(&self, digest: &Digest) -> BlobResult<()> {
        let _g = self.lock.write().await;
        match fs::remove_file(self.path_for(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> BlobResult<Vec<Digest>> {
        let _g = self.lock.read().await;
        let mut out = Vec::new();
        let mut shards = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(_) => return Ok(out),
        };
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(f) = files.next_entry().await? {
                let path = f.path();
                if path.extension().map(|e| e == "tmp").unwrap_or(false) {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if let Some((alg, hex)) = name.split_once('_') {
                        out.push(Digest::new(alg, hex));
                    }
                }
            }
        }
        Ok(out)
    }

    async fn size(&self) -> BlobResult<u64> {
        let digests = self.list().await?;
        let mut total = 0u64;
        for d in digests {
            if let Ok(meta) = fs::metadata(self.path_for(&d)).await {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

/// Streams `reader` into a temp file beside `final_path`, computing the
/// digest as bytes pass through, then renames into place. Returns the
/// number of bytes written. Caller is responsible for comparing the
/// computed digest against the expected one when that check matters (the
/// LRU cache does; the raw blob store only checks size).
pub(crate) async fn write_tmp_then_rename(
    tmp_path: &Path,
    final_path: &Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> BlobResult<u64> {
    let mut tmp = fs::File::create(tmp_path).await?;
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    tmp.flush().await?;
    tmp.sync_all().await?;
    drop(tmp);
    if let Err(e) = fs::rename(tmp_path, final_path).await {
        warn!(error = %e, "rename into place failed, cleaning up tmp file");
        let _ = fs::remove_file(tmp_path).await;
        return Err(e.into());
    }
    Ok(written)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let digest = Digest::sha256_of(b"hello");
        let mut reader = Cursor::new(b"hello".to_vec());
        let written = store.put(&digest, &mut reader, Some(5)).await.unwrap();
        assert_eq!(written, 5);
        assert!(store.has(&digest).await);

        let (mut r, size) = store.get(&digest).await.unwrap();
        assert_eq!(size, 5);
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn size_mismatch_discards_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let digest = Digest::sha256_of(b"hello");
        let mut reader = Cursor::new(b"hello".to_vec());
        let err = store.put(&digest, &mut reader, Some(999)).await.unwrap_err();
        assert!(matches!(err, BlobError::MismatchSize { .. }));
        assert!(!store.has(&digest).await);
    }

    #[tokio::test]
    async fn list_skips_tmp_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let digest = Digest::sha256_of(b"x");
        let mut reader = Cursor::new(b"x".to_vec());
        store.put(&digest, &mut reader, None).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec![digest.clone()]);
        store.delete(&digest).await.unwrap();
        store.delete(&digest).await.unwrap(); // idempotent
        assert!(store.list().await.unwrap().is_empty());
    }
}
