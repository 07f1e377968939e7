use super::entry::CacheEntry;
use super::index::PersistedIndex;
use crate::blob::digest::RunningHash;
use crate::blob::Digest;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("digest mismatch: declared {declared}, computed {computed}")]
    DigestMismatch { declared: String, computed: String },
    #[error("blob too large for cache (max_size={max_size}, blob_size={blob_size})")]
    TooLarge { max_size: u64, blob_size: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_size: u64,
    pub max_size: u64,
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

struct State {
    /// MRU at the back, LRU at the front.
    order: IndexMap<Digest, ()>,
    entries: std::collections::HashMap<Digest, CacheEntry>,
    current_size: u64,
    hit_count: u64,
    miss_count: u64,
}

/// Bounded, durable, crash-safe LRU cache over a blob directory it owns
/// exclusively.
pub struct LruCache {
    root: PathBuf,
    max_size: u64,
    index: PersistedIndex,
    state: RwLock<State>,
}

impl LruCache {
    pub async fn open(root: impl Into<PathBuf>, max_size: u64) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let index = PersistedIndex::new(&root);
        let persisted = index.load().await;

        // Startup recovery: drop entries whose backing file is missing,
        // then sort survivors by last_access_at ascending so the rebuilt
        // recency sequence has the newest entry at the MRU head.
        let mut survivors = Vec::with_capacity(persisted.len());
        for entry in persisted {
            let path = blob_path(&root, &entry.digest);
            if fs::metadata(&path).await.is_ok() {
                survivors.push(entry);
            } else {
                debug!(digest = %entry.digest, "dropping cache entry with missing backing file");
            }
        }
        survivors.sort_by_key(|e| e.last_access_at);

        let mut order = IndexMap::new();
        let mut entries = std::collections::HashMap::new();
        let mut current_size = 0u64;
        for entry in survivors {
            current_size += entry.size;
            order.insert(entry.digest.clone(), ());
            entries.insert(entry.digest.clone(), entry);
        }

        let cache = Self {
            root,
            max_size,
            index,
            state: RwLock::new(State {
                order,
                entries,
                current_size,
                hit_count: 0,
                miss_count: 0,
            }),
        };
        Ok(cache)
    }

    /// Idempotent: if `digest` is already present, this is a no-op
    /// returning `0`. Evicts LRU entries until the new blob fits, then
    /// commits via tempfile+rename, updates the in-memory index, and
    /// persists it to disk before returning.
    pub async fn put(
        &self,
        digest: &Digest,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> CacheResult<u64> {
        if self.exists(digest) {
            // Drain the reader so callers that assumed `put` always
            // consumes it aren't surprised, but discard the bytes.
            let mut sink = Vec::new();
            let _ = reader.read_to_end(&mut sink).await;
            return Ok(0);
        }

        let final_path = blob_path(&self.root, digest);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = final_path.with_extension("tmp");

        // Buffer to a temp file while hashing, so we can validate the
        // digest before committing it as a cache entry.
        let (written, computed) = write_tmp_then_rename_to_staging(&tmp_path, reader).await?;
        if computed.as_str() != digest.as_str() {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CacheError::DigestMismatch {
                declared: digest.to_string(),
                computed: computed.to_string(),
            });
        }

        let victims = {
            let mut st = self.state.write();
            let mut evicted = Vec::new();
            while st.current_size + written > self.max_size && !st.order.is_empty() {
                if let Some((lru_digest, _)) = st.order.shift_remove_index(0) {
                    if let Some(e) = st.entries.remove(&lru_digest) {
                        st.current_size -= e.size;
                    }
                    evicted.push(lru_digest);
                }
            }
            if st.current_size + written > self.max_size {
                // Only acceptable if the cache is now empty and the blob
                // still doesn't fit: TooLarge. Roll the eviction decision
                // back is unnecessary since those entries are gone for
                // good reason (they were evicted to make room that still
                // wasn't enough); we surface TooLarge and leave the cache
                // empty rather than re-admit stale entries.
                drop(st);
                let _ = fs::remove_file(&tmp_path).await;
                for v in &evicted {
                    let _ = std::fs::remove_file(blob_path(&self.root, v));
                }
                return Err(CacheError::TooLarge {
                    max_size: self.max_size,
                    blob_size: written,
                });
            }
            let now = Utc::now();
            let entry = CacheEntry::new(digest.clone(), written, now);
            st.order.insert(digest.clone(), ());
            st.entries.insert(digest.clone(), entry);
            st.current_size += written;
            evicted
        };

        fs::rename(&tmp_path, &final_path).await?;
        for v in &victims {
            let _ = fs::remove_file(blob_path(&self.root, v)).await;
            info!(digest = %v, "evicted cache entry (LRU)");
        }

        self.persist_index().await?;
        Ok(written)
    }

    pub async fn get(&self, digest: &Digest) -> CacheResult<Option<(tokio::fs::File, u64)>> {
        let path = blob_path(&self.root, digest);
        let file_exists = fs::metadata(&path).await.is_ok();

        if !file_exists {
            // Torn state: entry present but file missing. Drop it and
            // report a miss.
            let had_entry = {
                let mut st = self.state.write();
                let had = st.entries.remove(digest).is_some();
                if had {
                    st.order.shift_remove(digest);
                }
                st.miss_count += 1;
                had
            };
            if had_entry {
                warn!(digest = %digest, "cache entry had no backing file; dropped");
                self.persist_index().await?;
            }
            return Ok(None);
        }

        let hit = {
            let mut st = self.state.write();
            match st.entries.get(digest).cloned() {
                Some(mut entry) => {
                    entry.touch(Utc::now());
                    st.order.shift_remove(digest);
                    st.order.insert(digest.clone(), ());
                    st.entries.insert(digest.clone(), entry);
                    st.hit_count += 1;
                    true
                }
                None => {
                    st.miss_count += 1;
                    false
                }
            }
        };

        if !hit {
            return Ok(None);
        }

        self.persist_index().await?;
        let file = fs::File::open(&path).await?;
        let size = fs::metadata(&path).await?.len();
        Ok(Some((file, size)))
    }

    pub async fn delete(&self, digest: &Digest) -> CacheResult<()> {
        let removed = {
            let mut st = self.state.write();
            if let Some(e) = st.entries.remove(digest) {
                st.current_size -= e.size;
                st.order.shift_remove(digest);
                true
            } else {
                false
            }
        };
        if removed {
            let _ = fs::remove_file(blob_path(&self.root, digest)).await;
            self.persist_index().await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> CacheResult<()> {
        let digests: Vec<Digest> = {
            let mut st = self.state.write();
            let digests: Vec<Digest> = st.entries.keys().cloned().collect();
            st.entries.clear();
            st.order.clear();
            st.current_size = 0;
            digests
        };
        for d in digests {
            let _ = fs::remove_file(blob_path(&self.root, &d)).await;
        }
        self.persist_index().await?;
        Ok(())
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        self.state.read().entries.contains_key(digest)
    }

    pub fn stats(&self) -> CacheStats {
        let st = self.state.read();
        CacheStats {
            total_size: st.current_size,
            max_size: self.max_size,
            entry_count: st.entries.len(),
            hit_count: st.hit_count,
            miss_count: st.miss_count,
        }
    }

    /// Snapshot of all live entries, MRU-last, for admin listing endpoints.
    pub fn list_entries(&self) -> Vec<CacheEntry> {
        let st = self.state.read();
        st.order
            .keys()
            .filter_map(|d| st.entries.get(d).cloned())
            .collect()
    }

    async fn persist_index(&self) -> CacheResult<()> {
        let snapshot: Vec<CacheEntry> = {
            let st = self.state.read();
            st.order
                .keys()
                .filter_map(|d| st.entries.get(d).cloned())
                .collect()
        };
        self.index.persist(&snapshot).await?;
        Ok(())
    }
}

fn blob_path(root: &std::path::Path, digest: &Digest) -> PathBuf {
    root.join(digest.shard()).join(digest.as_str().replace(':', "_"))
}

async fn write_tmp_then_rename_to_staging(
    tmp_path: &std::path::Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> CacheResult<(u64, Digest)> {
    use tokio::io::AsyncWriteExt;
    let mut tmp = fs::File::create(tmp_path).await?;
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    let mut hash = RunningHash::new();
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n]).await?;
        hash.update(&buf[..n]);
        written += n as u64;
    }
    tmp.flush().await?;
    tmp.sync_all().await?;
    Ok((written, hash.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn put_n_bytes(cache: &LruCache, content: &[u8]) -> Digest {
        let digest = Digest::sha256_of(content);
        let mut reader = Cursor::new(content.to_vec());
        cache.put(&digest, &mut reader).await.unwrap();
        digest
    }

    #[tokio::test]
    async fn evicts_lru_on_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LruCache::open(dir.path(), 300).await.unwrap();
        let a = put_n_bytes(&cache, &[b'a'; 100]).await;
        let b = put_n_bytes(&cache, &[b'b'; 100]).await;
        let c = put_n_bytes(&cache, &[b'c'; 100]).await;
        // touch a so it's MRU
        cache.get(&a).await.unwrap();
        let d = put_n_bytes(&cache, &[b'd'; 100]).await;

        let stats = cache.stats();
        assert_eq!(stats.total_size, 300);
        assert!(cache.exists(&a));
        assert!(!cache.exists(&b), "b should have been evicted");
        assert!(cache.exists(&c));
        assert!(cache.exists(&d));
    }

    #[tokio::test]
    async fn digest_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LruCache::open(dir.path(), 1024).await.unwrap();
        let wrong = Digest::sha256_of(b"not-the-actual-content");
        let mut reader = Cursor::new(b"actual-content".to_vec());
        let err = cache.put(&wrong, &mut reader).await.unwrap_err();
        assert!(matches!(err, CacheError::DigestMismatch { .. }));
        assert!(!cache.exists(&wrong));
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LruCache::open(dir.path(), 1024).await.unwrap();
        let digest = put_n_bytes(&cache, b"hello").await;
        let mut reader2 = Cursor::new(b"hello".to_vec());
        let second = cache.put(&digest, &mut reader2).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(cache.stats().total_size, 5);
    }

    #[tokio::test]
    async fn too_large_blob_is_rejected_even_when_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LruCache::open(dir.path(), 4).await.unwrap();
        let digest = Digest::sha256_of(b"hello");
        let mut reader = Cursor::new(b"hello".to_vec());
        let err = cache.put(&digest, &mut reader).await.unwrap_err();
        assert!(matches!(err, CacheError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn get_miss_on_unknown_digest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LruCache::open(dir.path(), 1024).await.unwrap();
        let digest = Digest::sha256_of(b"nope");
        assert!(cache.get(&digest).await.unwrap().is_none());
        assert_eq!(cache.stats().miss_count, 1);
    }

    #[tokio::test]
    async fn restart_recovers_index_and_drops_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let digest;
        {
            let cache = LruCache::open(dir.path(), 1024).await.unwrap();
            digest = put_n_bytes(&cache, b"durable").await;
        }
        let reopened = LruCache::open(dir.path(), 1024).await.unwrap();
        assert!(reopened.exists(&digest));
        assert_eq!(reopened.stats().total_size, 7);
    }
}
