use super::entry::CacheEntry;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

const INDEX_FILE: &str = "cache_index.json";

/// The durable index: write-tempfile-rename so a crash mid-write never
/// leaves a torn `cache_index.json` behind.
pub struct PersistedIndex {
    path: PathBuf,
}

impl PersistedIndex {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(INDEX_FILE),
        }
    }

    pub async fn load(&self) -> Vec<CacheEntry> {
        match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "cache index is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    pub async fn persist(&self, entries: &[CacheEntry]) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
