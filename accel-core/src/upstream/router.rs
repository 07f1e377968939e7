use super::source::{default_sources, UpstreamSource};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("an upstream named '{0}' already exists")]
    DuplicateName(String),
    #[error("no upstream named '{0}'")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Maintains the prioritized upstream list and persists it as JSON with
/// atomic rename. Reads take a shared lock, mutation takes exclusive.
pub struct UpstreamRouter {
    path: PathBuf,
    sources: RwLock<Vec<UpstreamSource>>,
    http: reqwest::Client,
}

impl UpstreamRouter {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sources = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "upstreams.json is corrupt, falling back to defaults");
                default_sources()
            }),
            Err(_) => default_sources(),
        };
        let http = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            path,
            sources: RwLock::new(sources),
            http,
        }
    }

    /// Returns a copy of the list, stable-sorted by priority then
    /// insertion order.
    pub async fn list(&self) -> Vec<UpstreamSource> {
        let guard = self.sources.read().await;
        let mut sorted = guard.clone();
        sorted.sort_by_key(|s| s.priority);
        sorted
    }

    /// Priority-sorted, enabled-only snapshot for a single pull-cascade
    /// call (see the proxy cascade's per-call snapshot requirement).
    pub async fn enabled_cascade(&self) -> Vec<UpstreamSource> {
        self.list().await.into_iter().filter(|s| s.enabled).collect()
    }

    pub async fn add(&self, source: UpstreamSource) -> UpstreamResult<()> {
        let mut guard = self.sources.write().await;
        if guard.iter().any(|s| s.name == source.name) {
            return Err(UpstreamError::DuplicateName(source.name));
        }
        guard.push(source);
        self.persist(&guard).await
    }

    pub async fn update(&self, name: &str, url: String, priority: i32) -> UpstreamResult<()> {
        let mut guard = self.sources.write().await;
        let entry = guard
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| UpstreamError::NotFound(name.to_string()))?;
        entry.url = url;
        entry.priority = priority;
        self.persist(&guard).await
    }

    pub async fn remove(&self, name: &str) -> UpstreamResult<()> {
        let mut guard = self.sources.write().await;
        let before = guard.len();
        guard.retain(|s| s.name != name);
        if guard.len() == before {
            return Err(UpstreamError::NotFound(name.to_string()));
        }
        self.persist(&guard).await
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> UpstreamResult<()> {
        let mut guard = self.sources.write().await;
        let entry = guard
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| UpstreamError::NotFound(name.to_string()))?;
        entry.enabled = enabled;
        self.persist(&guard).await
    }

    /// `GET {url}/v2/` with a 5s timeout. A V2 registry answers with 200 or
    /// 401 (auth required but present); unreachability is a *value*, not an
    /// operation error.
    pub async fn check_health(&self, name: &str) -> UpstreamResult<bool> {
        let url = {
            let guard = self.sources.read().await;
            guard
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.url.clone())
                .ok_or_else(|| UpstreamError::NotFound(name.to_string()))?
        };
        let endpoint = format!("{}/v2/", url.trim_end_matches('/'));
        let reachable = match self.http.get(&endpoint).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                status == 200 || status == 401
            }
            Err(e) => {
                debug!(upstream = name, error = %e, "health probe failed");
                false
            }
        };
        Ok(reachable)
    }

    async fn persist(&self, sources: &[UpstreamSource]) -> UpstreamResult<()> {
        let bytes = serde_json::to_vec_pretty(sources)?;
        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_builtin_list_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let router = UpstreamRouter::load(dir.path().join("upstreams.json")).await;
        let list = router.list().await;
        assert_eq!(list.len(), 3);
        assert!(list.windows(2).all(|w| w[0].priority <= w[1].priority));
    }

    #[tokio::test]
    async fn add_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let router = UpstreamRouter::load(dir.path().join("upstreams.json")).await;
        let err = router
            .add(UpstreamSource::new("docker-hub", "https://x", 9))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn disable_removes_from_cascade_but_not_list() {
        let dir = tempfile::tempdir().unwrap();
        let router = UpstreamRouter::load(dir.path().join("upstreams.json")).await;
        router.set_enabled("docker-hub", false).await.unwrap();
        assert_eq!(router.list().await.len(), 3);
        assert!(router
            .enabled_cascade()
            .await
            .iter()
            .all(|s| s.name != "docker-hub"));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upstreams.json");
        {
            let router = UpstreamRouter::load(&path).await;
            router
                .add(UpstreamSource::new("extra", "https://extra.example", 0))
                .await
                .unwrap();
        }
        let reloaded = UpstreamRouter::load(&path).await;
        let list = reloaded.list().await;
        assert_eq!(list[0].name, "extra");
    }
}
