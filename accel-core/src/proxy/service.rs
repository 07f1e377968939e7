use crate::blob::Digest;
use crate::cache::{CacheError, LruCache};
use crate::upstream::UpstreamRouter;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default Docker/OCI media type accept header for blob and manifest
/// fetches, per spec's "default Docker media accepts".
const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json"
);
const BLOB_ACCEPT: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no enabled upstreams configured")]
    NoEnabledUpstreams,
    #[error("all upstreams failed, last error: {0}")]
    AllUpstreamsFailed(String),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

pub struct ManifestResponse {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub struct ProxyService {
    cache: Arc<LruCache>,
    router: Arc<UpstreamRouter>,
    http: reqwest::Client,
}

impl ProxyService {
    pub fn new(cache: Arc<LruCache>, router: Arc<UpstreamRouter>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { cache, router, http }
    }

    /// Cache → upstream cascade for a blob. On an upstream hit, the body is
    /// teed into the cache and a cache-backed reader is returned so the
    /// bytes the caller sees are guaranteed to be exactly what the cache
    /// now holds.
    pub async fn pull_blob(&self, name: &str, digest: &str) -> ProxyResult<(File, u64)> {
        let parsed = Digest::from_str(digest).map_err(|_| ProxyError::InvalidDigest(digest.to_string()))?;

        if let Some(hit) = self.cache.get(&parsed).await? {
            debug!(name, digest, "proxy cache hit");
            return Ok(hit);
        }

        let cascade = self.router.enabled_cascade().await;
        if cascade.is_empty() {
            return Err(ProxyError::NoEnabledUpstreams);
        }

        let mut last_error = String::new();
        for upstream in cascade {
            let url = format!(
                "{}/v2/{}/blobs/{}",
                upstream.url.trim_end_matches('/'),
                name,
                digest
            );
            let resp = match self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, BLOB_ACCEPT)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(upstream = upstream.name, error = %e, "upstream blob fetch failed");
                    last_error = e.to_string();
                    continue;
                }
            };
            if resp.status() != reqwest::StatusCode::OK {
                last_error = format!("{}: HTTP {}", upstream.name, resp.status());
                continue;
            }
            let expected_len = resp.content_length();
            let stream = resp
                .bytes_stream()
                .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
            let mut reader = StreamReader::new(stream);
            match self.cache.put(&parsed, &mut reader).await {
                Ok(written) => {
                    if let Some(expected) = expected_len {
                        if expected != written && written != 0 {
                            warn!(upstream = upstream.name, expected, written, "content-length mismatch");
                            let _ = self.cache.delete(&parsed).await;
                            last_error = format!("{}: content-length mismatch", upstream.name);
                            continue;
                        }
                    }
                    if let Some(hit) = self.cache.get(&parsed).await? {
                        return Ok(hit);
                    }
                }
                Err(e) => {
                    warn!(upstream = upstream.name, error = %e, "cache ingestion failed");
                    last_error = e.to_string();
                    continue;
                }
            }
        }

        Err(ProxyError::AllUpstreamsFailed(last_error))
    }

    /// Cache → upstream cascade for a manifest. Manifests are mutable by
    /// tag, so the result is never cached.
    pub async fn pull_manifest(&self, name: &str, reference: &str) -> ProxyResult<ManifestResponse> {
        let cascade = self.router.enabled_cascade().await;
        if cascade.is_empty() {
            return Err(ProxyError::NoEnabledUpstreams);
        }

        let mut last_error = String::new();
        for upstream in cascade {
            let url = format!(
                "{}/v2/{}/manifests/{}",
                upstream.url.trim_end_matches('/'),
                name,
                reference
            );
            let resp = match self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            if resp.status() != reqwest::StatusCode::OK {
                last_error = format!("{}: HTTP {}", upstream.name, resp.status());
                continue;
            }
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/vnd.docker.distribution.manifest.v2+json")
                .to_string();
            match resp.bytes().await {
                Ok(bytes) => {
                    return Ok(ManifestResponse {
                        bytes: bytes.to_vec(),
                        content_type,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            }
        }

        Err(ProxyError::AllUpstreamsFailed(last_error))
    }
}

use futures_util::StreamExt;
