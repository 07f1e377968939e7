//! Append-only audit log with a rolling SHA-256 hash chain.

use crate::canonical::canonical_json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: Option<String>,
    pub details: serde_json::Value,
    pub blockchain_hash: String,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("hash chain broken at event {index} (id {id})")]
    ChainBroken { index: usize, id: Uuid },
}

pub type AuditResult<T> = Result<T, AuditError>;

/// Append-only `<data>/audit.log`. Each event's `blockchain_hash` is
/// `SHA256(previous_hash || canonical(event_without_hash))`, so tampering
/// with any stored event invalidates every hash after it.
pub struct AuditLog {
    path: PathBuf,
    last_hash: Mutex<String>,
}

impl AuditLog {
    pub async fn open(path: impl Into<PathBuf>) -> AuditResult<Self> {
        let path = path.into();
        let last_hash = match tokio::fs::read(&path).await {
            Ok(bytes) => last_hash_of(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GENESIS_HASH.to_string(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub async fn append(
        &self,
        event_type: &str,
        actor: Option<String>,
        details: serde_json::Value,
    ) -> AuditResult<AuditEvent> {
        let mut guard = self.last_hash.lock().await;

        let mut event = AuditEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            actor,
            details,
            blockchain_hash: String::new(),
        };
        event.blockchain_hash = next_hash(&guard, &event)?;

        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        *guard = event.blockchain_hash.clone();
        Ok(event)
    }

    /// Recomputes the chain from the genesis hash; fails at the first
    /// event whose stored `blockchain_hash` doesn't match.
    pub async fn verify(&self) -> AuditResult<()> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let mut prev = GENESIS_HASH.to_string();
        let mut index = 0usize;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)?;
            let expected = next_hash(&prev, &event)?;
            if expected != event.blockchain_hash {
                return Err(AuditError::ChainBroken { index, id: event.id });
            }
            prev = event.blockchain_hash.clone();
            index += 1;
        }
        Ok(())
    }
}

fn next_hash(prev: &str, event: &AuditEvent) -> AuditResult<String> {
    let mut unhashed = event.clone();
    unhashed.blockchain_hash = String::new();
    let canonical = canonical_json(&unhashed)?;
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

fn last_hash_of(bytes: &[u8]) -> AuditResult<String> {
    let text = String::from_utf8_lossy(bytes);
    match text.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => {
            let event: AuditEvent = serde_json::from_str(line)?;
            Ok(event.blockchain_hash)
        }
        None => Ok(GENESIS_HASH.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn chain_verifies_after_several_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).await.unwrap();
        log.append("login", Some("alice".into()), json!({"ip": "127.0.0.1"})).await.unwrap();
        log.append("logout", Some("alice".into()), json!({})).await.unwrap();
        log.verify().await.unwrap();
    }

    #[tokio::test]
    async fn tampering_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).await.unwrap();
        log.append("login", None, json!({})).await.unwrap();
        log.append("login", None, json!({})).await.unwrap();

        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents = contents.replace("login", "LOGIN");
        tokio::fs::write(&path, contents).await.unwrap();

        assert!(log.verify().await.is_err());
    }

    #[tokio::test]
    async fn reopening_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let log = AuditLog::open(&path).await.unwrap();
            log.append("a", None, json!({})).await.unwrap();
        }
        let log = AuditLog::open(&path).await.unwrap();
        log.append("b", None, json!({})).await.unwrap();
        log.verify().await.unwrap();
    }
}
