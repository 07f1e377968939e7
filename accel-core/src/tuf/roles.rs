use super::keys::RoleSignature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoleName {
    Root,
    Targets,
    Snapshot,
    Timestamp,
    Delegation(String),
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleName::Root => write!(f, "root"),
            RoleName::Targets => write!(f, "targets"),
            RoleName::Snapshot => write!(f, "snapshot"),
            RoleName::Timestamp => write!(f, "timestamp"),
            RoleName::Delegation(name) => write!(f, "{name}"),
        }
    }
}

/// `Initialized -> Published(v1) -> Published(v2) -> ... -> Expired`.
/// `Expired` disallows `Get*Metadata` until a refresh republishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    Initialized,
    Published(u64),
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub name: String,
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    pub custom: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub name: String,
    pub paths: Vec<String>,
    pub threshold: u32,
}

/// A published role: its signed payload plus the detached signatures over
/// its canonical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRole {
    pub role: String,
    pub version: u64,
    pub expires_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub signatures: Vec<RoleSignature>,
}

impl SignedRole {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
