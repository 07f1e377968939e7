use super::keys::{store_key_dir, KeyPair, RoleKeySet, RoleSignature};
use super::roles::{Delegation, RoleName, RoleState, SignedRole, TargetRecord};
use crate::canonical::canonical_json;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use parking_lot::RwLock;
use serde_json::json;
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const ROOT_LIFETIME_DAYS: i64 = 365;
const TARGETS_LIFETIME_DAYS: i64 = 90;
const SNAPSHOT_LIFETIME_DAYS: i64 = 7;
const TIMESTAMP_LIFETIME_DAYS: i64 = 1;

const LONG_LIVED_WARNING: ChronoDuration = ChronoDuration::days(7);
const TIMESTAMP_WARNING: ChronoDuration = ChronoDuration::hours(1);

const AUTO_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum TufError {
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("not initialized")]
    NotInitialized,
    #[error("role {0} has expired and must be refreshed before it can be read")]
    RoleExpired(String),
    #[error("role {0} signature does not verify under its authorized key")]
    SignatureInvalid(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("delegation not found: {0}")]
    DelegationNotFound(String),
    #[error("delegation paths must be a subset of the parent's delegated paths")]
    DelegationPathsNotSubset,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type TufResult<T> = Result<T, TufError>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExpiryWarning {
    pub role: String,
    pub expires_at: DateTime<Utc>,
    pub warning_window_secs: i64,
}

struct State {
    initialized: bool,
    keys: HashMap<RoleName, RoleKeySet>,
    published: HashMap<RoleName, SignedRole>,
    targets: BTreeMap<String, TargetRecord>,
    delegations: HashMap<String, Delegation>,
}

/// Maintains the root/targets/snapshot/timestamp role chain: signs
/// targets, rotates keys, and auto-refreshes the timestamp. Exclusively
/// owns private-key material under `<data_dir>/tuf/keys` (mode 0600).
pub struct TufManager {
    data_dir: PathBuf,
    state: RwLock<State>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TufManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            state: RwLock::new(State {
                initialized: false,
                keys: HashMap::new(),
                published: HashMap::new(),
                targets: BTreeMap::new(),
                delegations: HashMap::new(),
            }),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Generates a key for each top-level role, publishes v1 of each with
    /// the default lifetimes, and persists keys + signed payloads. Fails
    /// if already initialized.
    pub async fn initialize(&self) -> TufResult<()> {
        {
            let st = self.state.read();
            if st.initialized {
                return Err(TufError::AlreadyInitialized);
            }
        }

        let root_key = RoleKeySet::single(KeyPair::generate());
        let targets_key = RoleKeySet::single(KeyPair::generate());
        let snapshot_key = RoleKeySet::single(KeyPair::generate());
        let timestamp_key = RoleKeySet::single(KeyPair::generate());

        let key_dir = store_key_dir(&self.data_dir);
        root_key.persist_all(&key_dir, "root").await?;
        targets_key.persist_all(&key_dir, "targets").await?;
        snapshot_key.persist_all(&key_dir, "snapshot").await?;
        timestamp_key.persist_all(&key_dir, "timestamp").await?;

        {
            let mut st = self.state.write();
            st.keys.insert(RoleName::Root, root_key);
            st.keys.insert(RoleName::Targets, targets_key);
            st.keys.insert(RoleName::Snapshot, snapshot_key);
            st.keys.insert(RoleName::Timestamp, timestamp_key);
            st.initialized = true;
        }

        self.publish_targets_chain().await?;
        self.publish_root(1).await?;
        Ok(())
    }

    /// Computes length + sha256 hash, adds the target, then re-signs
    /// targets -> snapshot -> timestamp in that order.
    pub async fn add_target(
        &self,
        name: &str,
        bytes: &[u8],
        custom: Option<serde_json::Value>,
    ) -> TufResult<()> {
        self.require_initialized()?;
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(Sha256::digest(bytes)));
        let record = TargetRecord {
            name: name.to_string(),
            length: bytes.len() as u64,
            hashes,
            custom,
        };
        {
            let mut st = self.state.write();
            st.targets.insert(name.to_string(), record);
        }
        self.publish_targets_chain().await
    }

    pub async fn remove_target(&self, name: &str) -> TufResult<()> {
        self.require_initialized()?;
        {
            let mut st = self.state.write();
            if st.targets.remove(name).is_none() {
                return Err(TufError::TargetNotFound(name.to_string()));
            }
        }
        self.publish_targets_chain().await
    }

    pub fn verify_target(&self, name: &str, bytes: &[u8]) -> bool {
        let st = self.state.read();
        let Some(record) = st.targets.get(name) else {
            return false;
        };
        if record.length != bytes.len() as u64 {
            return false;
        }
        record.hashes.iter().all(|(alg, expected)| match alg.as_str() {
            "sha256" => hex::encode(Sha256::digest(bytes)) == *expected,
            _ => false,
        })
    }

    /// Generates a new keypair for `role` and re-signs whatever depends on
    /// it. Rotating `root` requires the new root to be co-signed by both
    /// the old and new key (rollover); rotating any other role requires
    /// root to re-sign (its payload lists every role's authorized keys).
    pub async fn rotate_key(&self, role: RoleName) -> TufResult<()> {
        self.require_initialized()?;
        let key_dir = store_key_dir(&self.data_dir);

        if role == RoleName::Root {
            let old_key = {
                let st = self.state.read();
                st.keys.get(&RoleName::Root).and_then(|k| k.keys.first().cloned())
            };
            let new_key = KeyPair::generate();
            new_key.persist(&key_dir.join("root-0.pem")).await?;
            {
                let mut st = self.state.write();
                st.keys.insert(RoleName::Root, RoleKeySet::single(new_key.clone()));
            }
            self.publish_root_with_rollover(old_key, new_key).await?;
            return Ok(());
        }

        let new_key = KeyPair::generate();
        let role_label = role.to_string();
        new_key.persist(&key_dir.join(format!("{role_label}-0.pem"))).await?;
        {
            let mut st = self.state.write();
            st.keys.insert(role.clone(), RoleKeySet::single(new_key));
        }
        self.bump_root_version().await?;
        match role {
            RoleName::Targets => self.publish_targets_chain().await?,
            RoleName::Snapshot => self.publish_snapshot().await?,
            RoleName::Timestamp => self.refresh_timestamp().await?,
            _ => {}
        }
        Ok(())
    }

    /// Re-signs timestamp with a bumped version and a fresh `expires_at`.
    pub async fn refresh_timestamp(&self) -> TufResult<()> {
        self.require_initialized()?;
        let (snapshot_version, snapshot_hash) = {
            let st = self.state.read();
            let snapshot = st.published.get(&RoleName::Snapshot);
            match snapshot {
                Some(s) => (s.version, canonical_hash(&s.payload)),
                None => (0, String::new()),
            }
        };
        let next_version = self.next_version(&RoleName::Timestamp);
        let payload = json!({
            "version": next_version,
            "snapshot_version": snapshot_version,
            "snapshot_hash": snapshot_hash,
        });
        self.sign_and_publish(RoleName::Timestamp, next_version, payload, TIMESTAMP_LIFETIME_DAYS)
            .await
    }

    pub async fn add_delegation(&self, name: &str, paths: Vec<String>, threshold: u32) -> TufResult<()> {
        self.require_initialized()?;
        // Top-level targets delegates "*", so any non-empty path set is a
        // valid subset; nested delegations would need a narrower check.
        if paths.is_empty() {
            return Err(TufError::DelegationPathsNotSubset);
        }
        let mut st = self.state.write();
        st.delegations.insert(
            name.to_string(),
            Delegation {
                name: name.to_string(),
                paths,
                threshold,
            },
        );
        Ok(())
    }

    pub fn remove_delegation(&self, name: &str) -> TufResult<()> {
        let mut st = self.state.write();
        if st.delegations.remove(name).is_none() {
            return Err(TufError::DelegationNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn list_delegations(&self) -> Vec<Delegation> {
        self.state.read().delegations.values().cloned().collect()
    }

    pub fn get_root_metadata(&self) -> TufResult<serde_json::Value> {
        self.get_metadata(&RoleName::Root)
    }

    pub fn get_targets_metadata(&self) -> TufResult<serde_json::Value> {
        self.get_metadata(&RoleName::Targets)
    }

    pub fn get_snapshot_metadata(&self) -> TufResult<serde_json::Value> {
        self.get_metadata(&RoleName::Snapshot)
    }

    pub fn get_timestamp_metadata(&self) -> TufResult<serde_json::Value> {
        self.get_metadata(&RoleName::Timestamp)
    }

    /// `Initialized -> Published(v) -> Expired`, derived from the published
    /// role chain rather than tracked separately so it can never drift from
    /// what's actually on disk.
    pub fn role_state(&self, role: &RoleName) -> RoleState {
        let st = self.state.read();
        match st.published.get(role) {
            None => RoleState::Initialized,
            Some(signed) if signed.is_expired(Utc::now()) => RoleState::Expired,
            Some(signed) => RoleState::Published(signed.version),
        }
    }

    /// Lifecycle state of every top-level role, keyed by role name.
    pub fn role_states(&self) -> BTreeMap<String, RoleState> {
        [RoleName::Root, RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp]
            .into_iter()
            .map(|role| {
                let state = self.role_state(&role);
                (role.to_string(), state)
            })
            .collect()
    }

    fn get_metadata(&self, role: &RoleName) -> TufResult<serde_json::Value> {
        self.require_initialized()?;
        match self.role_state(role) {
            RoleState::Initialized => Err(TufError::NotInitialized),
            RoleState::Expired => Err(TufError::RoleExpired(role.to_string())),
            RoleState::Published(_) => {
                let st = self.state.read();
                let signed = st.published.get(role).expect("Published state implies a published entry");
                self.verify_signed(role, signed)?;
                Ok(serde_json::to_value(signed).expect("SignedRole always serializes"))
            }
        }
    }

    /// Rejects a role whose recorded signatures don't verify under its
    /// currently authorized key(s) -- catches both a corrupted payload and a
    /// signature produced by a key that's since been rotated out.
    fn verify_signed(&self, role: &RoleName, signed: &SignedRole) -> TufResult<()> {
        let authorized = {
            let st = self.state.read();
            st.keys.get(role).map(|k| k.public_keys_hex()).unwrap_or_default()
        };
        let bytes = canonical_json(&signed.payload)?;
        let verifies = signed
            .signatures
            .iter()
            .filter(|sig| authorized.contains(&sig.key_id))
            .any(|sig| verify_hex_signature(&bytes, sig));
        if verifies {
            Ok(())
        } else {
            Err(TufError::SignatureInvalid(role.to_string()))
        }
    }

    /// Warnings for any role whose `expires_at - now` is under its
    /// warning window (7 days for long-lived roles, 1 hour for
    /// timestamp).
    pub fn check_expiry(&self) -> Vec<ExpiryWarning> {
        let st = self.state.read();
        let now = Utc::now();
        st.published
            .iter()
            .filter_map(|(role, signed)| {
                let window = if *role == RoleName::Timestamp {
                    TIMESTAMP_WARNING
                } else {
                    LONG_LIVED_WARNING
                };
                if signed.expires_at - now < window {
                    Some(ExpiryWarning {
                        role: role.to_string(),
                        expires_at: signed.expires_at,
                        warning_window_secs: window.num_seconds(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Starts the hourly auto-refresh background loop. Errors from a
    /// refresh attempt are logged, never fatal.
    pub async fn start(self: &Arc<Self>) {
        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        let mgr = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(AUTO_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = interval.tick() => mgr.auto_refresh().await,
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn auto_refresh(&self) {
        let warnings = self.check_expiry();
        let timestamp_due = warnings.iter().any(|w| w.role == "timestamp");
        if timestamp_due {
            if let Err(e) = self.refresh_timestamp().await {
                error!(error = %e, "auto-refresh of timestamp role failed");
            } else {
                info!("auto-refreshed timestamp role");
            }
        }
    }

    fn require_initialized(&self) -> TufResult<()> {
        if self.state.read().initialized {
            Ok(())
        } else {
            Err(TufError::NotInitialized)
        }
    }

    fn next_version(&self, role: &RoleName) -> u64 {
        self.state
            .read()
            .published
            .get(role)
            .map(|s| s.version + 1)
            .unwrap_or(1)
    }

    async fn publish_targets_chain(&self) -> TufResult<()> {
        self.publish_targets().await?;
        self.publish_snapshot().await?;
        self.refresh_timestamp().await?;
        Ok(())
    }

    async fn publish_targets(&self) -> TufResult<()> {
        let version = self.next_version(&RoleName::Targets);
        let targets = {
            let st = self.state.read();
            st.targets.clone()
        };
        let payload = json!({
            "version": version,
            "targets": targets,
        });
        self.sign_and_publish(RoleName::Targets, version, payload, TARGETS_LIFETIME_DAYS)
            .await
    }

    async fn publish_snapshot(&self) -> TufResult<()> {
        let version = self.next_version(&RoleName::Snapshot);
        let targets_version = {
            let st = self.state.read();
            st.published.get(&RoleName::Targets).map(|s| s.version).unwrap_or(0)
        };
        let payload = json!({
            "version": version,
            "targets_version": targets_version,
        });
        self.sign_and_publish(RoleName::Snapshot, version, payload, SNAPSHOT_LIFETIME_DAYS)
            .await
    }

    async fn publish_root(&self, version: u64) -> TufResult<()> {
        let payload = self.root_payload(version);
        self.sign_and_publish(RoleName::Root, version, payload, ROOT_LIFETIME_DAYS)
            .await
    }

    fn root_payload(&self, version: u64) -> serde_json::Value {
        let st = self.state.read();
        let mut role_keys = BTreeMap::new();
        for role in [RoleName::Root, RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp] {
            if let Some(keyset) = st.keys.get(&role) {
                role_keys.insert(role.to_string(), keyset.public_keys_hex());
            }
        }
        json!({
            "version": version,
            "role_keys": role_keys,
        })
    }

    async fn bump_root_version(&self) -> TufResult<()> {
        let version = self.next_version(&RoleName::Root);
        self.publish_root(version).await
    }

    async fn publish_root_with_rollover(&self, old_key: Option<KeyPair>, new_key: KeyPair) -> TufResult<()> {
        let version = self.next_version(&RoleName::Root);
        let payload = self.root_payload(version);
        let bytes = canonical_json(&payload)?;
        let mut signatures = vec![RoleSignature {
            key_id: new_key.key_id(),
            signature_hex: hex::encode(new_key.sign(&bytes).to_bytes()),
        }];
        if let Some(old) = old_key {
            signatures.push(RoleSignature {
                key_id: old.key_id(),
                signature_hex: hex::encode(old.sign(&bytes).to_bytes()),
            });
        }
        let signed = SignedRole {
            role: RoleName::Root.to_string(),
            version,
            expires_at: Utc::now() + ChronoDuration::days(ROOT_LIFETIME_DAYS),
            payload,
            signatures,
        };
        self.persist_and_store(RoleName::Root, signed).await
    }

    async fn sign_and_publish(
        &self,
        role: RoleName,
        version: u64,
        payload: serde_json::Value,
        lifetime_days: i64,
    ) -> TufResult<()> {
        let bytes = canonical_json(&payload)?;
        let key = {
            let st = self.state.read();
            st.keys
                .get(&role)
                .and_then(|k| k.keys.first().cloned())
                .ok_or(TufError::NotInitialized)?
        };
        let signature = RoleSignature {
            key_id: key.key_id(),
            signature_hex: hex::encode(key.sign(&bytes).to_bytes()),
        };
        let signed = SignedRole {
            role: role.to_string(),
            version,
            expires_at: Utc::now() + ChronoDuration::days(lifetime_days),
            payload,
            signatures: vec![signature],
        };
        self.persist_and_store(role, signed).await
    }

    async fn persist_and_store(&self, role: RoleName, signed: SignedRole) -> TufResult<()> {
        let path = self.data_dir.join("tuf").join(format!("{role}.json"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&signed)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        info!(role = %role, version = signed.version, "published new role version");
        self.state.write().published.insert(role, signed);
        Ok(())
    }
}

fn canonical_hash(value: &serde_json::Value) -> String {
    match canonical_json(value) {
        Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
        Err(_) => String::new(),
    }
}

fn verify_hex_signature(bytes: &[u8], sig: &RoleSignature) -> bool {
    let Ok(key_bytes) = hex::decode(&sig.key_id) else {
        return false;
    };
    let Ok(key_arr): Result<[u8; 32], _> = key_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_arr) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(&sig.signature_hex) else {
        return false;
    };
    let Ok(sig_arr): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_arr);
    KeyPair::verify(&verifying_key, bytes, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_then_add_and_verify_target() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        mgr.initialize().await.unwrap();

        mgr.add_target("foo", b"hello", None).await.unwrap();
        let meta = mgr.get_targets_metadata().unwrap();
        assert!(meta["payload"]["targets"]["foo"]["length"] == json!(5));

        assert!(mgr.verify_target("foo", b"hello"));
        assert!(!mgr.verify_target("foo", b"Hello"));
    }

    #[tokio::test]
    async fn versions_strictly_increase_across_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        mgr.initialize().await.unwrap();
        let v1 = mgr.get_targets_metadata().unwrap()["version"].as_u64().unwrap();
        mgr.add_target("a", b"x", None).await.unwrap();
        let v2 = mgr.get_targets_metadata().unwrap()["version"].as_u64().unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        mgr.initialize().await.unwrap();
        assert!(matches!(mgr.initialize().await, Err(TufError::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn rotate_root_key_rolls_over_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        mgr.initialize().await.unwrap();
        mgr.rotate_key(RoleName::Root).await.unwrap();
        let root = mgr.get_root_metadata().unwrap();
        let sigs = root["signatures"].as_array().unwrap();
        assert_eq!(sigs.len(), 2, "root rollover must carry old+new signatures");
    }

    #[test]
    fn keypair_sign_verify_round_trip() {
        let key = KeyPair::generate();
        let payload = b"hello tuf";
        let signature = key.sign(payload);
        assert!(KeyPair::verify(&key.verifying_key(), payload, &signature));
        assert!(!KeyPair::verify(&key.verifying_key(), b"tampered payload", &signature));

        let other = KeyPair::generate();
        assert!(!KeyPair::verify(&other.verifying_key(), payload, &signature));
    }

    #[tokio::test]
    async fn metadata_read_rejects_a_tampered_signature() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        mgr.initialize().await.unwrap();
        mgr.get_targets_metadata().unwrap();

        {
            let mut st = mgr.state.write();
            let signed = st.published.get_mut(&RoleName::Targets).unwrap();
            signed.signatures[0].signature_hex = "00".repeat(64);
        }

        let err = mgr.get_targets_metadata().unwrap_err();
        assert!(matches!(err, TufError::SignatureInvalid(role) if role == "targets"));
    }

    #[tokio::test]
    async fn role_state_tracks_initialized_published_and_expired() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        assert_eq!(mgr.role_state(&RoleName::Targets), RoleState::Initialized);

        mgr.initialize().await.unwrap();
        assert_eq!(mgr.role_state(&RoleName::Targets), RoleState::Published(1));

        {
            let mut st = mgr.state.write();
            let signed = st.published.get_mut(&RoleName::Targets).unwrap();
            signed.expires_at = Utc::now() - ChronoDuration::seconds(1);
        }
        assert_eq!(mgr.role_state(&RoleName::Targets), RoleState::Expired);
        assert!(matches!(mgr.get_targets_metadata(), Err(TufError::RoleExpired(_))));
    }

    #[tokio::test]
    async fn delegation_rejects_empty_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TufManager::new(dir.path());
        mgr.initialize().await.unwrap();
        let err = mgr.add_delegation("team-a", vec![], 1).await.unwrap_err();
        assert!(matches!(err, TufError::DelegationPathsNotSubset));
        mgr.add_delegation("team-a", vec!["team-a/*".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(mgr.list_delegations().len(), 1);
    }
}
