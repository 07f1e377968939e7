use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// An Ed25519 keypair persisted on disk (private key mode 0600).
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn key_id(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> Signature {
        self.signing_key.sign(payload)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub async fn persist(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, self.signing_key.to_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = fs::read(path).await?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad key length"))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&arr),
        })
    }

    pub fn verify(public_key: &VerifyingKey, payload: &[u8], signature: &Signature) -> bool {
        public_key.verify(payload, signature).is_ok()
    }
}

/// The key-set backing a single role, plus its signing threshold.
#[derive(Clone)]
pub struct RoleKeySet {
    pub keys: Vec<KeyPair>,
    pub threshold: u32,
}

impl RoleKeySet {
    pub fn single(key: KeyPair) -> Self {
        Self {
            keys: vec![key],
            threshold: 1,
        }
    }

    pub fn public_keys_hex(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.public_key_hex()).collect()
    }

    pub async fn persist_all(&self, dir: &Path, role: &str) -> std::io::Result<()> {
        for (i, key) in self.keys.iter().enumerate() {
            let path = dir.join(format!("{role}-{i}.pem"));
            key.persist(&path).await?;
        }
        Ok(())
    }
}

/// A detached signature over a canonical payload, as stored alongside
/// signed role metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSignature {
    pub key_id: String,
    pub signature_hex: String,
}

pub fn store_key_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("tuf").join("keys")
}
