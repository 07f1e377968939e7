use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use tokio::fs;

/// Persistent node identity. The node-id is the lowercase hex of the
/// Ed25519 public key.
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl NodeIdentity {
    /// Loads the identity from `path`, generating and persisting a fresh
    /// one (mode 0600) if it does not exist yet.
    pub async fn load_or_create(path: &Path) -> std::io::Result<Self> {
        if let Ok(bytes) = fs::read(path).await {
            if bytes.len() == 32 {
                let arr: [u8; 32] = bytes.try_into().unwrap();
                return Ok(Self {
                    signing_key: SigningKey::from_bytes(&arr),
                });
            }
        }
        let signing_key = SigningKey::generate(&mut OsRng);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, signing_key.to_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).await?;
        }
        Ok(Self { signing_key })
    }

    pub fn node_id(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_and_reloads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let first = NodeIdentity::load_or_create(&path).await.unwrap();
        let second = NodeIdentity::load_or_create(&path).await.unwrap();
        assert_eq!(first.node_id(), second.node_id());
    }
}
