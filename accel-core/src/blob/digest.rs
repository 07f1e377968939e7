use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// A content-address of the form `<alg>:<hex>`, e.g.
/// `sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855`.
///
/// Only `sha256` is computed by this crate today, but the type preserves
/// whatever algorithm tag the caller supplied so foreign digests (e.g. from
/// an upstream registry using a different algorithm) still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    pub fn new(alg: &str, hex: &str) -> Self {
        Digest(format!("{alg}:{hex}"))
    }

    pub fn algorithm(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }

    pub fn hex(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path-safe two-character shard prefix used for the on-disk layout.
    pub fn shard(&self) -> String {
        let hex = self.hex();
        if hex.len() >= 2 {
            hex[0..2].to_string()
        } else {
            "__".to_string()
        }
    }

    /// Computes the sha256 digest of `bytes`.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Digest::new("sha256", &hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid digest: {0}")]
pub struct InvalidDigest(String);

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((alg, hex)) if !alg.is_empty() && !hex.is_empty() => Ok(Digest(s.to_string())),
            _ => Err(InvalidDigest(s.to_string())),
        }
    }
}

/// Incrementally computes a sha256 digest while bytes stream through, so
/// callers (the LRU cache, the blob store) can verify on the fly without
/// buffering.
pub struct RunningHash {
    hasher: Sha256,
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningHash {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> Digest {
        Digest::new("sha256", &hex::encode(self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alg_hex() {
        let d: Digest = "sha256:abcd".parse().unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.hex(), "abcd");
        assert_eq!(d.shard(), "ab");
    }

    #[test]
    fn rejects_malformed() {
        assert!("no-colon".parse::<Digest>().is_err());
        assert!(":hex".parse::<Digest>().is_err());
        assert!("sha256:".parse::<Digest>().is_err());
    }

    #[test]
    fn sha256_of_matches_running_hash() {
        let bytes = b"hello world";
        let whole = Digest::sha256_of(bytes);
        let mut running = RunningHash::new();
        running.update(&bytes[..5]);
        running.update(&bytes[5..]);
        assert_eq!(whole, running.finish());
    }
}
