use crate::blob::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cache index record. Created on first successful `put`, updated
/// on every hit, destroyed on eviction or explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub digest: Digest,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(digest: Digest, size: u64, now: DateTime<Utc>) -> Self {
        Self {
            digest,
            size,
            created_at: now,
            last_access_at: now,
            access_count: 0,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_at = now;
        self.access_count += 1;
    }
}
