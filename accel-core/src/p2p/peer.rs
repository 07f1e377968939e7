use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Another instance of this system reachable over the P2P transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub addresses: Vec<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub latency_ms: Option<u64>,
    /// Whether this peer advertised the circuit-hop capability in its
    /// handshake, i.e. whether it can be asked to relay a connection to a
    /// third node.
    pub relay_capable: bool,
}

impl Peer {
    pub fn new(id: String, addresses: Vec<SocketAddr>) -> Self {
        let now = Utc::now();
        Self {
            id,
            addresses,
            connected_at: now,
            last_seen: now,
            bytes_sent: 0,
            bytes_received: 0,
            latency_ms: None,
            relay_capable: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn is_stale(&self, staleness: chrono::Duration) -> bool {
        Utc::now() - self.last_seen > staleness
    }
}
