use async_trait::async_trait;
use std::net::SocketAddr;

/// A source of candidate peer addresses. `P2PNode` dials whatever each
/// channel reports; channels run concurrently and are blind to each other.
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    async fn discover(&self) -> Vec<SocketAddr>;
    fn name(&self) -> &str;
}

/// Explicit bootstrap dial list, configured out-of-band (admin API or
/// startup config).
pub struct BootstrapDiscovery {
    addrs: parking_lot::RwLock<Vec<SocketAddr>>,
}

impl BootstrapDiscovery {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self {
            addrs: parking_lot::RwLock::new(addrs),
        }
    }

    pub fn add(&self, addr: SocketAddr) {
        let mut g = self.addrs.write();
        if !g.contains(&addr) {
            g.push(addr);
        }
    }
}

#[async_trait]
impl PeerDiscovery for BootstrapDiscovery {
    async fn discover(&self) -> Vec<SocketAddr> {
        self.addrs.read().clone()
    }

    fn name(&self) -> &str {
        "bootstrap"
    }
}

/// mDNS broadcast discovery under a well-known service tag.
///
/// Backed by a no-op channel rather than a real `mdns-sd` responder/browser;
/// it keeps the `PeerDiscovery` contract satisfiable so `P2PNode` can be
/// wired against all three discovery channels today and swap in a live
/// implementation later without changing callers.
pub struct MdnsDiscovery {
    pub service_tag: String,
}

#[async_trait]
impl PeerDiscovery for MdnsDiscovery {
    async fn discover(&self) -> Vec<SocketAddr> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "mdns"
    }
}

/// DHT rendezvous discovery.
///
/// Same caveat as `MdnsDiscovery`: a Kademlia DHT client is out of scope
/// here; this stub keeps the trait contract satisfiable.
pub struct DhtDiscovery {
    pub rendezvous: String,
}

#[async_trait]
impl PeerDiscovery for DhtDiscovery {
    async fn discover(&self) -> Vec<SocketAddr> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "dht"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_discovery_returns_configured_addrs() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let d = BootstrapDiscovery::new(vec![addr]);
        assert_eq!(d.discover().await, vec![addr]);
    }

    #[tokio::test]
    async fn stub_discovery_channels_are_empty() {
        let mdns = MdnsDiscovery {
            service_tag: "_accel._tcp".into(),
        };
        assert!(mdns.discover().await.is_empty());
        let dht = DhtDiscovery {
            rendezvous: "accel-rendezvous".into(),
        };
        assert!(dht.discover().await.is_empty());
    }
}
