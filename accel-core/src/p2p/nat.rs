use std::net::IpAddr;

/// Whether the node's own addresses are publicly reachable or only
/// privately addressed (RFC1918 / RFC4193), used to decide whether relay
/// discovery and hole-punching are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatClass {
    Public,
    PrivateOnly,
}

impl NatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            NatClass::Public => "public",
            NatClass::PrivateOnly => "private_only",
        }
    }
}

pub fn classify(addresses: &[IpAddr]) -> NatClass {
    if addresses.iter().any(|a| !is_private(a)) {
        NatClass::Public
    } else {
        NatClass::PrivateOnly
    }
}

fn is_private(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            // RFC4193 unique local addresses: fc00::/7.
            let segs = v6.segments();
            (segs[0] & 0xfe00) == 0xfc00 || v6.is_loopback()
        }
    }
}

/// Builds a circuit-relay multiaddress of the form
/// `/p2p/<relay>/p2p-circuit/p2p/<target>`.
pub fn relay_multiaddr(relay_node_id: &str, target_node_id: &str) -> String {
    format!("/p2p/{relay_node_id}/p2p-circuit/p2p/{target_node_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn classifies_private_only_addresses() {
        let addrs = vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))];
        assert_eq!(classify(&addrs), NatClass::PrivateOnly);
    }

    #[test]
    fn classifies_with_a_public_address_present() {
        let addrs = vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
        ];
        assert_eq!(classify(&addrs), NatClass::Public);
    }

    #[test]
    fn builds_circuit_multiaddr() {
        assert_eq!(relay_multiaddr("R", "T"), "/p2p/R/p2p-circuit/p2p/T");
    }
}
