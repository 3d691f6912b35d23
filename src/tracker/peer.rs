use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A candidate peer endpoint from a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<Vec<u8>>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    pub fn with_peer_id(ip: IpAddr, port: u16, peer_id: Vec<u8>) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: Some(peer_id),
        }
    }

    /// Parse one compact entry: 4 bytes IPv4 + 2 bytes big-endian port.
    /// Entries with port 0 are unusable and rejected.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != 6 {
            return None;
        }

        let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        let port = u16::from_be_bytes([data[4], data[5]]);
        if port == 0 {
            return None;
        }

        Some(Self::new(IpAddr::V4(ip), port))
    }

    /// Parse a compact peer list (6 bytes per peer).
    pub fn from_compact_list(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(6).filter_map(Self::from_compact).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_compact() {
        let peer = Peer::from_compact(&[10, 0, 0, 1, 0x1a, 0xe1]).unwrap();
        assert_eq!(peer.addr, "10.0.0.1:6881".parse().unwrap());
    }

    #[test]
    fn test_from_compact_rejects_port_zero() {
        assert!(Peer::from_compact(&[10, 0, 0, 1, 0, 0]).is_none());
    }

    #[test]
    fn test_from_compact_list_ignores_tail() {
        // 6-byte chunks; the trailing partial entry is dropped.
        let data = [10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2, 1, 2];
        let peers = Peer::from_compact_list(&data);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].addr, "10.0.0.2:6882".parse().unwrap());
    }
}
