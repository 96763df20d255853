//! Struct and implementation of a reference to a ring participant.
use std::fmt::{self, Debug, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::common::Id;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
/// A ring participant as other nodes see it: its [Id] and the address it serves on.
pub struct Node {
    pub id: Id,
    pub address: SocketAddr,
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> Node {
        Node { id, address }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Compact encoding: `id (4 BE) ‖ ip (4 or 16) ‖ port (2 BE)`.
    pub fn to_compact(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(22);

        bytes.extend_from_slice(&self.id.to_be_bytes());
        match self.address.ip() {
            IpAddr::V4(ip) => bytes.extend_from_slice(&ip.octets()),
            IpAddr::V6(ip) => bytes.extend_from_slice(&ip.octets()),
        }
        bytes.extend_from_slice(&self.address.port().to_be_bytes());

        bytes
    }

    /// Parse the compact encoding, the family is inferred from the length.
    pub fn from_compact(bytes: &[u8]) -> Option<Node> {
        let (id, rest) = bytes.split_first_chunk::<4>()?;
        let (ip, port) = match rest.len() {
            6 => {
                let (ip, port) = rest.split_first_chunk::<4>()?;
                (IpAddr::V4(Ipv4Addr::from(*ip)), port)
            }
            18 => {
                let (ip, port) = rest.split_first_chunk::<16>()?;
                (IpAddr::V6(Ipv6Addr::from(*ip)), port)
            }
            _ => return None,
        };
        let port = u16::from_be_bytes(port.try_into().ok()?);

        Some(Node::new(Id::from_be_bytes(*id), SocketAddr::new(ip, port)))
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Node({} @ {})", self.id, self.address)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_v4() {
        let node = Node::new(Id(4_000_000_000), "127.0.0.1:6881".parse().unwrap());
        let bytes = node.to_compact();

        assert_eq!(bytes.len(), 10);
        assert_eq!(Node::from_compact(&bytes), Some(node));
    }

    #[test]
    fn compact_v6() {
        let node = Node::new(Id(7), "[::1]:4000".parse().unwrap());
        let bytes = node.to_compact();

        assert_eq!(bytes.len(), 22);
        assert_eq!(Node::from_compact(&bytes), Some(node));
    }

    #[test]
    fn compact_invalid_length() {
        assert_eq!(Node::from_compact(&[0, 1, 2]), None);
        assert_eq!(Node::from_compact(&[0; 11]), None);
    }
}
