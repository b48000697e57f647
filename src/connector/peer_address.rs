use std::fmt;

use crate::connector::ConnectorType;
use crate::net::SocketAddress;

/// A socket address extended with the connector type and scheme, so peers
/// on different transports can be told apart even when they share an
/// address, e.g. UDP and TCP on the same `ip:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress {
    scheme: String,
    ctype: ConnectorType,
    address: SocketAddress,
}

impl PeerAddress {
    /// Builds a peer address.
    pub fn new(scheme: impl Into<String>, ctype: ConnectorType, address: SocketAddress) -> PeerAddress {
        PeerAddress {
            scheme: scheme.into().to_lowercase(),
            ctype,
            address,
        }
    }

    /// The (lower-cased) scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The connector type.
    pub fn connector_type(&self) -> ConnectorType {
        self.ctype
    }

    /// The transport address.
    pub fn socket_address(&self) -> &SocketAddress {
        &self.address
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_needs_scheme_and_address() {
        let addr = SocketAddress::parse("127.0.0.1:80").unwrap();

        let tcp = PeerAddress::new("tcp", ConnectorType::TCP, addr.clone());
        let tcp2 = PeerAddress::new("TCP", ConnectorType::TCP, addr.clone());
        let udp = PeerAddress::new("udp", ConnectorType::UDP, addr.clone());

        assert_eq!(tcp, tcp2);
        assert_ne!(tcp, udp);

        let other = PeerAddress::new(
            "tcp",
            ConnectorType::TCP,
            SocketAddress::parse("127.0.0.1:81").unwrap(),
        );
        assert_ne!(tcp, other);
    }

    #[test]
    fn hash_is_consistent_with_eq() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let hash = |p: &PeerAddress| {
            let mut h = DefaultHasher::new();
            p.hash(&mut h);
            h.finish()
        };

        let addr = SocketAddress::parse("[::1]:5000").unwrap();
        let a = PeerAddress::new("udp6", ConnectorType::UDP6, addr.clone());
        let b = PeerAddress::new("udp6", ConnectorType::UDP6, addr);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
    }
}
