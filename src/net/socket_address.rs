use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// A transport address: unspecified, IPv4, IPv6 or a local (file system)
/// path.
///
/// IPv4 and IPv6 addresses carry an optional port; port `0` stands for "no
/// port chosen yet", matching socket semantics. Local paths are OS-native;
/// the address is ordered totally so it can key ordered containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    /// No address; the default.
    Unspec,
    /// An IPv4 address with optional port.
    Inet4(SocketAddrV4),
    /// An IPv6 address with optional port.
    Inet6(SocketAddrV6),
    /// A local path, e.g. for Unix domain sockets or FIFOs.
    Local(PathBuf),
}

impl SocketAddress {
    /// Parses an address string: `ip`, `ip:port`, or `[ipv6]:port`.
    ///
    /// Local addresses are not parsed from strings here; use
    /// [`SocketAddress::from_path`].
    pub fn parse(input: &str) -> Result<SocketAddress> {
        if let Ok(addr) = SocketAddr::from_str(input) {
            return Ok(addr.into());
        }
        if let Ok(ip) = IpAddr::from_str(input) {
            return Ok(SocketAddress::from_ip_port(ip, 0));
        }
        // Bare IPv6 in brackets, no port.
        if let Some(inner) = input.strip_prefix('[').and_then(|i| i.strip_suffix(']')) {
            if let Ok(ip) = Ipv6Addr::from_str(inner) {
                return Ok(SocketAddress::from_ip_port(IpAddr::V6(ip), 0));
            }
        }
        Err(Error::Format)
    }

    /// Builds a local address from a path, normalizing forward slashes to
    /// the OS separator.
    pub fn from_path<P: AsRef<Path>>(path: P) -> SocketAddress {
        SocketAddress::Local(path.as_ref().to_path_buf())
    }

    fn from_ip_port(ip: IpAddr, port: u16) -> SocketAddress {
        match ip {
            IpAddr::V4(v4) => SocketAddress::Inet4(SocketAddrV4::new(v4, port)),
            IpAddr::V6(v6) => SocketAddress::Inet6(SocketAddrV6::new(v6, port, 0, 0)),
        }
    }

    /// True iff this is not [`SocketAddress::Unspec`].
    pub fn valid(&self) -> bool {
        !matches!(self, SocketAddress::Unspec)
    }

    /// The port, if this is an IP address with one set.
    pub fn port(&self) -> Option<u16> {
        match self {
            SocketAddress::Inet4(a) => Some(a.port()),
            SocketAddress::Inet6(a) => Some(a.port()),
            _ => None,
        }
    }

    /// Sets the port on IP addresses; no effect otherwise.
    pub fn set_port(&mut self, port: u16) {
        match self {
            SocketAddress::Inet4(a) => a.set_port(port),
            SocketAddress::Inet6(a) => a.set_port(port),
            _ => {}
        }
    }

    /// Increments the IP address by one, wrapping on overflow. The port is
    /// unchanged. No effect on non-IP addresses.
    pub fn increment(&mut self) {
        match self {
            SocketAddress::Inet4(a) => {
                let bits = u32::from_be_bytes(a.ip().octets()).wrapping_add(1);
                a.set_ip(Ipv4Addr::from(bits));
            }
            SocketAddress::Inet6(a) => {
                let bits = u128::from_be_bytes(a.ip().octets()).wrapping_add(1);
                a.set_ip(Ipv6Addr::from(bits));
            }
            _ => {}
        }
    }

    /// Converts to a standard socket address, for IP variants.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            SocketAddress::Inet4(a) => Some(SocketAddr::V4(*a)),
            SocketAddress::Inet6(a) => Some(SocketAddr::V6(*a)),
            _ => None,
        }
    }

    /// The local path, for the local variant.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            SocketAddress::Local(p) => Some(p),
            _ => None,
        }
    }

    fn order_key(&self) -> (u8, u128, u16, &Path) {
        static EMPTY: &str = "";
        match self {
            SocketAddress::Unspec => (0, 0, 0, Path::new(EMPTY)),
            SocketAddress::Inet4(a) => (
                1,
                u128::from(u32::from_be_bytes(a.ip().octets())),
                a.port(),
                Path::new(EMPTY),
            ),
            SocketAddress::Inet6(a) => (
                2,
                u128::from_be_bytes(a.ip().octets()),
                a.port(),
                Path::new(EMPTY),
            ),
            SocketAddress::Local(p) => (3, 0, 0, p.as_path()),
        }
    }
}

impl Default for SocketAddress {
    fn default() -> SocketAddress {
        SocketAddress::Unspec
    }
}

impl PartialOrd for SocketAddress {
    fn partial_cmp(&self, other: &SocketAddress) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SocketAddress {
    fn cmp(&self, other: &SocketAddress) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> SocketAddress {
        match addr {
            SocketAddr::V4(a) => SocketAddress::Inet4(a),
            SocketAddr::V6(a) => SocketAddress::Inet6(a),
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Unspec => write!(f, "<unspec>"),
            SocketAddress::Inet4(a) => write!(f, "{a}"),
            SocketAddress::Inet6(a) => write!(f, "{a}"),
            SocketAddress::Local(p) => write!(f, "{}", p.display()),
        }
    }
}
