//! Address types for socket-like connectors.

mod socket_address;

pub use self::socket_address::SocketAddress;
