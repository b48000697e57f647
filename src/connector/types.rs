use std::fmt;

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Identifies a connector implementation family.
///
/// The built-in schemes use the reserved values below; user-registered
/// schemes should allocate values at or above [`ConnectorType::USER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectorType(pub i16);

impl ConnectorType {
    /// No type; the type of a default-constructed connector.
    pub const UNSPEC: ConnectorType = ConnectorType(-1);

    pub const TCP4: ConnectorType = ConnectorType(0);
    pub const TCP6: ConnectorType = ConnectorType(1);
    pub const TCP: ConnectorType = ConnectorType(2);
    pub const UDP4: ConnectorType = ConnectorType(3);
    pub const UDP6: ConnectorType = ConnectorType(4);
    pub const UDP: ConnectorType = ConnectorType(5);
    pub const LOCAL: ConnectorType = ConnectorType(6);
    pub const PIPE: ConnectorType = ConnectorType(7);
    pub const FIFO: ConnectorType = ConnectorType(8);
    pub const ANON: ConnectorType = ConnectorType(9);

    /// First user-defined type value.
    pub const USER: ConnectorType = ConnectorType(256);

    /// Returns the nth user-defined type.
    pub const fn user(offset: i16) -> ConnectorType {
        ConnectorType(ConnectorType::USER.0 + offset)
    }
}

impl Default for ConnectorType {
    fn default() -> ConnectorType {
        ConnectorType::UNSPEC
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Behaviour options resolved for a connector at creation time.
    ///
    /// `BLOCKING` and `NON_BLOCKING` are mutually exclusive; option
    /// resolution guarantees exactly one of them is set on a constructed
    /// connector. Bits at or above `USER` are free for user-registered
    /// query parameters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConnectorOptions: u16 {
        /// Stream semantics: connection oriented, ordered bytes.
        const STREAM = 1 << 0;
        /// Datagram semantics: connectionless messages.
        const DATAGRAM = 1 << 1;
        /// Blocking operation.
        const BLOCKING = 1 << 2;
        /// Non-blocking operation.
        const NON_BLOCKING = 1 << 3;

        /// First user-defined option bit.
        const USER = 1 << 8;

        const _ = !0;
    }
}

impl ConnectorOptions {
    /// The blocking-mode bits.
    pub const BLOCKING_MASK: ConnectorOptions =
        ConnectorOptions::BLOCKING.union(ConnectorOptions::NON_BLOCKING);

    /// The behaviour bits.
    pub const BEHAVIOUR_MASK: ConnectorOptions =
        ConnectorOptions::STREAM.union(ConnectorOptions::DATAGRAM);

    /// Verifies that exactly one of `BLOCKING`/`NON_BLOCKING` is set.
    pub fn verify_blocking(&self) -> Result<()> {
        let blocking = self.intersection(ConnectorOptions::BLOCKING_MASK);
        if blocking == ConnectorOptions::BLOCKING || blocking == ConnectorOptions::NON_BLOCKING {
            Ok(())
        } else {
            Err(Error::InvalidOption)
        }
    }
}
