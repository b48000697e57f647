use crate::connector::ConnectorOptions;
use crate::error::Result;
use crate::handle::Handle;
use crate::net::SocketAddress;

/// What [`ConnectorImpl::accept`] produced.
pub enum Accepted {
    /// A newly connected implementation, independent of the listener.
    New(Box<dyn ConnectorImpl>),
    /// The listener itself serves as the communication channel (datagram
    /// connectors); the proxy hands out a shallow copy of itself.
    Listener,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accepted::New(_) => f.write_str("Accepted::New(..)"),
            Accepted::Listener => f.write_str("Accepted::Listener"),
        }
    }
}

/// The contract a connector implementation satisfies.
///
/// Implementations are registered with the
/// [`Registry`](crate::registry::Registry) under one or more URL schemes
/// and are driven exclusively through the [`Connector`](crate::Connector)
/// proxy, which serializes access. Stream-style implementations must honour
/// the created → listening/connecting → communicating → closed lifecycle;
/// datagram-style implementations treat `listen` as bind and never report
/// `connected`.
pub trait ConnectorImpl: Send {
    /// Binds the connector to its address and, for stream behaviour,
    /// prepares it to accept peers. Fails with
    /// [`Error::Initialization`](crate::Error::Initialization) if the
    /// connector is already listening or connected.
    fn listen(&mut self) -> Result<()>;

    /// True after a successful [`listen`](ConnectorImpl::listen).
    fn listening(&self) -> bool;

    /// Connects to the address. Non-blocking stream connectors whose
    /// handshake is still in progress fail with
    /// [`Error::Async`](crate::Error::Async); a subsequent call after the
    /// handle turned writable completes the handshake.
    fn connect(&mut self) -> Result<()>;

    /// True once a stream connector is connected. Datagram connectors are
    /// never connected.
    fn connected(&self) -> bool;

    /// Accepts a pending peer on a listening connector. Stream connectors
    /// fail with [`Error::RepeatAction`](crate::Error::RepeatAction) when
    /// nothing is pending.
    fn accept(&mut self) -> Result<Accepted>;

    /// The handle readable I/O is reported on. Invalid while the connector
    /// is neither listening nor connected.
    fn read_handle(&self) -> Handle;

    /// The handle writable I/O is reported on. May equal the read handle.
    fn write_handle(&self) -> Handle;

    /// Reads at most `buf.len()` bytes; returns the amount read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf`; returns the amount written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Receives a datagram, returning the amount read and the sender.
    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddress)>;

    /// Sends a datagram to `recipient`; returns the amount written.
    fn send(&mut self, buf: &[u8], recipient: &SocketAddress) -> Result<usize>;

    /// Best-effort count of bytes available to read without blocking.
    fn peek(&self) -> Result<usize>;

    /// Closes the connector, releasing its handles. Closing a connector
    /// that is not open fails with
    /// [`Error::Initialization`](crate::Error::Initialization); a closed
    /// connector may listen or connect again.
    fn close(&mut self) -> Result<()>;

    /// Switches the underlying handles between blocking and non-blocking
    /// mode. The scheduler uses this to force registered connectors
    /// non-blocking.
    fn set_blocking(&mut self, blocking: bool) -> Result<()>;

    /// The current blocking mode.
    fn is_blocking(&self) -> bool;

    /// The options the connector was created with, with the blocking bits
    /// tracking [`set_blocking`](ConnectorImpl::set_blocking).
    fn options(&self) -> ConnectorOptions;

    /// The address the connector was created for. For listeners bound to
    /// an ephemeral port, this reflects the actually bound address.
    fn address(&self) -> SocketAddress;
}
