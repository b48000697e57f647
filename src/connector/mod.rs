//! The connector abstraction: a socket-like value type over heterogeneous
//! I/O endpoints, dispatched by URL scheme.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::trace;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::net::SocketAddress;
use crate::util::Url;

mod interface;
mod peer_address;
mod types;

pub(crate) mod anon;
pub(crate) mod fifo;
pub(crate) mod local;
pub(crate) mod socket;
pub(crate) mod tcp;
pub(crate) mod udp;

pub use self::interface::{Accepted, ConnectorImpl};
pub use self::peer_address::PeerAddress;
pub use self::types::{ConnectorOptions, ConnectorType};

struct Cell {
    imp: Mutex<Box<dyn ConnectorImpl>>,
    ctype: ConnectorType,
    scheme: String,
    url: Url,
}

/// A polymorphic I/O endpoint with a socket-like API.
///
/// `Connector` is a cheap value type: clones share the same underlying
/// implementation, and two connectors compare equal iff they wrap the same
/// implementation instance (or both are of type
/// [`ConnectorType::UNSPEC`]). The implementation is chosen by the URL
/// scheme through the [`Api`]'s registry; see the crate docs for the
/// built-in schemes.
///
/// The default-constructed connector has no connection semantics; every
/// operation on it fails with [`Error::Initialization`].
#[derive(Clone, Default)]
pub struct Connector {
    cell: Option<Arc<Cell>>,
}

impl Connector {
    /// Creates a connector for `url`, e.g. `"tcp://127.0.0.1:4321"` or
    /// `"anon://"`.
    ///
    /// Fails with [`Error::Format`] if the URL cannot be parsed, and with
    /// [`Error::InvalidOption`] if the scheme is unknown or the resolved
    /// options are not valid for the scheme.
    pub fn new(api: &Api, url: &str) -> Result<Connector> {
        Connector::from_url(api, &Url::parse(url)?)
    }

    /// Creates a connector from an already parsed URL.
    pub fn from_url(api: &Api, url: &Url) -> Result<Connector> {
        let (info, query_options) = api.lookup_scheme(&url.scheme, &url.query)?;

        // Scheme defaults first, then the query decides; blocking and
        // behaviour bits replace rather than accumulate.
        let mut options = info.default_options;
        if query_options.intersects(ConnectorOptions::BLOCKING_MASK) {
            options.remove(ConnectorOptions::BLOCKING_MASK);
        }
        if query_options.intersects(ConnectorOptions::BEHAVIOUR_MASK) {
            options.remove(ConnectorOptions::BEHAVIOUR_MASK);
        }
        options.insert(query_options);
        if !options.intersects(ConnectorOptions::BLOCKING_MASK) {
            options.insert(ConnectorOptions::NON_BLOCKING);
        }

        options.verify_blocking()?;
        if !info.possible_options.contains(options) {
            return Err(Error::InvalidOption);
        }

        trace!(
            "creating connector for {} with options {:?}",
            url,
            options
        );
        let imp = (info.factory)(url, info.ctype, options)?;

        Ok(Connector {
            cell: Some(Arc::new(Cell {
                imp: Mutex::new(imp),
                ctype: info.ctype,
                scheme: url.scheme.clone(),
                url: url.clone(),
            })),
        })
    }

    fn cell(&self) -> Result<&Arc<Cell>> {
        self.cell.as_ref().ok_or(Error::Initialization)
    }

    fn imp(&self) -> Result<MutexGuard<'_, Box<dyn ConnectorImpl>>> {
        self.cell()?.imp.lock().map_err(|_| Error::Aborted)
    }

    /// True iff this connector is not of type [`ConnectorType::UNSPEC`].
    pub fn valid(&self) -> bool {
        self.cell.is_some()
    }

    /// The connector type.
    pub fn connector_type(&self) -> ConnectorType {
        self.cell
            .as_ref()
            .map(|c| c.ctype)
            .unwrap_or(ConnectorType::UNSPEC)
    }

    /// The URL the connector was created from.
    pub fn connect_url(&self) -> Option<Url> {
        self.cell.as_ref().map(|c| c.url.clone())
    }

    /// The connector's transport address.
    pub fn socket_address(&self) -> SocketAddress {
        match self.imp() {
            Ok(imp) => imp.address(),
            Err(_) => SocketAddress::Unspec,
        }
    }

    /// The connector's peer address: transport address plus scheme and type.
    pub fn peer_addr(&self) -> PeerAddress {
        let scheme = self
            .cell
            .as_ref()
            .map(|c| c.scheme.clone())
            .unwrap_or_default();
        PeerAddress::new(scheme, self.connector_type(), self.socket_address())
    }

    /// Binds the connector to its address; the server side of a channel.
    pub fn listen(&self) -> Result<()> {
        self.imp()?.listen()
    }

    /// True iff `listen` succeeded on this connector.
    pub fn listening(&self) -> bool {
        self.imp().map(|imp| imp.listening()).unwrap_or(false)
    }

    /// Connects to the address; the client side of a channel.
    pub fn connect(&self) -> Result<()> {
        self.imp()?.connect()
    }

    /// True iff this stream connector is connected.
    pub fn connected(&self) -> bool {
        self.imp().map(|imp| imp.connected()).unwrap_or(false)
    }

    /// Best-effort "is there a communicating party": true for connected
    /// stream connectors and listening datagram connectors.
    pub fn communicating(&self) -> bool {
        match self.imp() {
            Ok(imp) => {
                imp.connected()
                    || (imp.options().contains(ConnectorOptions::DATAGRAM) && imp.listening())
            }
            Err(_) => false,
        }
    }

    /// Accepts a pending peer on a listening connector.
    ///
    /// Stream connectors return a new, connected connector and fail with
    /// [`Error::RepeatAction`] when nothing is pending. Datagram connectors
    /// return a shallow copy of themselves, which therefore compares equal
    /// to the listener.
    pub fn accept(&self) -> Result<Connector> {
        let cell = self.cell()?;
        let accepted = self.imp()?.accept()?;
        match accepted {
            Accepted::New(imp) => Ok(Connector {
                cell: Some(Arc::new(Cell {
                    imp: Mutex::new(imp),
                    ctype: cell.ctype,
                    scheme: cell.scheme.clone(),
                    url: cell.url.clone(),
                })),
            }),
            Accepted::Listener => Ok(self.clone()),
        }
    }

    /// The handle read events are reported on.
    pub fn get_read_handle(&self) -> Handle {
        self.imp()
            .map(|imp| imp.read_handle())
            .unwrap_or(Handle::INVALID)
    }

    /// The handle write events are reported on.
    pub fn get_write_handle(&self) -> Handle {
        self.imp()
            .map(|imp| imp.write_handle())
            .unwrap_or(Handle::INVALID)
    }

    /// Reads up to `buf.len()` bytes, returning the amount read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.imp()?.read(buf)
    }

    /// Writes `buf`, returning the amount written.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.imp()?.write(buf)
    }

    /// Receives a datagram, returning the amount read and the sender.
    pub fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddress)> {
        self.imp()?.receive(buf)
    }

    /// Sends a datagram to `recipient`.
    pub fn send(&self, buf: &[u8], recipient: &SocketAddress) -> Result<usize> {
        self.imp()?.send(buf, recipient)
    }

    /// Best-effort count of bytes available for reading.
    pub fn peek(&self) -> Result<usize> {
        self.imp()?.peek()
    }

    /// Closes the connector. A closed connector may listen or connect
    /// again.
    pub fn close(&self) -> Result<()> {
        self.imp()?.close()
    }

    /// The connector's blocking mode.
    pub fn is_blocking(&self) -> bool {
        self.imp().map(|imp| imp.is_blocking()).unwrap_or(false)
    }

    /// The connector's resolved option flags.
    pub fn get_options(&self) -> ConnectorOptions {
        self.imp()
            .map(|imp| imp.options())
            .unwrap_or(ConnectorOptions::empty())
    }

    pub(crate) fn set_blocking(&self, blocking: bool) -> Result<()> {
        self.imp()?.set_blocking(blocking)
    }

    pub(crate) fn downgrade(&self) -> WeakConnector {
        WeakConnector {
            cell: self.cell.as_ref().map(Arc::downgrade),
        }
    }

    fn identity(&self) -> usize {
        self.cell
            .as_ref()
            .map(|c| Arc::as_ptr(c) as usize)
            .unwrap_or(0)
    }
}

impl PartialEq for Connector {
    fn eq(&self, other: &Connector) -> bool {
        // All unspec connectors are equal to each other.
        self.identity() == other.identity()
    }
}

impl Eq for Connector {}

impl Hash for Connector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell {
            None => write!(f, "Connector(unspec)"),
            Some(cell) => write!(f, "Connector({}, type {})", cell.url, cell.ctype),
        }
    }
}

/// A weak reference to a connector's shared state. Commands queued for the
/// scheduler hold these, so a queued command does not extend the
/// connector's lifetime beyond the caller's expectation.
#[derive(Clone, Default)]
pub(crate) struct WeakConnector {
    cell: Option<Weak<Cell>>,
}

impl WeakConnector {
    pub(crate) fn upgrade(&self) -> Option<Connector> {
        let cell = self.cell.as_ref()?.upgrade()?;
        Some(Connector { cell: Some(cell) })
    }
}
