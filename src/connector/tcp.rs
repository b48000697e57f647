use std::io::{Read, Write};
use std::os::fd::AsRawFd;

use socket2::{Socket, Type};

use crate::connector::interface::{Accepted, ConnectorImpl};
use crate::connector::{socket, ConnectorOptions};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::net::SocketAddress;

const LISTEN_BACKLOG: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Connecting,
    Connected,
    Listening,
    Closed,
}

/// Stream socket connector backing the `tcp`, `tcp4` and `tcp6` schemes.
pub(crate) struct TcpConnector {
    addr: SocketAddress,
    options: ConnectorOptions,
    state: State,
    sock: Option<Socket>,
}

impl TcpConnector {
    pub(crate) fn new(addr: SocketAddress, options: ConnectorOptions) -> Result<TcpConnector> {
        if !matches!(addr, SocketAddress::Inet4(_) | SocketAddress::Inet6(_)) {
            return Err(Error::InvalidValue);
        }
        Ok(TcpConnector {
            addr,
            options,
            state: State::Created,
            sock: None,
        })
    }

    fn accepted(sock: Socket, peer: SocketAddress, options: ConnectorOptions) -> TcpConnector {
        TcpConnector {
            addr: peer,
            options,
            state: State::Connected,
            sock: Some(sock),
        }
    }

    fn startable(&self) -> Result<()> {
        match self.state {
            State::Created | State::Closed => Ok(()),
            _ => Err(Error::Initialization),
        }
    }

    fn new_socket(&self) -> Result<Socket> {
        socket::new_socket(
            socket::domain_for(&self.addr)?,
            Type::STREAM,
            self.is_blocking(),
        )
    }

    fn sock(&self) -> Result<&Socket> {
        self.sock.as_ref().ok_or(Error::NoConnection)
    }
}

impl ConnectorImpl for TcpConnector {
    fn listen(&mut self) -> Result<()> {
        self.startable()?;

        let sock = self.new_socket()?;
        sock.set_reuse_address(true)?;
        sock.bind(&socket::sock_addr_for(&self.addr)?)?;
        sock.listen(LISTEN_BACKLOG)?;

        self.sock = Some(sock);
        self.state = State::Listening;
        Ok(())
    }

    fn listening(&self) -> bool {
        self.state == State::Listening
    }

    fn connect(&mut self) -> Result<()> {
        if self.state == State::Connecting {
            // Non-blocking handshake in progress; probe its outcome.
            if let Some(err) = self.sock()?.take_error()? {
                self.sock = None;
                self.state = State::Created;
                return Err(err.into());
            }
            return if self.sock()?.peer_addr().is_ok() {
                self.state = State::Connected;
                Ok(())
            } else {
                Err(Error::Async)
            };
        }

        self.startable()?;

        let sock = self.new_socket()?;
        let target = socket::sock_addr_for(&self.addr)?;
        match sock.connect(&target) {
            Ok(()) => {
                self.sock = Some(sock);
                self.state = State::Connected;
                Ok(())
            }
            Err(err) => {
                let translated = Error::from(err);
                if translated == Error::Async || translated == Error::RepeatAction {
                    // In progress; completion is signalled by writability.
                    self.sock = Some(sock);
                    self.state = State::Connecting;
                    Err(Error::Async)
                } else {
                    Err(translated)
                }
            }
        }
    }

    fn connected(&self) -> bool {
        self.state == State::Connected
    }

    fn accept(&mut self) -> Result<Accepted> {
        if self.state != State::Listening {
            return Err(Error::Initialization);
        }

        let (sock, peer) = self.sock()?.accept()?;
        sock.set_nonblocking(!self.is_blocking())?;
        let peer = socket::socket_address_from(&peer);
        Ok(Accepted::New(Box::new(TcpConnector::accepted(
            sock,
            peer,
            self.options,
        ))))
    }

    fn read_handle(&self) -> Handle {
        self.sock
            .as_ref()
            .map(|s| Handle::new(s.as_raw_fd()))
            .unwrap_or(Handle::INVALID)
    }

    fn write_handle(&self) -> Handle {
        self.read_handle()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected() {
            return Err(Error::NoConnection);
        }
        let mut sock = self.sock()?;
        Ok(sock.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.connected() {
            return Err(Error::NoConnection);
        }
        let mut sock = self.sock()?;
        Ok(sock.write(buf)?)
    }

    fn receive(&mut self, _buf: &mut [u8]) -> Result<(usize, SocketAddress)> {
        Err(Error::UnsupportedAction)
    }

    fn send(&mut self, _buf: &[u8], _recipient: &SocketAddress) -> Result<usize> {
        Err(Error::UnsupportedAction)
    }

    fn peek(&self) -> Result<usize> {
        let sock = self.sock().map_err(|_| Error::Initialization)?;
        socket::bytes_available(sock.as_raw_fd())
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            State::Created | State::Closed => Err(Error::Initialization),
            _ => {
                self.sock = None;
                self.state = State::Closed;
                Ok(())
            }
        }
    }

    fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        if let Some(sock) = &self.sock {
            sock.set_nonblocking(!blocking)?;
        }
        self.options.remove(ConnectorOptions::BLOCKING_MASK);
        self.options.insert(if blocking {
            ConnectorOptions::BLOCKING
        } else {
            ConnectorOptions::NON_BLOCKING
        });
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        self.options.contains(ConnectorOptions::BLOCKING)
    }

    fn options(&self) -> ConnectorOptions {
        self.options
    }

    fn address(&self) -> SocketAddress {
        if let Some(sock) = &self.sock {
            if let Ok(local) = sock.local_addr() {
                return socket::socket_address_from(&local);
            }
        }
        self.addr.clone()
    }
}
