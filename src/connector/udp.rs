use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;

use socket2::{SockAddr, Socket, Type};

use crate::connector::interface::{Accepted, ConnectorImpl};
use crate::connector::{socket, ConnectorOptions};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::net::SocketAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Listening,
    Open,
    Closed,
}

/// Datagram socket connector backing the `udp`, `udp4` and `udp6` schemes.
///
/// `listen` binds the socket; `connect` creates a socket and remembers the
/// peer as the default recipient. Datagram connectors never report
/// `connected`.
pub(crate) struct UdpConnector {
    addr: SocketAddress,
    options: ConnectorOptions,
    state: State,
    sock: Option<Socket>,
    peer: Option<SockAddr>,
}

impl UdpConnector {
    pub(crate) fn new(addr: SocketAddress, options: ConnectorOptions) -> Result<UdpConnector> {
        if !matches!(addr, SocketAddress::Inet4(_) | SocketAddress::Inet6(_)) {
            return Err(Error::InvalidValue);
        }
        Ok(UdpConnector {
            addr,
            options,
            state: State::Created,
            sock: None,
            peer: None,
        })
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
            Type::DGRAM,
            self.is_blocking(),
        )
    }

    fn sock(&self) -> Result<&Socket> {
        self.sock.as_ref().ok_or(Error::NoConnection)
    }
}

impl ConnectorImpl for UdpConnector {
    fn listen(&mut self) -> Result<()> {
        self.startable()?;

        let sock = self.new_socket()?;
        sock.set_reuse_address(true)?;
        sock.bind(&socket::sock_addr_for(&self.addr)?)?;

        self.sock = Some(sock);
        self.state = State::Listening;
        Ok(())
    }

    fn listening(&self) -> bool {
        self.state == State::Listening
    }

    fn connect(&mut self) -> Result<()> {
        self.startable()?;

        let sock = self.new_socket()?;
        let target = socket::sock_addr_for(&self.addr)?;
        sock.connect(&target)?;

        self.sock = Some(sock);
        self.peer = Some(target);
        self.state = State::Open;
        Ok(())
    }

    fn connected(&self) -> bool {
        false
    }

    fn accept(&mut self) -> Result<Accepted> {
        if self.state != State::Listening {
            return Err(Error::Initialization);
        }
        Ok(Accepted::Listener)
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
        self.receive(buf).map(|(amount, _)| amount)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let sock = self.sock()?;
        match &self.peer {
            Some(peer) => Ok(sock.send_to(buf, peer)?),
            None => Err(Error::NoConnection),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddress)> {
        let sock = self.sock()?;
        // Safety: `recv_from` only ever writes into the buffer.
        let spare =
            unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (amount, sender) = sock.recv_from(spare)?;
        Ok((amount, socket::socket_address_from(&sender)))
    }

    fn send(&mut self, buf: &[u8], recipient: &SocketAddress) -> Result<usize> {
        let sock = self.sock()?;
        if recipient.valid() {
            Ok(sock.send_to(buf, &socket::sock_addr_for(recipient)?)?)
        } else {
            match &self.peer {
                Some(peer) => Ok(sock.send_to(buf, peer)?),
                None => Err(Error::NoConnection),
            }
        }
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
                self.peer = None;
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
