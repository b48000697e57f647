use std::io::{Read, Write};
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

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
    Connected,
    Listening,
    Closed,
}

/// Unix domain socket connector backing the `local` scheme, with stream or
/// datagram behaviour selected through the connector options.
pub(crate) struct LocalConnector {
    addr: SocketAddress,
    options: ConnectorOptions,
    state: State,
    sock: Option<Socket>,
    // Set when this end created the file system entry, so close removes it.
    bound_path: Option<PathBuf>,
}

impl LocalConnector {
    pub(crate) fn new(addr: SocketAddress, options: ConnectorOptions) -> Result<LocalConnector> {
        if !matches!(addr, SocketAddress::Local(_)) {
            return Err(Error::InvalidValue);
        }
        Ok(LocalConnector {
            addr,
            options,
            state: State::Created,
            sock: None,
            bound_path: None,
        })
    }

    fn accepted(sock: Socket, addr: SocketAddress, options: ConnectorOptions) -> LocalConnector {
        LocalConnector {
            addr,
            options,
            state: State::Connected,
            sock: Some(sock),
            bound_path: None,
        }
    }

    fn datagram(&self) -> bool {
        self.options.contains(ConnectorOptions::DATAGRAM)
    }

    fn startable(&self) -> Result<()> {
        match self.state {
            State::Created | State::Closed => Ok(()),
            _ => Err(Error::Initialization),
        }
    }

    fn new_socket(&self) -> Result<Socket> {
        let ty = if self.datagram() {
            Type::DGRAM
        } else {
            Type::STREAM
        };
        socket::new_socket(socket::domain_for(&self.addr)?, ty, self.is_blocking())
    }

    fn sock(&self) -> Result<&Socket> {
        self.sock.as_ref().ok_or(Error::NoConnection)
    }
}

impl ConnectorImpl for LocalConnector {
    fn listen(&mut self) -> Result<()> {
        self.startable()?;

        let sock = self.new_socket()?;
        sock.bind(&socket::sock_addr_for(&self.addr)?)?;
        if !self.datagram() {
            sock.listen(LISTEN_BACKLOG)?;
        }

        self.bound_path = self.addr.as_path().map(PathBuf::from);
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
        sock.connect(&socket::sock_addr_for(&self.addr)?)?;

        self.sock = Some(sock);
        self.state = State::Connected;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.state == State::Connected && !self.datagram()
    }

    fn accept(&mut self) -> Result<Accepted> {
        if self.state != State::Listening {
            return Err(Error::Initialization);
        }
        if self.datagram() {
            return Ok(Accepted::Listener);
        }

        let (sock, _peer) = self.sock()?.accept()?;
        sock.set_nonblocking(!self.is_blocking())?;
        Ok(Accepted::New(Box::new(LocalConnector::accepted(
            sock,
            self.addr.clone(),
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
        if self.datagram() {
            return self.receive(buf).map(|(amount, _)| amount);
        }
        let mut sock = self.sock()?;
        Ok(sock.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.datagram() {
            let addr = self.addr.clone();
            return self.send(buf, &addr);
        }
        let mut sock = self.sock()?;
        Ok(sock.write(buf)?)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddress)> {
        let sock = self.sock()?;
        // Safety: `recv_from` only ever writes into the buffer.
        let spare = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (amount, sender) = sock.recv_from(spare)?;
        Ok((amount, socket::socket_address_from(&sender)))
    }

    fn send(&mut self, buf: &[u8], recipient: &SocketAddress) -> Result<usize> {
        let sock = self.sock()?;
        Ok(sock.send_to(buf, &socket::sock_addr_for(recipient)?)?)
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
                if let Some(path) = self.bound_path.take() {
                    let _ = std::fs::remove_file(path);
                }
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
        self.addr.clone()
    }
}

impl Drop for LocalConnector {
    fn drop(&mut self) {
        if let Some(path) = self.bound_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
