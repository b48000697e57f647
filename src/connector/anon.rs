use std::os::fd::RawFd;

use crate::connector::interface::{Accepted, ConnectorImpl};
use crate::connector::{socket, ConnectorOptions};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::net::SocketAddress;

/// Anonymous pipe connector backing the `anon` scheme.
///
/// The connector owns both pipe ends: writes go into the write end, reads
/// come out of the read end, so a single connector forms a loopback
/// channel. This is also what the scheduler builds its self-interrupt
/// signal from. Listening and connecting are the same operation; an open
/// anon connector is both listening and connected.
pub(crate) struct AnonConnector {
    options: ConnectorOptions,
    read_fd: RawFd,
    write_fd: RawFd,
}

fn new_pipe() -> Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1; 2];

    #[cfg(not(any(target_os = "ios", target_os = "macos")))]
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC))?;

    #[cfg(any(target_os = "ios", target_os = "macos"))]
    {
        syscall!(pipe(fds.as_mut_ptr()))?;
        for fd in &fds {
            syscall!(fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        }
    }

    Ok(fds)
}

impl AnonConnector {
    pub(crate) fn new(options: ConnectorOptions) -> Result<AnonConnector> {
        Ok(AnonConnector {
            options,
            read_fd: -1,
            write_fd: -1,
        })
    }

    fn open(&self) -> bool {
        self.read_fd >= 0
    }

    fn create(&mut self) -> Result<()> {
        if self.open() {
            return Err(Error::Initialization);
        }

        let fds = new_pipe()?;
        self.read_fd = fds[0];
        self.write_fd = fds[1];

        if !self.is_blocking() {
            socket::set_fd_blocking(self.read_fd, false)?;
            socket::set_fd_blocking(self.write_fd, false)?;
        }
        Ok(())
    }

    fn close_fds(&mut self) {
        if self.read_fd >= 0 {
            let _ = syscall!(close(self.read_fd));
        }
        if self.write_fd >= 0 {
            let _ = syscall!(close(self.write_fd));
        }
        self.read_fd = -1;
        self.write_fd = -1;
    }
}

impl ConnectorImpl for AnonConnector {
    fn listen(&mut self) -> Result<()> {
        self.create()
    }

    fn listening(&self) -> bool {
        self.open()
    }

    fn connect(&mut self) -> Result<()> {
        self.create()
    }

    fn connected(&self) -> bool {
        self.open()
    }

    fn accept(&mut self) -> Result<Accepted> {
        if !self.open() {
            return Err(Error::Initialization);
        }
        Ok(Accepted::Listener)
    }

    fn read_handle(&self) -> Handle {
        if self.open() {
            Handle::new(self.read_fd)
        } else {
            Handle::INVALID
        }
    }

    fn write_handle(&self) -> Handle {
        if self.open() {
            Handle::new(self.write_fd)
        } else {
            Handle::INVALID
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open() {
            return Err(Error::NoConnection);
        }
        socket::read_fd(self.read_fd, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.open() {
            return Err(Error::NoConnection);
        }
        socket::write_fd(self.write_fd, buf)
    }

    fn receive(&mut self, _buf: &mut [u8]) -> Result<(usize, SocketAddress)> {
        Err(Error::UnsupportedAction)
    }

    fn send(&mut self, _buf: &[u8], _recipient: &SocketAddress) -> Result<usize> {
        Err(Error::UnsupportedAction)
    }

    fn peek(&self) -> Result<usize> {
        if !self.open() {
            return Err(Error::Initialization);
        }
        socket::bytes_available(self.read_fd)
    }

    fn close(&mut self) -> Result<()> {
        if !self.open() {
            return Err(Error::Initialization);
        }
        self.close_fds();
        Ok(())
    }

    fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        if self.open() {
            socket::set_fd_blocking(self.read_fd, blocking)?;
            socket::set_fd_blocking(self.write_fd, blocking)?;
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
        SocketAddress::Unspec
    }
}

impl Drop for AnonConnector {
    fn drop(&mut self) {
        self.close_fds();
    }
}
