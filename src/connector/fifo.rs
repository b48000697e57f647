use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::connector::interface::{Accepted, ConnectorImpl};
use crate::connector::{socket, ConnectorOptions};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::net::SocketAddress;

/// POSIX named FIFO connector, backing the `fifo` scheme. The `pipe` scheme
/// maps onto the same implementation on POSIX platforms.
///
/// The FIFO is opened read-write so a single descriptor serves both
/// directions; note that FIFOs broadcast writes to all readers, including
/// the writer itself.
pub(crate) struct FifoConnector {
    addr: SocketAddress,
    options: ConnectorOptions,
    fd: RawFd,
    // The listening side created the file system entry and removes it again.
    created_path: Option<PathBuf>,
    listener: bool,
}

impl FifoConnector {
    pub(crate) fn new(addr: SocketAddress, options: ConnectorOptions) -> Result<FifoConnector> {
        if !matches!(addr, SocketAddress::Local(_)) {
            return Err(Error::InvalidValue);
        }
        Ok(FifoConnector {
            addr,
            options,
            fd: -1,
            created_path: None,
            listener: false,
        })
    }

    fn path_cstring(&self) -> Result<CString> {
        let path = self.addr.as_path().ok_or(Error::InvalidValue)?;
        CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::InvalidValue)
    }

    fn open_fifo(&mut self) -> Result<()> {
        let path = self.path_cstring()?;
        let mut flags = libc::O_RDWR | libc::O_CLOEXEC;
        if !self.is_blocking() {
            flags |= libc::O_NONBLOCK;
        }
        self.fd = syscall!(open(path.as_ptr(), flags))?;
        Ok(())
    }

    fn open(&self) -> bool {
        self.fd >= 0
    }
}

impl ConnectorImpl for FifoConnector {
    fn listen(&mut self) -> Result<()> {
        if self.open() {
            return Err(Error::Initialization);
        }

        let path = self.path_cstring()?;
        match syscall!(mkfifo(path.as_ptr(), 0o644)) {
            Ok(_) => {
                self.created_path = self.addr.as_path().map(PathBuf::from);
            }
            // An existing FIFO is fine; we just attach to it.
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => {}
            Err(err) => return Err(err.into()),
        }

        self.open_fifo()?;
        self.listener = true;
        Ok(())
    }

    fn listening(&self) -> bool {
        self.open() && self.listener
    }

    fn connect(&mut self) -> Result<()> {
        if self.open() {
            return Err(Error::Initialization);
        }
        self.open_fifo()?;
        self.listener = false;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.open() && !self.listener
    }

    fn accept(&mut self) -> Result<Accepted> {
        if !self.listening() {
            return Err(Error::Initialization);
        }
        Ok(Accepted::Listener)
    }

    fn read_handle(&self) -> Handle {
        if self.open() {
            Handle::new(self.fd)
        } else {
            Handle::INVALID
        }
    }

    fn write_handle(&self) -> Handle {
        self.read_handle()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open() {
            return Err(Error::NoConnection);
        }
        socket::read_fd(self.fd, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.open() {
            return Err(Error::NoConnection);
        }
        socket::write_fd(self.fd, buf)
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
        socket::bytes_available(self.fd)
    }

    fn close(&mut self) -> Result<()> {
        if !self.open() {
            return Err(Error::Initialization);
        }
        let _ = syscall!(close(self.fd));
        self.fd = -1;
        self.listener = false;
        if let Some(path) = self.created_path.take() {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        if self.open() {
            socket::set_fd_blocking(self.fd, blocking)?;
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

impl Drop for FifoConnector {
    fn drop(&mut self) {
        if self.open() {
            let _ = syscall!(close(self.fd));
        }
        if let Some(path) = self.created_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
