use std::os::fd::RawFd;

use socket2::{Domain, SockAddr, Socket, Type};

use crate::error::{Error, Result};
use crate::net::SocketAddress;

/// Creates a socket configured the way all socket-backed connectors need
/// it: close-on-exec, immediate close on drop, and the requested blocking
/// mode.
pub(crate) fn new_socket(domain: Domain, ty: Type, blocking: bool) -> Result<Socket> {
    let socket = Socket::new(domain, ty, None)?;
    socket.set_nonblocking(!blocking)?;
    if ty == Type::STREAM {
        socket.set_linger(Some(std::time::Duration::ZERO))?;
    }
    Ok(socket)
}

/// The socket2 domain matching an address.
pub(crate) fn domain_for(addr: &SocketAddress) -> Result<Domain> {
    match addr {
        SocketAddress::Inet4(_) => Ok(Domain::IPV4),
        SocketAddress::Inet6(_) => Ok(Domain::IPV6),
        SocketAddress::Local(_) => Ok(Domain::UNIX),
        SocketAddress::Unspec => Err(Error::InvalidValue),
    }
}

/// Converts an address into the socket2 form.
pub(crate) fn sock_addr_for(addr: &SocketAddress) -> Result<SockAddr> {
    match addr {
        SocketAddress::Inet4(a) => Ok(SockAddr::from(*a)),
        SocketAddress::Inet6(a) => Ok(SockAddr::from(*a)),
        SocketAddress::Local(p) => Ok(SockAddr::unix(p)?),
        SocketAddress::Unspec => Err(Error::InvalidValue),
    }
}

/// Converts a peer address reported by the OS back into our form.
pub(crate) fn socket_address_from(addr: &SockAddr) -> SocketAddress {
    if let Some(std_addr) = addr.as_socket() {
        return SocketAddress::from(std_addr);
    }
    if let Some(path) = addr.as_pathname() {
        return SocketAddress::from_path(path);
    }
    SocketAddress::Unspec
}

/// Toggles `O_NONBLOCK` on a raw descriptor; used by connectors whose
/// handles are not sockets.
pub(crate) fn set_fd_blocking(fd: RawFd, blocking: bool) -> Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    let flags = if blocking {
        flags & !libc::O_NONBLOCK
    } else {
        flags | libc::O_NONBLOCK
    };
    syscall!(fcntl(fd, libc::F_SETFL, flags))?;
    Ok(())
}

/// Bytes currently available to read on a descriptor, via `FIONREAD`.
pub(crate) fn bytes_available(fd: RawFd) -> Result<usize> {
    let mut avail: libc::c_int = 0;
    // The request constant's integer type differs between platforms.
    syscall!(ioctl(fd, libc::FIONREAD as _, &mut avail))?;
    Ok(avail.max(0) as usize)
}

/// Reads from a raw descriptor, mapping would-block to
/// [`Error::RepeatAction`].
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    let n = syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()))?;
    Ok(n as usize)
}

/// Writes to a raw descriptor, mapping would-block to
/// [`Error::RepeatAction`].
pub(crate) fn write_fd(fd: RawFd, buf: &[u8]) -> Result<usize> {
    let n = syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len()))?;
    Ok(n as usize)
}
