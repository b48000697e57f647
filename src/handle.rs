use std::fmt;
use std::os::fd::RawFd;

/// An opaque wrapper around a platform I/O handle.
///
/// On POSIX platforms the handle is a raw file descriptor. `Handle` does not
/// own the descriptor and performs no I/O itself; it is a token passed
/// between connectors and the I/O subsystem. Hashing and ordering are total
/// and derived only from the raw value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    fd: RawFd,
}

const INVALID_FD: RawFd = -1;

impl Handle {
    /// The reserved invalid handle value.
    pub const INVALID: Handle = Handle { fd: INVALID_FD };

    /// Wraps a raw file descriptor.
    pub const fn new(fd: RawFd) -> Handle {
        Handle { fd }
    }

    /// Returns a handle that behaves like a valid handle for comparison and
    /// hashing, but cannot be used for I/O. Two dummy handles compare equal
    /// iff they were made from the same value.
    pub fn make_dummy(value: usize) -> Handle {
        Handle { fd: value as RawFd }
    }

    /// True iff this handle is not the invalid sentinel.
    pub fn valid(&self) -> bool {
        self.fd != INVALID_FD
    }

    /// The raw file descriptor backing this handle.
    pub fn raw(&self) -> RawFd {
        self.fd
    }
}

impl Default for Handle {
    fn default() -> Handle {
        Handle::INVALID
    }
}

impl From<RawFd> for Handle {
    fn from(fd: RawFd) -> Handle {
        Handle::new(fd)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.fd).finish()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fd)
    }
}
