use std::io;

use thiserror::Error;

/// A specialized `Result` type for junction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error conditions reported by this crate.
///
/// Every variant carries a stable integer code (see [`Error::code`]) and a
/// stable name (see [`Error::name`]), so callers can map failures onto their
/// own error handling without string matching. Platform error values never
/// escape this crate; they are translated at the system boundary via the
/// `From<io::Error>` implementation below.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// An operation was attempted that is not implemented on this platform.
    #[error("operation not implemented on this platform")]
    NotImplemented,

    /// An operation was attempted on an improperly initialized object.
    #[error("object not properly initialized for this operation")]
    Initialization,

    /// An error that should not occur in normal operation.
    #[error("unexpected error")]
    Unexpected,

    /// An operation was aborted due to unrecoverable errors.
    #[error("operation aborted")]
    Aborted,

    /// The requested action is not supported for the object type.
    #[error("action not supported for this object type")]
    UnsupportedAction,

    /// Invalid or unknown format specified.
    #[error("invalid or unknown format")]
    Format,

    /// Invalid option specified.
    #[error("invalid option")]
    InvalidOption,

    /// An invalid parameter value was specified.
    #[error("invalid parameter value")]
    InvalidValue,

    /// The requested action would block or was interrupted; try again.
    #[error("action would block or was interrupted, repeat it")]
    RepeatAction,

    /// The requested action is being performed asynchronously.
    #[error("action in progress")]
    Async,

    /// A timeout occurred.
    #[error("timeout")]
    Timeout,

    /// Tried to invoke an empty callback object.
    #[error("tried to invoke an empty callback")]
    EmptyCallback,

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,

    /// File system error, e.g. a nonexistent file or a read-only file system.
    #[error("file system error")]
    FsError,

    /// The system or per-user limit for open file descriptors was exceeded.
    #[error("open file descriptor limit exceeded")]
    NumFiles,

    /// Too many items.
    #[error("too many items")]
    NumItems,

    /// An operation was attempted that was not permitted.
    #[error("operation not permitted")]
    AccessViolation,

    /// A connection was attempted but refused.
    #[error("connection refused")]
    ConnectionRefused,

    /// A connection was aborted.
    #[error("connection aborted")]
    ConnectionAborted,

    /// An operation requires a connection, but none is established.
    #[error("no connection established")]
    NoConnection,

    /// Network is unreachable.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// Address is already in use.
    #[error("address in use")]
    AddressInUse,

    /// A nonexistent interface was requested or the address was not local.
    #[error("address not available")]
    AddressNotAvailable,
}

impl Error {
    /// Returns the stable integer code for this error kind.
    ///
    /// Code `0` is reserved for success and never returned here.
    pub fn code(&self) -> u32 {
        match self {
            Error::NotImplemented => 1,
            Error::Initialization => 2,
            Error::Unexpected => 3,
            Error::Aborted => 4,
            Error::UnsupportedAction => 10,
            Error::Format => 11,
            Error::InvalidOption => 12,
            Error::InvalidValue => 13,
            Error::RepeatAction => 20,
            Error::Async => 21,
            Error::Timeout => 22,
            Error::EmptyCallback => 30,
            Error::OutOfMemory => 40,
            Error::FsError => 41,
            Error::NumFiles => 42,
            Error::NumItems => 43,
            Error::AccessViolation => 44,
            Error::ConnectionRefused => 50,
            Error::ConnectionAborted => 51,
            Error::NoConnection => 52,
            Error::NetworkUnreachable => 53,
            Error::AddressInUse => 54,
            Error::AddressNotAvailable => 55,
        }
    }

    /// Returns the stable name for this error kind.
    pub fn name(&self) -> &'static str {
        match self {
            Error::NotImplemented => "ERR_NOT_IMPLEMENTED",
            Error::Initialization => "ERR_INITIALIZATION",
            Error::Unexpected => "ERR_UNEXPECTED",
            Error::Aborted => "ERR_ABORTED",
            Error::UnsupportedAction => "ERR_UNSUPPORTED_ACTION",
            Error::Format => "ERR_FORMAT",
            Error::InvalidOption => "ERR_INVALID_OPTION",
            Error::InvalidValue => "ERR_INVALID_VALUE",
            Error::RepeatAction => "ERR_REPEAT_ACTION",
            Error::Async => "ERR_ASYNC",
            Error::Timeout => "ERR_TIMEOUT",
            Error::EmptyCallback => "ERR_EMPTY_CALLBACK",
            Error::OutOfMemory => "ERR_OUT_OF_MEMORY",
            Error::FsError => "ERR_FS_ERROR",
            Error::NumFiles => "ERR_NUM_FILES",
            Error::NumItems => "ERR_NUM_ITEMS",
            Error::AccessViolation => "ERR_ACCESS_VIOLATION",
            Error::ConnectionRefused => "ERR_CONNECTION_REFUSED",
            Error::ConnectionAborted => "ERR_CONNECTION_ABORTED",
            Error::NoConnection => "ERR_NO_CONNECTION",
            Error::NetworkUnreachable => "ERR_NETWORK_UNREACHABLE",
            Error::AddressInUse => "ERR_ADDRESS_IN_USE",
            Error::AddressNotAvailable => "ERR_ADDRESS_NOT_AVAILABLE",
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        // Raw codes first: some of these share an `io::ErrorKind` with less
        // specific conditions, or have no stable kind at all.
        if let Some(raw) = err.raw_os_error() {
            match raw {
                libc::EINPROGRESS => return Error::Async,
                libc::EMFILE | libc::ENFILE => return Error::NumFiles,
                libc::ENETUNREACH | libc::ENETDOWN => return Error::NetworkUnreachable,
                libc::ENOBUFS | libc::ENOMEM => return Error::OutOfMemory,
                libc::EBADF | libc::EINVAL | libc::EFAULT => return Error::InvalidValue,
                libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT => return Error::InvalidOption,
                libc::EPIPE => return Error::NoConnection,
                libc::ENOSPC => return Error::NumFiles,
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Error::RepeatAction,
            io::ErrorKind::TimedOut => Error::Timeout,
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => {
                Error::ConnectionAborted
            }
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => Error::NoConnection,
            io::ErrorKind::AddrInUse => Error::AddressInUse,
            io::ErrorKind::AddrNotAvailable => Error::AddressNotAvailable,
            io::ErrorKind::PermissionDenied => Error::AccessViolation,
            io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists => Error::FsError,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Error::InvalidValue,
            io::ErrorKind::OutOfMemory => Error::OutOfMemory,
            io::ErrorKind::Unsupported => Error::UnsupportedAction,
            _ => Error::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_unique() {
        let all = [
            Error::NotImplemented,
            Error::Initialization,
            Error::Unexpected,
            Error::Aborted,
            Error::UnsupportedAction,
            Error::Format,
            Error::InvalidOption,
            Error::InvalidValue,
            Error::RepeatAction,
            Error::Async,
            Error::Timeout,
            Error::EmptyCallback,
            Error::OutOfMemory,
            Error::FsError,
            Error::NumFiles,
            Error::NumItems,
            Error::AccessViolation,
            Error::ConnectionRefused,
            Error::ConnectionAborted,
            Error::NoConnection,
            Error::NetworkUnreachable,
            Error::AddressInUse,
            Error::AddressNotAvailable,
        ];

        let mut seen = std::collections::HashSet::new();
        for err in all {
            assert!(err.code() > 0);
            assert!(seen.insert(err.code()), "duplicate code for {}", err.name());
            assert!(err.name().starts_with("ERR_"));
        }
    }

    #[test]
    fn io_error_translation() {
        let wb = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(Error::from(wb), Error::RepeatAction);

        let in_progress = io::Error::from_raw_os_error(libc::EINPROGRESS);
        assert_eq!(Error::from(in_progress), Error::Async);

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(Error::from(refused), Error::ConnectionRefused);

        let emfile = io::Error::from_raw_os_error(libc::EMFILE);
        assert_eq!(Error::from(emfile), Error::NumFiles);
    }
}
