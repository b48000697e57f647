//! Readiness selectors wrapping the platform polling primitive.
//!
//! Each selector exposes the same surface: `register` sets the exact event
//! mask a descriptor is watched with (adding or modifying as needed),
//! `deregister` forgets the descriptor, and `select` blocks for up to the
//! given timeout and appends `(Handle, Events)` pairs in platform-neutral
//! form. Level-triggered semantics throughout; hang-up coalesces into
//! `IO_READ | IO_CLOSE` so callers can observe EOF through a read.

#[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
pub(crate) mod epoll;

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(crate) mod kqueue;

pub(crate) mod poll;

use std::time::Duration;

/// Clamps a wait duration to whole milliseconds, rounding up so that
/// sub-millisecond timeouts do not turn into busy loops, matching what the
/// platform calls accept.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(to) => to
            .checked_add(Duration::from_nanos(999_999))
            .unwrap_or(to)
            .as_millis()
            .min(libc::c_int::MAX as u128) as libc::c_int,
    }
}
