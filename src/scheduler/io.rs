use std::collections::HashMap;
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::events::Events;
use crate::handle::Handle;
use crate::sys::selector;

/// Selects the readiness primitive backing a [`Scheduler`](crate::Scheduler).
///
/// `Automatic` picks the best primitive the platform offers and is the
/// right choice outside of debugging. Requesting a primitive the platform
/// does not have fails scheduler construction with
/// [`Error::NotImplemented`](crate::Error::NotImplemented).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoType {
    #[default]
    Automatic,
    /// Linux.
    Epoll,
    /// BSDs, including macOS.
    Kqueue,
    /// Any POSIX platform.
    Poll,
}

enum Backend {
    #[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
    Epoll(selector::epoll::Selector),
    #[cfg(any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    Kqueue(selector::kqueue::Selector),
    Poll(selector::poll::Selector),
}

impl Backend {
    fn register(&mut self, handle: Handle, events: Events) -> std::io::Result<()> {
        match self {
            #[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
            Backend::Epoll(s) => s.register(handle.raw(), events),
            #[cfg(any(
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "ios",
                target_os = "macos",
                target_os = "netbsd",
                target_os = "openbsd"
            ))]
            Backend::Kqueue(s) => s.register(handle.raw(), events),
            Backend::Poll(s) => s.register(handle.raw(), events),
        }
    }

    fn deregister(&mut self, handle: Handle) -> std::io::Result<()> {
        match self {
            #[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
            Backend::Epoll(s) => s.deregister(handle.raw()),
            #[cfg(any(
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "ios",
                target_os = "macos",
                target_os = "netbsd",
                target_os = "openbsd"
            ))]
            Backend::Kqueue(s) => s.deregister(handle.raw()),
            Backend::Poll(s) => s.deregister(handle.raw()),
        }
    }

    fn select(
        &mut self,
        events: &mut Vec<(Handle, Events)>,
        timeout: Option<Duration>,
    ) -> std::io::Result<()> {
        match self {
            #[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
            Backend::Epoll(s) => s.select(events, timeout),
            #[cfg(any(
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "ios",
                target_os = "macos",
                target_os = "netbsd",
                target_os = "openbsd"
            ))]
            Backend::Kqueue(s) => s.select(events, timeout),
            Backend::Poll(s) => s.select(events, timeout),
        }
    }
}

/// The platform-abstract readiness reporter the dispatch loop drives.
///
/// Keeps the aggregate event mask per handle, making `register` and
/// `unregister` idempotent with respect to bits already set or cleared;
/// the handle is fully removed from the platform selector once its mask
/// drains to empty.
pub(crate) struct IoSubsystem {
    backend: Backend,
    registered: HashMap<Handle, Events>,
}

impl IoSubsystem {
    pub(crate) fn new(io_type: IoType) -> Result<IoSubsystem> {
        let backend = match io_type {
            IoType::Automatic => default_backend()?,
            IoType::Epoll => {
                #[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
                {
                    Backend::Epoll(selector::epoll::Selector::new().map_err(Error::from)?)
                }
                #[cfg(not(any(target_os = "android", target_os = "illumos", target_os = "linux")))]
                {
                    return Err(Error::NotImplemented);
                }
            }
            IoType::Kqueue => {
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd"
                ))]
                {
                    Backend::Kqueue(selector::kqueue::Selector::new().map_err(Error::from)?)
                }
                #[cfg(not(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd"
                )))]
                {
                    return Err(Error::NotImplemented);
                }
            }
            IoType::Poll => Backend::Poll(selector::poll::Selector::new().map_err(Error::from)?),
        };

        Ok(IoSubsystem {
            backend,
            registered: HashMap::new(),
        })
    }

    /// Adds `events` to the mask the handle is watched with.
    pub(crate) fn register_handle(&mut self, handle: Handle, events: Events) -> Result<()> {
        if !handle.valid() {
            return Err(Error::InvalidValue);
        }

        let old = self.registered.get(&handle).copied().unwrap_or_default();
        let merged = old | events;
        if merged == old {
            return Ok(());
        }

        trace!("io: register {} for {:?} (was {:?})", handle, merged, old);
        self.backend.register(handle, merged)?;
        self.registered.insert(handle, merged);
        Ok(())
    }

    /// Removes `events` from the mask the handle is watched with; forgets
    /// the handle entirely once no bits remain.
    pub(crate) fn unregister_handle(&mut self, handle: Handle, events: Events) -> Result<()> {
        if !handle.valid() {
            return Err(Error::InvalidValue);
        }

        let Some(old) = self.registered.get(&handle).copied() else {
            return Ok(());
        };
        let remaining = old - events;
        if remaining == old {
            return Ok(());
        }

        trace!("io: unregister {} down to {:?}", handle, remaining);
        if remaining.is_empty() {
            self.backend.deregister(handle)?;
            self.registered.remove(&handle);
        } else {
            self.backend.register(handle, remaining)?;
            self.registered.insert(handle, remaining);
        }
        Ok(())
    }

    /// The aggregate mask currently registered for a handle.
    #[cfg(test)]
    pub(crate) fn registered_events(&self, handle: Handle) -> Events {
        self.registered.get(&handle).copied().unwrap_or_default()
    }

    /// Blocks up to `timeout` and returns the observed events, merged so
    /// each handle appears at most once with the union of its masks.
    pub(crate) fn wait(&mut self, timeout: Duration) -> Result<Vec<(Handle, Events)>> {
        let mut raw = Vec::with_capacity(16);
        self.backend.select(&mut raw, Some(timeout))?;

        let mut merged: Vec<(Handle, Events)> = Vec::with_capacity(raw.len());
        let mut index: HashMap<Handle, usize> = HashMap::with_capacity(raw.len());
        for (handle, events) in raw {
            match index.get(&handle) {
                Some(at) => merged[*at].1 |= events,
                None => {
                    index.insert(handle, merged.len());
                    merged.push((handle, events));
                }
            }
        }
        Ok(merged)
    }
}

fn default_backend() -> Result<Backend> {
    #[cfg(any(target_os = "android", target_os = "illumos", target_os = "linux"))]
    {
        Ok(Backend::Epoll(
            selector::epoll::Selector::new().map_err(Error::from)?,
        ))
    }
    #[cfg(any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    {
        Ok(Backend::Kqueue(
            selector::kqueue::Selector::new().map_err(Error::from)?,
        ))
    }
    #[cfg(not(any(
        target_os = "android",
        target_os = "illumos",
        target_os = "linux",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd"
    )))]
    {
        Ok(Backend::Poll(
            selector::poll::Selector::new().map_err(Error::from)?,
        ))
    }
}
