use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::events::Events;
use crate::handle::Handle;

const MAX_EVENTS: usize = 64;

// The kevent fields have platform-dependent integer types; these aliases
// keep the conversions in one place.
#[cfg(any(target_os = "freebsd", target_os = "ios", target_os = "macos"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "dragonfly", target_os = "openbsd"))]
type Filter = libc::c_short;
#[cfg(target_os = "netbsd")]
type Filter = u32;

#[cfg(any(target_os = "dragonfly", target_os = "freebsd", target_os = "ios", target_os = "macos"))]
type Flags = libc::c_ushort;
#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
type Flags = u32;

/// Level-triggered `kqueue(2)` selector.
#[derive(Debug)]
pub(crate) struct Selector {
    kq: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        // SAFETY: `kqueue(2)` ensures the fd is valid.
        let kq = unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) };
        syscall!(fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(Selector { kq })
    }

    fn change(&self, fd: RawFd, filter: Filter, flags: Flags) -> io::Result<()> {
        let mut change: libc::kevent = unsafe { std::mem::zeroed() };
        change.ident = fd as libc::uintptr_t;
        change.filter = filter;
        change.flags = flags;

        match syscall!(kevent(
            self.kq.as_raw_fd(),
            &change,
            1,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )) {
            Ok(_) => Ok(()),
            // Deleting a filter that was never added is fine.
            Err(ref err)
                if flags & libc::EV_DELETE as Flags != 0
                    && err.raw_os_error() == Some(libc::ENOENT) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn register(&mut self, fd: RawFd, events: Events) -> io::Result<()> {
        let want_read = events.intersects(Events::IO_READ | Events::IO_CLOSE | Events::IO_ERROR);
        let want_write = events.contains(Events::IO_WRITE);

        if want_read {
            self.change(
                fd,
                libc::EVFILT_READ as Filter,
                (libc::EV_ADD | libc::EV_ENABLE) as Flags,
            )?;
        } else {
            self.change(fd, libc::EVFILT_READ as Filter, libc::EV_DELETE as Flags)?;
        }

        if want_write {
            self.change(
                fd,
                libc::EVFILT_WRITE as Filter,
                (libc::EV_ADD | libc::EV_ENABLE) as Flags,
            )?;
        } else {
            self.change(fd, libc::EVFILT_WRITE as Filter, libc::EV_DELETE as Flags)?;
        }

        Ok(())
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.change(fd, libc::EVFILT_READ as Filter, libc::EV_DELETE as Flags)?;
        self.change(fd, libc::EVFILT_WRITE as Filter, libc::EV_DELETE as Flags)?;
        Ok(())
    }

    pub(crate) fn select(
        &mut self,
        events: &mut Vec<(Handle, Events)>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let timespec = timeout.map(|to| libc::timespec {
            tv_sec: to.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: libc::c_long::from(to.subsec_nanos() as i32),
        });
        let timespec_ptr = timespec
            .as_ref()
            .map(|ts| ts as *const libc::timespec)
            .unwrap_or(std::ptr::null());

        let mut buffer: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };

        let ready = match syscall!(kevent(
            self.kq.as_raw_fd(),
            std::ptr::null(),
            0,
            buffer.as_mut_ptr(),
            MAX_EVENTS as libc::c_int,
            timespec_ptr,
        )) {
            Ok(n) => n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => 0,
            Err(err) => return Err(err),
        };

        for kevent in buffer.iter().take(ready as usize) {
            let mut translated = Events::empty();

            if kevent.filter == libc::EVFILT_READ as Filter {
                translated |= Events::IO_READ;
            } else if kevent.filter == libc::EVFILT_WRITE as Filter {
                translated |= Events::IO_WRITE;
            }
            if kevent.flags & libc::EV_EOF as Flags != 0 {
                translated |= Events::IO_READ | Events::IO_CLOSE;
            }
            if kevent.flags & libc::EV_ERROR as Flags != 0 {
                translated |= Events::IO_ERROR;
            }

            if !translated.is_empty() {
                events.push((Handle::new(kevent.ident as RawFd), translated));
            }
        }
        Ok(())
    }
}
