use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::events::Events;
use crate::handle::Handle;
use crate::sys::selector::timeout_millis;

const MAX_EVENTS: usize = 64;

/// Level-triggered `epoll(7)` selector.
#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub(crate) fn register(&mut self, fd: RawFd, events: Events) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: events_to_epoll(events),
            u64: fd as u64,
        };

        let ep = self.ep.as_raw_fd();
        match syscall!(epoll_ctl(ep, libc::EPOLL_CTL_ADD, fd, &mut event)) {
            Ok(_) => Ok(()),
            // Already known; adjust the mask instead.
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => {
                syscall!(epoll_ctl(ep, libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let ep = self.ep.as_raw_fd();
        match syscall!(epoll_ctl(ep, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())) {
            Ok(_) => Ok(()),
            Err(ref err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn select(
        &mut self,
        events: &mut Vec<(Handle, Events)>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let mut buffer: [libc::epoll_event; MAX_EVENTS] =
            unsafe { std::mem::zeroed() };

        let ready = match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            buffer.as_mut_ptr(),
            MAX_EVENTS as i32,
            timeout_millis(timeout),
        )) {
            Ok(n) => n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => 0,
            Err(err) => return Err(err),
        };

        for ep_event in buffer.iter().take(ready as usize) {
            let translated = epoll_to_events(ep_event.events as libc::c_int);
            if !translated.is_empty() {
                events.push((Handle::new(ep_event.u64 as RawFd), translated));
            }
        }
        Ok(())
    }
}

fn events_to_epoll(events: Events) -> u32 {
    let mut kind = 0;

    if events.contains(Events::IO_READ) {
        kind |= EPOLLIN | EPOLLPRI;
    }
    if events.contains(Events::IO_WRITE) {
        kind |= EPOLLOUT;
    }
    if events.contains(Events::IO_CLOSE) {
        kind |= EPOLLRDHUP;
    }
    // EPOLLERR and EPOLLHUP are always reported, no need to ask.

    kind as u32
}

fn epoll_to_events(os: libc::c_int) -> Events {
    let mut events = Events::empty();

    if os & (EPOLLIN | EPOLLPRI) != 0 {
        events |= Events::IO_READ;
    }
    if os & EPOLLOUT != 0 {
        events |= Events::IO_WRITE;
    }
    if os & (EPOLLRDHUP | EPOLLHUP) != 0 {
        // Hang-up still leaves buffered data readable; report both so a
        // reader drains before observing the close.
        events |= Events::IO_READ | Events::IO_CLOSE;
    }
    if os & EPOLLERR != 0 {
        events |= Events::IO_ERROR;
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_round_trip() {
        let os = events_to_epoll(Events::IO_READ | Events::IO_WRITE);
        assert_ne!(os & EPOLLIN as u32, 0);
        assert_ne!(os & EPOLLOUT as u32, 0);

        let back = epoll_to_events((EPOLLIN | EPOLLOUT) as libc::c_int);
        assert!(back.contains(Events::IO_READ | Events::IO_WRITE));
    }

    #[test]
    fn hangup_coalesces_into_read_and_close() {
        let events = epoll_to_events(EPOLLHUP as libc::c_int);
        assert!(events.contains(Events::IO_READ));
        assert!(events.contains(Events::IO_CLOSE));
    }
}
