use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI};

use crate::events::Events;
use crate::handle::Handle;
use crate::sys::selector::timeout_millis;

/// Portable `poll(2)` selector; the fallback where neither epoll nor
/// kqueue is available, and selectable explicitly for debugging.
///
/// The registered set is rebuilt into a pollfd array on every wait, which
/// is what keeps this implementation simple and correct rather than fast.
#[derive(Debug, Default)]
pub(crate) struct Selector {
    registered: HashMap<RawFd, Events>,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        Ok(Selector::default())
    }

    pub(crate) fn register(&mut self, fd: RawFd, events: Events) -> io::Result<()> {
        self.registered.insert(fd, events);
        Ok(())
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.registered.remove(&fd);
        Ok(())
    }

    pub(crate) fn select(
        &mut self,
        events: &mut Vec<(Handle, Events)>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let mut pollfds: Vec<libc::pollfd> = self
            .registered
            .iter()
            .map(|(fd, mask)| libc::pollfd {
                fd: *fd,
                events: events_to_poll(*mask),
                revents: 0,
            })
            .collect();

        let ready = match syscall!(poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )) {
            Ok(n) => n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => 0,
            Err(err) => return Err(err),
        };

        if ready > 0 {
            for pollfd in &pollfds {
                let translated = poll_to_events(pollfd.revents);
                if !translated.is_empty() {
                    events.push((Handle::new(pollfd.fd), translated));
                }
            }
        }
        Ok(())
    }
}

fn events_to_poll(events: Events) -> libc::c_short {
    let mut kind = 0;

    if events.contains(Events::IO_READ) {
        kind |= POLLIN | POLLPRI;
    }
    if events.contains(Events::IO_WRITE) {
        kind |= POLLOUT;
    }
    // POLLERR, POLLHUP and POLLNVAL are always reported.

    kind
}

fn poll_to_events(os: libc::c_short) -> Events {
    let mut events = Events::empty();

    if os & (POLLIN | POLLPRI) != 0 {
        events |= Events::IO_READ;
    }
    if os & POLLOUT != 0 {
        events |= Events::IO_WRITE;
    }
    if os & POLLHUP != 0 {
        events |= Events::IO_READ | Events::IO_CLOSE;
    }
    if os & (POLLERR | POLLNVAL) != 0 {
        events |= Events::IO_ERROR;
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation() {
        assert_ne!(events_to_poll(Events::IO_READ) & POLLIN, 0);
        assert_eq!(events_to_poll(Events::IO_WRITE) & POLLIN, 0);

        let back = poll_to_events(POLLHUP);
        assert!(back.contains(Events::IO_READ));
        assert!(back.contains(Events::IO_CLOSE));
    }
}
