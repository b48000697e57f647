use bitflags::bitflags;

bitflags! {
    /// A mask of event kinds a callback can be registered and invoked for.
    ///
    /// The low bits describe I/O readiness, `TIMEOUT` and `ERROR` are raised
    /// by the scheduler itself, and every bit at or above `USER` is free for
    /// user-defined events fired through
    /// [`Scheduler::fire_events`](crate::Scheduler::fire_events).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct Events: u32 {
        /// A handle is ready for reading.
        const IO_READ = 1 << 0;
        /// A handle is ready for writing.
        const IO_WRITE = 1 << 1;
        /// A handle has produced errors.
        const IO_ERROR = 1 << 2;
        /// A handle has been opened. Only reported on some platforms.
        const IO_OPEN = 1 << 3;
        /// A handle has been closed. Cannot be reliably reported; consider
        /// it informative only.
        const IO_CLOSE = 1 << 4;

        /// A timeout the callback was scheduled for has been reached.
        const TIMEOUT = 1 << 7;
        /// Internal scheduler error.
        const ERROR = 1 << 8;

        /// First user-defined event bit. All higher bits are user-defined
        /// as well.
        const USER = 1 << 15;

        // Retain unknown bits; user events use the bits above USER freely.
        const _ = !0;
    }
}

impl Events {
    /// The bits that describe I/O readiness on a handle.
    pub const IO_MASK: Events = Events::IO_READ
        .union(Events::IO_WRITE)
        .union(Events::IO_ERROR)
        .union(Events::IO_OPEN)
        .union(Events::IO_CLOSE);

    /// True iff the mask is non-empty and contains only user-defined event
    /// bits, i.e. no bit below [`Events::USER`].
    pub fn is_user_only(&self) -> bool {
        !self.is_empty() && (self.bits() & (Events::USER.bits() - 1)) == 0
    }
}

bitflags! {
    /// Flags modifying the lifetime of an I/O callback registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IoFlags: u8 {
        /// Unregister the callback after it fired once.
        const ONESHOT = 1 << 0;
        /// Unregister the callback after it fired; re-register it iff the
        /// callback returned [`Error::RepeatAction`](crate::Error::RepeatAction).
        const REPEAT = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_bits_are_retained() {
        let ev = Events::from_bits_retain(Events::USER.bits() << 3);
        assert!(!ev.is_empty());
        assert_eq!(ev.bits(), 1 << 18);

        let combined = ev | Events::USER;
        assert!(combined.contains(Events::USER));
        assert!(combined.contains(ev));
    }

    #[test]
    fn user_only_detection() {
        assert!(Events::USER.is_user_only());
        assert!(Events::from_bits_retain(1 << 20).is_user_only());
        assert!(!(Events::IO_READ).is_user_only());
        assert!(!(Events::USER | Events::IO_READ).is_user_only());
        assert!(!Events::empty().is_user_only());
    }

    #[test]
    fn io_mask_covers_io_bits() {
        assert!(Events::IO_MASK.contains(Events::IO_READ));
        assert!(Events::IO_MASK.contains(Events::IO_CLOSE));
        assert!(!Events::IO_MASK.contains(Events::TIMEOUT));
        assert!(!Events::IO_MASK.contains(Events::USER));
    }
}
