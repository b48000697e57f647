use std::sync::{Arc, Condvar, Mutex};

use crossbeam::queue::SegQueue;

use crate::api::Api;
use crate::callback::Callback;
use crate::connector::{Connector, WeakConnector};
use crate::error::{Error, Result};
use crate::events::{Events, IoFlags};
use crate::handle::Handle;
use crate::scheduler::callbacks_scheduled::ScheduledEntry;

/// A registration change posted from caller threads to the dispatch
/// thread. Commands referencing a connector hold a weak reference, so a
/// queued command does not keep the connector alive; if the caller dropped
/// every copy before the command is drained, it is silently discarded.
pub(crate) enum Command {
    RegisterIo {
        conn: WeakConnector,
        events: Events,
        callback: Callback,
        flags: IoFlags,
    },
    UnregisterIo {
        conn: WeakConnector,
        events: Events,
        // None removes the events for every callback on the connector.
        callback: Option<Callback>,
    },
    UnregisterConnector {
        conn: WeakConnector,
    },
    Schedule(ScheduledEntry),
    Unschedule(Callback),
    RegisterUser {
        events: Events,
        callback: Callback,
    },
    UnregisterUser {
        events: Events,
        callback: Callback,
    },
    Trigger(Events),
    Barrier(Arc<BarrierSignal>),
}

/// Completion signal for [`Command::Barrier`]; the poster blocks on it
/// until the dispatch thread has drained the queue up to the sentinel.
pub(crate) struct BarrierSignal {
    reached: Mutex<bool>,
    cond: Condvar,
}

impl BarrierSignal {
    pub(crate) fn new() -> BarrierSignal {
        BarrierSignal {
            reached: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        if let Ok(mut reached) = self.reached.lock() {
            *reached = true;
            self.cond.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> Result<()> {
        let mut reached = self.reached.lock().map_err(|_| Error::Aborted)?;
        while !*reached {
            reached = self.cond.wait(reached).map_err(|_| Error::Aborted)?;
        }
        Ok(())
    }
}

/// The lock-free MPMC command queue, bundled with the signalling connector
/// that wakes the dispatch loop.
///
/// The queue and the signal are independent: `commit` may be called with an
/// empty queue, and entries may sit in the queue without a commit. Bundling
/// them makes it possible to hand both to the dispatch loop as one value.
pub(crate) struct CommandQueue {
    queue: SegQueue<Command>,
    signal: Connector,
}

impl CommandQueue {
    pub(crate) fn new(api: &Api) -> Result<CommandQueue> {
        let signal = Connector::new(api, "anon://")?;
        signal.listen()?;
        Ok(CommandQueue {
            queue: SegQueue::new(),
            signal,
        })
    }

    pub(crate) fn enqueue(&self, command: Command) {
        self.queue.push(command);
    }

    pub(crate) fn pop(&self) -> Option<Command> {
        self.queue.pop()
    }

    /// Wakes the dispatch loop by writing one byte into the signal.
    pub(crate) fn commit(&self) {
        // A full pipe already guarantees a wakeup.
        let _ = self.signal.write(&[0]);
    }

    /// Drains any pending signal bytes; returns true if there were any.
    pub(crate) fn clear(&self) -> bool {
        let mut buf = [0u8; 64];
        let mut seen = false;
        while let Ok(amount) = self.signal.read(&mut buf) {
            if amount == 0 {
                break;
            }
            seen = true;
        }
        seen
    }

    /// The handle the dispatch loop registers for `IO_READ` to observe
    /// commits.
    pub(crate) fn signal_handle(&self) -> Handle {
        self.signal.get_read_handle()
    }
}
