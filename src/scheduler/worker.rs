use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use log::{trace, warn};

use crate::callback::Callback;
use crate::connector::{Connector, WeakConnector};
use crate::error::{Error, Result};
use crate::events::{Events, IoFlags};
use crate::scheduler::command::{Command, CommandQueue};
use crate::scheduler::tasklet::{Condition, Tasklet};

// How long a worker parks between queue checks when not notified.
const PARK_INTERVAL: Duration = Duration::from_millis(200);

/// Everything needed to re-register an I/O callback that ran under the
/// `REPEAT` flag and asked for another round.
pub(crate) struct RepeatRegistration {
    pub(crate) conn: WeakConnector,
    pub(crate) events: Events,
    pub(crate) flags: IoFlags,
}

/// A ready-to-run callback produced by the dispatch loop. Owned by
/// whichever worker pops it (or by the caller in inline mode).
pub(crate) struct RunnableEntry {
    pub(crate) callback: Callback,
    pub(crate) events: Events,
    pub(crate) error: Option<Error>,
    pub(crate) connector: Option<Connector>,
    pub(crate) repeat: Option<RepeatRegistration>,
}

impl RunnableEntry {
    /// Invokes the callback. A callback registered with `REPEAT` that
    /// returns [`Error::RepeatAction`] is re-registered through the
    /// command queue and the entry counts as handled.
    pub(crate) fn execute(self, commands: &CommandQueue) -> Result<()> {
        let now = Instant::now();
        let result = self
            .callback
            .invoke(now, self.events, self.error, self.connector.as_ref());

        if let (Err(Error::RepeatAction), Some(repeat)) = (&result, self.repeat) {
            trace!("re-registering repeat callback for {:?}", repeat.events);
            commands.enqueue(Command::RegisterIo {
                conn: repeat.conn,
                events: repeat.events,
                callback: self.callback,
                flags: repeat.flags,
            });
            commands.commit();
            return Ok(());
        }

        result
    }
}

/// A worker: a tasklet draining the scheduler's output queue and invoking
/// callbacks. Callback errors are logged and swallowed; callbacks run in
/// parallel across workers.
pub(crate) struct Worker {
    tasklet: Tasklet,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        condition: Arc<Condition>,
        queue: Arc<SegQueue<RunnableEntry>>,
        commands: Arc<CommandQueue>,
    ) -> Worker {
        let tasklet = Tasklet::spawn(format!("junction-worker-{id}"), condition, move |ctx| {
            trace!("worker {} up", id);
            loop {
                while let Some(entry) = queue.pop() {
                    if let Err(err) = entry.execute(&commands) {
                        warn!("worker {}: callback failed: {}", id, err);
                    }
                }
                if !ctx.sleep(PARK_INTERVAL) {
                    break;
                }
            }
            trace!("worker {} down", id);
        });

        Worker { tasklet }
    }

    pub(crate) fn stop(&self) {
        self.tasklet.stop();
    }

    pub(crate) fn join(&mut self) {
        self.tasklet.join();
    }
}
