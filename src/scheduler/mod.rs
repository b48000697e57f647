//! The scheduler: an I/O dispatch loop feeding a worker pool, with I/O,
//! timed and user-defined callbacks registered through commit-based
//! commands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use log::{debug, trace, warn};

use crate::api::Api;
use crate::callback::Callback;
use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::events::{Events, IoFlags};
use crate::handle::Handle;

mod callbacks_io;
mod callbacks_scheduled;
mod callbacks_user;
mod command;
mod io;
mod tasklet;
mod worker;

use callbacks_io::{IoCallbacks, IoEntry};
use callbacks_scheduled::{ScheduledCallbacks, ScheduledEntry};
use callbacks_user::UserCallbacks;
use command::{BarrierSignal, Command, CommandQueue};
use tasklet::Condition;
use worker::{RepeatRegistration, RunnableEntry, Worker};

pub use io::IoType;

// Upper bound on one dispatch wait; keeps the loop responsive to commits
// even if the signal write itself got lost to a full pipe.
const POLL_CAP: Duration = Duration::from_millis(20);

/// Multiplexes I/O readiness, timed events and user-defined events onto a
/// worker pool or a caller-driven loop.
///
/// A scheduler runs in one of two modes, decided by the worker count:
///
/// - **worker mode** (`workers != 0`): a dedicated dispatch thread waits
///   for events and hands ready callbacks to `workers` tasklets. A
///   negative count uses the hardware concurrency.
/// - **inline mode** (`workers == 0`): nothing runs until the caller
///   drives the loop through [`Scheduler::process_events`]; ready
///   callbacks execute on the caller's thread.
///
/// All registration functions merely post commands; the dispatch thread
/// applies them. Use [`Scheduler::commit_callbacks`] when you need the
/// commands posted so far to be in effect.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.num_workers())
            .finish_non_exhaustive()
    }
}

struct Inner {
    commands: Arc<CommandQueue>,
    out_queue: Arc<SegQueue<RunnableEntry>>,
    worker_condition: Arc<Condition>,
    workers: Mutex<Vec<Worker>>,
    num_workers: AtomicUsize,
    dispatch_running: Arc<AtomicBool>,
    dispatch_thread: Mutex<Option<thread::JoinHandle<()>>>,
    state: Mutex<Option<DispatchState>>,
}

// Per-connector bookkeeping for the non-blocking policy: registered
// connectors are forced non-blocking, and restored on full unregistration
// iff they were blocking originally.
struct DispatchState {
    io: io::IoSubsystem,
    io_callbacks: IoCallbacks,
    scheduled: ScheduledCallbacks,
    user: UserCallbacks,
    triggered: Vec<Events>,
    connector_modes: HashMap<Connector, bool>,
    interrupt_handle: Handle,
}

impl Scheduler {
    /// Creates a scheduler using the best available I/O primitive; see
    /// [`Scheduler::with_type`] for the worker count semantics.
    pub fn new(api: &Api, workers: isize) -> Result<Scheduler> {
        Scheduler::with_type(api, workers, IoType::Automatic)
    }

    /// Creates a scheduler with an explicit [`IoType`]. `workers < 0`
    /// selects the hardware concurrency, `0` inline mode, any other value
    /// that many worker tasklets.
    pub fn with_type(api: &Api, workers: isize, io_type: IoType) -> Result<Scheduler> {
        let commands = Arc::new(CommandQueue::new(api)?);

        let mut io = io::IoSubsystem::new(io_type)?;
        let interrupt_handle = commands.signal_handle();
        io.register_handle(
            interrupt_handle,
            Events::IO_READ | Events::IO_ERROR | Events::IO_CLOSE,
        )?;

        let inner = Arc::new(Inner {
            commands,
            out_queue: Arc::new(SegQueue::new()),
            worker_condition: Arc::new(Condition::new()),
            workers: Mutex::new(Vec::new()),
            num_workers: AtomicUsize::new(0),
            dispatch_running: Arc::new(AtomicBool::new(false)),
            dispatch_thread: Mutex::new(None),
            state: Mutex::new(Some(DispatchState {
                io,
                io_callbacks: IoCallbacks::default(),
                scheduled: ScheduledCallbacks::default(),
                user: UserCallbacks::default(),
                triggered: Vec::new(),
                connector_modes: HashMap::new(),
                interrupt_handle,
            })),
        });

        let scheduler = Scheduler { inner };
        scheduler.set_num_workers(workers)?;
        Ok(scheduler)
    }

    /// The current number of worker tasklets.
    pub fn num_workers(&self) -> usize {
        self.inner.num_workers.load(Ordering::Acquire)
    }

    /// Adjusts the worker count, switching between inline and worker mode
    /// as needed. After `set_num_workers(0)` returns, no worker thread
    /// touches any callback state.
    pub fn set_num_workers(&self, workers: isize) -> Result<()> {
        let target = if workers < 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers as usize
        };
        let current = self.num_workers();
        if target == current {
            return Ok(());
        }

        debug!("adjusting worker count from {} to {}", current, target);
        if current == 0 {
            self.resize_pool(target)?;
            self.start_dispatch()?;
        } else if target == 0 {
            self.stop_dispatch();
            self.resize_pool(0)?;
        } else {
            self.resize_pool(target)?;
        }
        Ok(())
    }

    fn resize_pool(&self, target: usize) -> Result<()> {
        let mut workers = self.inner.workers.lock().map_err(|_| Error::Aborted)?;

        while workers.len() > target {
            if let Some(mut worker) = workers.pop() {
                worker.stop();
                worker.join();
            }
        }
        for id in workers.len()..target {
            workers.push(Worker::new(
                id,
                Arc::clone(&self.inner.worker_condition),
                Arc::clone(&self.inner.out_queue),
                Arc::clone(&self.inner.commands),
            ));
        }

        self.inner.num_workers.store(target, Ordering::Release);
        Ok(())
    }

    fn start_dispatch(&self) -> Result<()> {
        let state = self
            .inner
            .state
            .lock()
            .map_err(|_| Error::Aborted)?
            .take()
            .ok_or(Error::Unexpected)?;

        self.inner.dispatch_running.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("junction-dispatch".into())
            .spawn(move || inner.dispatch_loop(state))
            .map_err(|_| Error::Unexpected)?;

        *self
            .inner
            .dispatch_thread
            .lock()
            .map_err(|_| Error::Aborted)? = Some(handle);
        Ok(())
    }

    fn stop_dispatch(&self) {
        self.inner.dispatch_running.store(false, Ordering::Release);
        self.inner.commands.commit();
        if let Ok(mut thread) = self.inner.dispatch_thread.lock() {
            if let Some(handle) = thread.take() {
                let _ = handle.join();
            }
        }
    }

    /// Registers `callback` for `events` on `conn`. Only the I/O bits of
    /// the mask are considered.
    pub fn register_connector(
        &self,
        events: Events,
        conn: &Connector,
        callback: &Callback,
    ) -> Result<()> {
        self.register_connector_flags(events, conn, callback, IoFlags::empty())
    }

    /// Like [`Scheduler::register_connector`], with explicit lifetime
    /// flags: `ONESHOT` drops the registration after the first invocation,
    /// `REPEAT` drops it and re-registers iff the callback returned
    /// [`Error::RepeatAction`].
    pub fn register_connector_flags(
        &self,
        events: Events,
        conn: &Connector,
        callback: &Callback,
        flags: IoFlags,
    ) -> Result<()> {
        if callback.is_empty() {
            return Err(Error::EmptyCallback);
        }
        if !conn.valid() || (events & Events::IO_MASK).is_empty() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::RegisterIo {
            conn: conn.downgrade(),
            events: events & Events::IO_MASK,
            callback: callback.clone(),
            flags,
        });
        Ok(())
    }

    /// Stops listening for `events` with `callback` on `conn`. The
    /// registration is forgotten once no event bits remain.
    pub fn unregister_connector(
        &self,
        events: Events,
        conn: &Connector,
        callback: &Callback,
    ) -> Result<()> {
        if callback.is_empty() {
            return Err(Error::EmptyCallback);
        }
        if !conn.valid() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::UnregisterIo {
            conn: conn.downgrade(),
            events: events & Events::IO_MASK,
            callback: Some(callback.clone()),
        });
        Ok(())
    }

    /// Stops listening for `events` on `conn` for every registered
    /// callback.
    pub fn unregister_connector_events(&self, events: Events, conn: &Connector) -> Result<()> {
        if !conn.valid() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::UnregisterIo {
            conn: conn.downgrade(),
            events: events & Events::IO_MASK,
            callback: None,
        });
        Ok(())
    }

    /// Drops every registration on `conn`.
    pub fn unregister_connector_all(&self, conn: &Connector) -> Result<()> {
        if !conn.valid() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::UnregisterConnector {
            conn: conn.downgrade(),
        });
        Ok(())
    }

    /// Runs `callback` once, `delay` from now.
    pub fn schedule_once(&self, delay: Duration, callback: &Callback) -> Result<()> {
        self.schedule(Instant::now() + delay, Duration::ZERO, 0, callback)
    }

    /// Runs `callback` once when `time` is reached.
    pub fn schedule_at(&self, time: Instant, callback: &Callback) -> Result<()> {
        self.schedule(time, Duration::ZERO, 0, callback)
    }

    /// Runs `callback` at `first`, then every `interval`.
    ///
    /// `count` zero or a zero `interval` mean a single invocation; a
    /// negative count repeats until [`Scheduler::unschedule`]; a positive
    /// count gives the exact number of invocations.
    pub fn schedule(
        &self,
        first: Instant,
        interval: Duration,
        count: i64,
        callback: &Callback,
    ) -> Result<()> {
        if callback.is_empty() {
            return Err(Error::EmptyCallback);
        }

        self.post(Command::Schedule(ScheduledEntry {
            deadline: first,
            interval,
            count,
            callback: callback.clone(),
        }));
        Ok(())
    }

    /// Removes every scheduled entry holding `callback`, at whatever
    /// deadline.
    pub fn unschedule(&self, callback: &Callback) -> Result<()> {
        if callback.is_empty() {
            return Err(Error::EmptyCallback);
        }

        self.post(Command::Unschedule(callback.clone()));
        Ok(())
    }

    /// Registers `callback` for the user-defined events in `events`; every
    /// bit must be at or above [`Events::USER`].
    pub fn register_event(&self, events: Events, callback: &Callback) -> Result<()> {
        if callback.is_empty() {
            return Err(Error::EmptyCallback);
        }
        if !events.is_user_only() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::RegisterUser {
            events,
            callback: callback.clone(),
        });
        Ok(())
    }

    /// Removes the user-defined `events` bits from `callback`'s
    /// registration.
    pub fn unregister_event(&self, events: Events, callback: &Callback) -> Result<()> {
        if callback.is_empty() {
            return Err(Error::EmptyCallback);
        }
        if !events.is_user_only() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::UnregisterUser {
            events,
            callback: callback.clone(),
        });
        Ok(())
    }

    /// Fires user-defined events. Masks containing system bits (below
    /// [`Events::USER`]) are rejected with [`Error::InvalidValue`] and
    /// nothing fires.
    pub fn fire_events(&self, events: Events) -> Result<()> {
        if !events.is_user_only() {
            return Err(Error::InvalidValue);
        }

        self.post(Command::Trigger(events));
        Ok(())
    }

    /// Returns once every command posted before this call has been applied
    /// by the dispatch thread.
    pub fn commit_callbacks(&self) -> Result<()> {
        if self.num_workers() > 0 {
            let barrier = Arc::new(BarrierSignal::new());
            self.post(Command::Barrier(Arc::clone(&barrier)));
            return barrier.wait();
        }

        // Inline mode: there is no dispatch thread, drain synchronously.
        let mut guard = self.inner.state.lock().map_err(|_| Error::Aborted)?;
        let state = guard.as_mut().ok_or(Error::Unexpected)?;
        let mut ready = Vec::new();
        self.inner.commands.clear();
        self.inner.process_commands(state, &mut ready);
        for entry in ready {
            if let Err(err) = entry.execute(&self.inner.commands) {
                warn!("error callback failed during commit: {}", err);
            }
        }
        Ok(())
    }

    /// Drives one iteration of the dispatch loop on the caller's thread
    /// (inline mode only; fails with [`Error::UnsupportedAction`] when
    /// workers are running).
    ///
    /// Waits up to `timeout` for events and runs the resulting callbacks
    /// inline. With `soft_timeout` the wait may extend past `timeout` to
    /// the next scheduled deadline. Returns [`Error::Timeout`] when no
    /// callback fired. With `exit_on_failure`, the first callback failure
    /// stops dispatching and is returned; otherwise all callbacks run and
    /// the last failure is returned.
    pub fn process_events(
        &self,
        timeout: Duration,
        soft_timeout: bool,
        exit_on_failure: bool,
    ) -> Result<()> {
        if self.num_workers() > 0 {
            return Err(Error::UnsupportedAction);
        }

        let mut guard = self.inner.state.lock().map_err(|_| Error::Aborted)?;
        let state = guard.as_mut().ok_or(Error::UnsupportedAction)?;

        let ready = self.inner.one_iteration(state, timeout, soft_timeout)?;
        if ready.is_empty() {
            return Err(Error::Timeout);
        }

        let mut failure = None;
        for entry in ready {
            if let Err(err) = entry.execute(&self.inner.commands) {
                failure = Some(err);
                if exit_on_failure {
                    break;
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn post(&self, command: Command) {
        self.inner.commands.enqueue(command);
        self.inner.commands.commit();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_dispatch();
        let _ = self.resize_pool(0);
    }
}

impl Inner {
    fn dispatch_loop(self: Arc<Inner>, mut state: DispatchState) {
        debug!("dispatch loop up");
        while self.dispatch_running.load(Ordering::Acquire) {
            match self.one_iteration(&mut state, POLL_CAP, false) {
                Ok(ready) => self.hand_to_workers(ready),
                Err(err) => {
                    warn!("dispatch iteration failed: {}", err);
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        debug!("dispatch loop down");

        // Hand the state back for inline use or a later restart.
        if let Ok(mut slot) = self.state.lock() {
            *slot = Some(state);
        }
    }

    fn hand_to_workers(&self, ready: Vec<RunnableEntry>) {
        if ready.is_empty() {
            return;
        }

        let wakeups = ready.len().min(self.num_workers.load(Ordering::Acquire));
        for entry in ready {
            self.out_queue.push(entry);
        }
        for _ in 0..wakeups {
            self.worker_condition.notify_one();
        }
    }

    /// One turn of the dispatch loop: drain commands, wait for events,
    /// collect ready entries.
    fn one_iteration(
        &self,
        state: &mut DispatchState,
        timeout: Duration,
        soft_timeout: bool,
    ) -> Result<Vec<RunnableEntry>> {
        // Drain the signal before the queue: a commit that lands in
        // between leaves a byte behind and simply wakes the next wait.
        let mut ready = Vec::new();
        self.commands.clear();
        self.process_commands(state, &mut ready);

        let now = Instant::now();
        let wait = if !state.triggered.is_empty() {
            // Fired user events are already waiting for delivery.
            Duration::ZERO
        } else {
            match state.scheduled.next_deadline() {
                Some(deadline) => {
                    let until = deadline.saturating_duration_since(now);
                    if soft_timeout {
                        until
                    } else {
                        until.min(timeout)
                    }
                }
                None => timeout,
            }
        };

        let events = state.io.wait(wait)?;
        let now = Instant::now();

        let mut interrupted = false;
        for (handle, mask) in events {
            if handle == state.interrupt_handle {
                interrupted = true;
                continue;
            }
            trace!("events {:?} on handle {}", mask, handle);
            for entry in state.io_callbacks.copy_matching(handle, mask) {
                self.prepare_io_entry(state, entry, &mut ready);
            }
        }

        if interrupted {
            self.commands.clear();
            self.process_commands(state, &mut ready);
        }

        self.collect_scheduled(state, now, &mut ready);
        self.collect_user(state, &mut ready);

        Ok(ready)
    }

    /// Applies the counting rules to entries whose deadline passed. If the
    /// clock jumped across several intervals the entry still fires once
    /// per dispatch; later dispatches catch up on the rest.
    fn collect_scheduled(
        &self,
        state: &mut DispatchState,
        now: Instant,
        ready: &mut Vec<RunnableEntry>,
    ) {
        for mut entry in state.scheduled.take_timed_out(now) {
            let reinsert = if entry.interval.is_zero() || entry.count == 0 {
                false
            } else if entry.count < 0 {
                true
            } else {
                entry.count -= 1;
                entry.count > 0
            };

            ready.push(RunnableEntry {
                callback: entry.callback.clone(),
                events: Events::TIMEOUT,
                error: None,
                connector: None,
                repeat: None,
            });

            if reinsert {
                entry.deadline += entry.interval;
                state.scheduled.add(entry);
            }
        }
    }

    fn collect_user(&self, state: &mut DispatchState, ready: &mut Vec<RunnableEntry>) {
        let triggered = std::mem::take(&mut state.triggered);
        for events in triggered {
            trace!("firing user events {:?}", events);
            for entry in state.user.copy_matching(events) {
                ready.push(RunnableEntry {
                    callback: entry.callback,
                    events: entry.events,
                    error: None,
                    connector: None,
                    repeat: None,
                });
            }
        }
    }

    /// Turns a matched I/O store entry into a runnable one, applying the
    /// ONESHOT/REPEAT flags: both unregister the stored entry before the
    /// callback is invoked.
    fn prepare_io_entry(
        &self,
        state: &mut DispatchState,
        matched: IoEntry,
        ready: &mut Vec<RunnableEntry>,
    ) {
        let mut repeat = None;

        if matched
            .flags
            .intersects(IoFlags::ONESHOT | IoFlags::REPEAT)
        {
            let full = state
                .io_callbacks
                .events_for(matched.handle, &matched.callback);
            self.remove_stored(state, matched.handle, Some(&matched.callback), full);

            if matched.flags.contains(IoFlags::REPEAT) {
                repeat = Some(RepeatRegistration {
                    conn: matched.connector.downgrade(),
                    events: full,
                    flags: matched.flags,
                });
            }
        }

        ready.push(RunnableEntry {
            callback: matched.callback,
            events: matched.events,
            error: None,
            connector: Some(matched.connector),
            repeat,
        });
    }

    fn process_commands(&self, state: &mut DispatchState, ready: &mut Vec<RunnableEntry>) {
        while let Some(command) = self.commands.pop() {
            match command {
                Command::RegisterIo {
                    conn,
                    events,
                    callback,
                    flags,
                } => {
                    let Some(conn) = conn.upgrade() else {
                        continue;
                    };
                    if let Err(err) = self.apply_register_io(state, &conn, events, &callback, flags)
                    {
                        // Operational failures surface as error callbacks.
                        ready.push(RunnableEntry {
                            callback,
                            events: Events::ERROR,
                            error: Some(err),
                            connector: Some(conn),
                            repeat: None,
                        });
                    }
                }
                Command::UnregisterIo {
                    conn,
                    events,
                    callback,
                } => {
                    let Some(conn) = conn.upgrade() else {
                        continue;
                    };
                    for (handle, mask) in handle_masks(&conn, events) {
                        self.remove_stored(state, handle, callback.as_ref(), mask);
                    }
                    self.release_connector_if_unused(state, &conn);
                }
                Command::UnregisterConnector { conn } => {
                    let Some(conn) = conn.upgrade() else {
                        continue;
                    };
                    let dropped = state.io_callbacks.remove_connector(&conn);
                    for entry in &dropped {
                        let remaining = state.io_callbacks.mask_for(entry.handle);
                        let excess = entry.events - remaining;
                        if !excess.is_empty() {
                            let _ = state.io.unregister_handle(entry.handle, excess);
                        }
                    }
                    self.release_connector_if_unused(state, &conn);
                }
                Command::Schedule(entry) => state.scheduled.add(entry),
                Command::Unschedule(callback) => state.scheduled.remove(&callback),
                Command::RegisterUser { events, callback } => state.user.add(events, callback),
                Command::UnregisterUser { events, callback } => {
                    state.user.remove(events, &callback)
                }
                Command::Trigger(events) => state.triggered.push(events),
                Command::Barrier(signal) => signal.notify(),
            }
        }
    }

    fn apply_register_io(
        &self,
        state: &mut DispatchState,
        conn: &Connector,
        events: Events,
        callback: &Callback,
        flags: IoFlags,
    ) -> Result<()> {
        let masks = handle_masks(conn, events);
        if masks.is_empty() {
            return Err(Error::InvalidValue);
        }

        // Force the connector non-blocking for the registration's
        // lifetime; restored on full unregistration.
        if !state.connector_modes.contains_key(conn) {
            let was_blocking = conn.is_blocking();
            if was_blocking {
                conn.set_blocking(false)?;
            }
            state.connector_modes.insert(conn.clone(), was_blocking);
        }

        for (handle, mask) in masks {
            state.io_callbacks.add(IoEntry {
                connector: conn.clone(),
                handle,
                events: mask,
                callback: callback.clone(),
                flags,
            });
            let aggregate = state.io_callbacks.mask_for(handle);
            state.io.register_handle(handle, aggregate)?;
        }
        Ok(())
    }

    /// Subtracts `events` from matching store entries on `handle` and
    /// narrows the platform registration to what is still wanted.
    fn remove_stored(
        &self,
        state: &mut DispatchState,
        handle: Handle,
        callback: Option<&Callback>,
        events: Events,
    ) {
        let before = state.io_callbacks.mask_for(handle);
        let dropped = state.io_callbacks.remove(handle, callback, events);
        let after = state.io_callbacks.mask_for(handle);

        let excess = before - after;
        if !excess.is_empty() {
            let _ = state.io.unregister_handle(handle, excess);
        }

        for entry in dropped {
            self.release_connector_if_unused(state, &entry.connector);
        }
    }

    fn release_connector_if_unused(&self, state: &mut DispatchState, conn: &Connector) {
        if state.io_callbacks.has_connector(conn) {
            return;
        }
        if let Some(was_blocking) = state.connector_modes.remove(conn) {
            if was_blocking {
                if let Err(err) = conn.set_blocking(true) {
                    warn!("failed to restore blocking mode on {:?}: {}", conn, err);
                }
            }
        }
    }
}

/// Splits an event mask onto a connector's handles: read-side bits go to
/// the read handle, write-side bits to the write handle, error/close/open
/// to both. Connectors with one handle get a single merged entry.
fn handle_masks(conn: &Connector, events: Events) -> Vec<(Handle, Events)> {
    let read_handle = conn.get_read_handle();
    let write_handle = conn.get_write_handle();
    let shared = events & (Events::IO_ERROR | Events::IO_CLOSE | Events::IO_OPEN);

    let mut masks = Vec::with_capacity(2);
    if read_handle.valid() && write_handle == read_handle {
        let mask = events & Events::IO_MASK;
        if !mask.is_empty() {
            masks.push((read_handle, mask));
        }
        return masks;
    }

    if read_handle.valid() {
        let mask = (events & Events::IO_READ) | shared;
        if !mask.is_empty() {
            masks.push((read_handle, mask));
        }
    }
    if write_handle.valid() {
        let mask = (events & Events::IO_WRITE) | shared;
        if !mask.is_empty() {
            masks.push((write_handle, mask));
        }
    }
    masks
}
