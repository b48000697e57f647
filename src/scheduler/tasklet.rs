use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::warn;

/// A notification target multiple tasklets can share.
///
/// Unlike a bare condition variable this counts pending notifications, so a
/// `notify_one` issued while no tasklet is waiting is consumed by the next
/// `sleep` instead of being lost.
pub(crate) struct Condition {
    pending: Mutex<usize>,
    cond: Condvar,
}

impl Condition {
    pub(crate) fn new() -> Condition {
        Condition {
            pending: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn notify_one(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending += 1;
            self.cond.notify_one();
        }
    }

    pub(crate) fn notify_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = pending.saturating_add(1);
            self.cond.notify_all();
        }
    }

    fn sleep(&self, timeout: Duration) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        if *pending == 0 {
            let Ok((guard, _)) = self.cond.wait_timeout(pending, timeout) else {
                return;
            };
            pending = guard;
        }
        *pending = pending.saturating_sub(1);
    }
}

/// Handed to a tasklet body; wraps the running flag and shared condition.
pub(crate) struct TaskletContext {
    running: Arc<AtomicBool>,
    condition: Arc<Condition>,
}

impl TaskletContext {
    /// Sleeps until notified or `timeout` elapsed. Returns true while the
    /// tasklet should keep running, so a body reads as
    /// `while ctx.sleep(..) { work() }`.
    pub(crate) fn sleep(&self, timeout: Duration) -> bool {
        if !self.alive() {
            return false;
        }
        self.condition.sleep(timeout);
        self.alive()
    }

    pub(crate) fn alive(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A worker thread that spends its life sleeping on a shared condition,
/// waking to do work, and going back to sleep.
pub(crate) struct Tasklet {
    running: Arc<AtomicBool>,
    condition: Arc<Condition>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Tasklet {
    /// Spawns the tasklet; `body` receives a [`TaskletContext`] and is
    /// expected to loop on [`TaskletContext::sleep`].
    pub(crate) fn spawn<F>(name: String, condition: Arc<Condition>, body: F) -> Tasklet
    where
        F: FnOnce(TaskletContext) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let context = TaskletContext {
            running: Arc::clone(&running),
            condition: Arc::clone(&condition),
        };

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(context));

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("failed to spawn tasklet {}: {}", name, err);
                running.store(false, Ordering::Release);
                None
            }
        };

        Tasklet {
            running,
            condition,
            thread,
        }
    }

    /// Tells the tasklet to stop and wakes every sleeper on the shared
    /// condition; tasklets sharing it simply go back to sleep.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.condition.notify_all();
    }

    /// Waits for the thread to exit.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Tasklet {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tasklet_runs_until_stopped() {
        let condition = Arc::new(Condition::new());
        let wakeups = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&wakeups);

        let mut tasklet = Tasklet::spawn(
            "test-tasklet".into(),
            Arc::clone(&condition),
            move |ctx| {
                while ctx.sleep(Duration::from_millis(10)) {
                    counted.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        condition.notify_one();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while wakeups.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(wakeups.load(Ordering::SeqCst) > 0);

        tasklet.stop();
        tasklet.join();
    }

    #[test]
    fn notification_before_sleep_is_not_lost() {
        let condition = Condition::new();
        condition.notify_one();

        let start = std::time::Instant::now();
        condition.sleep(Duration::from_secs(1));
        // Consumed the pending notification instead of waiting.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn stop_wakes_sleeper() {
        let condition = Arc::new(Condition::new());
        let mut tasklet = Tasklet::spawn(
            "sleeper".into(),
            Arc::clone(&condition),
            move |ctx| while ctx.sleep(Duration::from_secs(60)) {},
        );

        let start = std::time::Instant::now();
        tasklet.stop();
        tasklet.join();
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
