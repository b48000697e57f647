use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::callback::Callback;

/// One scheduled registration.
///
/// `count` follows the scheduling rules: zero means one-shot, negative
/// repeats until unscheduled, positive gives the exact number of
/// invocations left.
#[derive(Clone)]
pub(crate) struct ScheduledEntry {
    pub(crate) deadline: Instant,
    pub(crate) interval: Duration,
    pub(crate) count: i64,
    pub(crate) callback: Callback,
}

/// The scheduled callback store: an ordered multimap from deadline to
/// entry. A monotonic sequence number breaks ties so entries with equal
/// deadlines fire in insertion order. Only the dispatch thread touches
/// this.
#[derive(Default)]
pub(crate) struct ScheduledCallbacks {
    map: BTreeMap<(Instant, u64), ScheduledEntry>,
    seq: u64,
}

impl ScheduledCallbacks {
    pub(crate) fn add(&mut self, entry: ScheduledEntry) {
        // The same callback may be scheduled for several deadlines, and
        // several callbacks for the same deadline; no deduplication.
        let key = (entry.deadline, self.seq);
        self.seq += 1;
        self.map.insert(key, entry);
    }

    /// Removes every entry holding `callback`, regardless of deadline.
    pub(crate) fn remove(&mut self, callback: &Callback) {
        self.map.retain(|_, entry| entry.callback != *callback);
    }

    /// The earliest deadline currently stored.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.map.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Extracts all entries whose deadline is at or before `now`, in
    /// deadline-then-insertion order.
    pub(crate) fn take_timed_out(&mut self, now: Instant) -> Vec<ScheduledEntry> {
        let mut timed_out = Vec::new();
        while let Some(key) = self.map.keys().next().copied() {
            if key.0 > now {
                break;
            }
            if let Some(entry) = self.map.remove(&key) {
                timed_out.push(entry);
            }
        }
        timed_out
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
