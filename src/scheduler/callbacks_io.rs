use std::collections::HashMap;

use crate::callback::Callback;
use crate::connector::Connector;
use crate::events::{Events, IoFlags};
use crate::handle::Handle;

/// One I/O registration: a callback listening for `events` on `handle`,
/// which belongs to `connector`.
#[derive(Clone)]
pub(crate) struct IoEntry {
    pub(crate) connector: Connector,
    pub(crate) handle: Handle,
    pub(crate) events: Events,
    pub(crate) callback: Callback,
    pub(crate) flags: IoFlags,
}

/// The I/O callback store: a multimap from handle to registrations.
///
/// Adding an entry for a (handle, callback) pair already present merges the
/// event masks; removing subtracts mask bits and drops the entry once its
/// mask is empty. Only the dispatch thread touches this.
#[derive(Default)]
pub(crate) struct IoCallbacks {
    map: HashMap<Handle, Vec<IoEntry>>,
}

impl IoCallbacks {
    pub(crate) fn add(&mut self, entry: IoEntry) {
        let entries = self.map.entry(entry.handle).or_default();
        for existing in entries.iter_mut() {
            if existing.callback == entry.callback {
                existing.events |= entry.events;
                existing.flags = entry.flags;
                return;
            }
        }
        entries.push(entry);
    }

    /// Subtracts `events` from entries on `handle`; `callback` narrows the
    /// removal to one callback, `None` hits all of them. Entries whose mask
    /// drains to empty are dropped and returned so the caller can release
    /// per-connector bookkeeping.
    pub(crate) fn remove(
        &mut self,
        handle: Handle,
        callback: Option<&Callback>,
        events: Events,
    ) -> Vec<IoEntry> {
        let mut dropped = Vec::new();
        let Some(entries) = self.map.get_mut(&handle) else {
            return dropped;
        };

        entries.retain_mut(|entry| {
            if callback.map(|cb| *cb != entry.callback).unwrap_or(false) {
                return true;
            }
            entry.events -= events;
            if entry.events.is_empty() {
                dropped.push(entry.clone());
                false
            } else {
                true
            }
        });

        if entries.is_empty() {
            self.map.remove(&handle);
        }
        dropped
    }

    /// Removes every entry whose connector equals `connector`, across all
    /// handles.
    pub(crate) fn remove_connector(&mut self, connector: &Connector) -> Vec<IoEntry> {
        let mut dropped = Vec::new();
        self.map.retain(|_, entries| {
            entries.retain_mut(|entry| {
                if entry.connector == *connector {
                    dropped.push(entry.clone());
                    false
                } else {
                    true
                }
            });
            !entries.is_empty()
        });
        dropped
    }

    /// The full stored mask of a (handle, callback) entry.
    pub(crate) fn events_for(&self, handle: Handle, callback: &Callback) -> Events {
        self.map
            .get(&handle)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|entry| entry.callback == *callback)
                    .map(|entry| entry.events)
            })
            .unwrap_or_default()
    }

    /// True iff any entry references `connector`.
    pub(crate) fn has_connector(&self, connector: &Connector) -> bool {
        self.map
            .values()
            .any(|entries| entries.iter().any(|entry| entry.connector == *connector))
    }

    /// The union of event masks registered for a handle.
    pub(crate) fn mask_for(&self, handle: Handle) -> Events {
        self.map
            .get(&handle)
            .map(|entries| {
                entries
                    .iter()
                    .fold(Events::empty(), |mask, entry| mask | entry.events)
            })
            .unwrap_or_default()
    }

    /// Clones every entry interested in any bit of `fired` on `handle`,
    /// narrowing each clone's mask to the intersection.
    pub(crate) fn copy_matching(&self, handle: Handle, fired: Events) -> Vec<IoEntry> {
        let Some(entries) = self.map.get(&handle) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let masked = entry.events & fired;
                if masked.is_empty() {
                    None
                } else {
                    let mut copy = entry.clone();
                    copy.events = masked;
                    Some(copy)
                }
            })
            .collect()
    }
}
