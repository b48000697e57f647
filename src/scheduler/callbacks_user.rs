use std::collections::HashMap;

use crate::callback::Callback;
use crate::events::Events;

/// One user-event registration produced by
/// [`copy_matching`](UserCallbacks::copy_matching), with the mask narrowed
/// to the fired bits.
#[derive(Clone)]
pub(crate) struct UserEntry {
    pub(crate) events: Events,
    pub(crate) callback: Callback,
}

/// The user-defined event store.
///
/// Each callback carries one aggregate mask; adding ORs bits in, removing
/// subtracts them and forgets the callback once no bits remain. Only the
/// dispatch thread touches this.
#[derive(Default)]
pub(crate) struct UserCallbacks {
    map: HashMap<Callback, Events>,
}

impl UserCallbacks {
    pub(crate) fn add(&mut self, events: Events, callback: Callback) {
        *self.map.entry(callback).or_insert(Events::empty()) |= events;
    }

    pub(crate) fn remove(&mut self, events: Events, callback: &Callback) {
        if let Some(mask) = self.map.get_mut(callback) {
            *mask -= events;
            if mask.is_empty() {
                self.map.remove(callback);
            }
        }
    }

    /// Clones every registration interested in any bit of `fired`, with
    /// masks narrowed to the intersection.
    pub(crate) fn copy_matching(&self, fired: Events) -> Vec<UserEntry> {
        self.map
            .iter()
            .filter_map(|(callback, mask)| {
                let masked = *mask & fired;
                if masked.is_empty() {
                    None
                } else {
                    Some(UserEntry {
                        events: masked,
                        callback: callback.clone(),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn callback() -> Callback {
        let state = Arc::new(AtomicUsize::new(0));
        Callback::closure(move |_, _, _, _| {
            state.load(std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
    }

    const E1: Events = Events::USER;

    fn e2() -> Events {
        Events::from_bits_retain(Events::USER.bits() << 1)
    }

    fn e3() -> Events {
        Events::from_bits_retain(Events::USER.bits() << 2)
    }

    #[test]
    fn add_merges_remove_subtracts() {
        let mut store = UserCallbacks::default();
        let cb = callback();

        store.add(E1, cb.clone());
        store.add(e2(), cb.clone());

        let matched = store.copy_matching(E1 | e2() | e3());
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].events, E1 | e2());

        store.remove(E1, &cb);
        let matched = store.copy_matching(E1);
        assert!(matched.is_empty());
        let matched = store.copy_matching(e2());
        assert_eq!(matched.len(), 1);

        store.remove(e2(), &cb);
        assert!(store.copy_matching(E1 | e2()).is_empty());
    }

    #[test]
    fn copy_matching_narrows_to_fired_bits() {
        let mut store = UserCallbacks::default();
        let (a, b) = (callback(), callback());

        store.add(E1 | e2() | e3(), a.clone());
        store.add(e2() | e3(), b.clone());

        let matched = store.copy_matching(E1);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].callback, a);
        assert_eq!(matched[0].events, E1);

        let matched = store.copy_matching(e2() | e3());
        assert_eq!(matched.len(), 2);
        for entry in matched {
            assert_eq!(entry.events, e2() | e3());
        }
    }
}
