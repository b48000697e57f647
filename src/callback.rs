use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use crate::connector::Connector;
use crate::error::{Error, Result};
use crate::events::Events;

/// The signature every callback is invoked with: the time the triggering
/// dispatch observed, the mask of events the callback fired for, an error
/// raised by the scheduler (if any), and the connector the events occurred
/// on (for I/O callbacks).
pub type FreeFn = fn(Instant, Events, Option<Error>, Option<&Connector>) -> Result<()>;

/// A plain method taking a shared receiver, usable with [`Callback::bound`].
pub type BoundFn<T> = fn(&T, Instant, Events, Option<Error>, Option<&Connector>) -> Result<()>;

type DynFn = dyn Fn(Instant, Events, Option<Error>, Option<&Connector>) -> Result<()> + Send + Sync;

/// A first-class callable that is comparable and hashable, so it can serve
/// as a key for unregistration.
///
/// Three forms exist:
///
/// - **free function**: two callbacks made from the same function compare
///   equal;
/// - **bound**: a shared object plus a method pointer; two callbacks made
///   from the same object instance and the same method compare equal, while
///   different instances compare unequal even for the same method;
/// - **closure**: equality is identity of the constructed callback — clones
///   of one `Callback` compare equal, but two callbacks built from copies of
///   the same closure need not.
///
/// The default-constructed callback is empty; invoking it fails with
/// [`Error::EmptyCallback`].
#[derive(Clone, Default)]
pub struct Callback {
    repr: Option<Repr>,
}

#[derive(Clone)]
enum Repr {
    Free(FreeFn),
    Bound {
        // (object address, method address); keeps the receiver alive through
        // the invoke closure below.
        identity: (usize, usize),
        invoke: Arc<DynFn>,
    },
    Closure(Arc<DynFn>),
}

impl Callback {
    /// Returns the empty callback.
    pub fn empty() -> Callback {
        Callback { repr: None }
    }

    /// Wraps a free function.
    pub fn from_fn(f: FreeFn) -> Callback {
        Callback {
            repr: Some(Repr::Free(f)),
        }
    }

    /// Binds a method to a shared object. The object is kept alive for as
    /// long as any clone of the callback exists.
    pub fn bound<T>(object: &Arc<T>, method: BoundFn<T>) -> Callback
    where
        T: Send + Sync + 'static,
    {
        let identity = (Arc::as_ptr(object) as usize, method as usize);
        let object = Arc::clone(object);
        Callback {
            repr: Some(Repr::Bound {
                identity,
                invoke: Arc::new(move |now, events, error, conn| {
                    method(&object, now, events, error, conn)
                }),
            }),
        }
    }

    /// Binds a method to a copy of `object`. The copy is owned by the
    /// callback; callbacks bound to separate copies compare unequal.
    pub fn bound_value<T>(object: T, method: BoundFn<T>) -> Callback
    where
        T: Send + Sync + 'static,
    {
        Callback::bound(&Arc::new(object), method)
    }

    /// Wraps an arbitrary callable.
    pub fn closure<F>(f: F) -> Callback
    where
        F: Fn(Instant, Events, Option<Error>, Option<&Connector>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Callback {
            repr: Some(Repr::Closure(Arc::new(f))),
        }
    }

    /// True iff no callable is held.
    pub fn is_empty(&self) -> bool {
        self.repr.is_none()
    }

    /// Invokes the callable. Fails with [`Error::EmptyCallback`] if the
    /// callback is empty.
    pub fn invoke(
        &self,
        now: Instant,
        events: Events,
        error: Option<Error>,
        conn: Option<&Connector>,
    ) -> Result<()> {
        match &self.repr {
            None => Err(Error::EmptyCallback),
            Some(Repr::Free(f)) => f(now, events, error, conn),
            Some(Repr::Bound { invoke, .. }) => invoke(now, events, error, conn),
            Some(Repr::Closure(f)) => f(now, events, error, conn),
        }
    }

    fn identity(&self) -> (u8, usize, usize) {
        match &self.repr {
            None => (0, 0, 0),
            Some(Repr::Free(f)) => (1, *f as usize, 0),
            Some(Repr::Bound { identity, .. }) => (2, identity.0, identity.1),
            Some(Repr::Closure(f)) => (3, Arc::as_ptr(f) as *const () as usize, 0),
        }
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Callback) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Callback {}

impl Hash for Callback {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tag, a, b) = self.identity();
        let kind = match tag {
            0 => "empty",
            1 => "free",
            2 => "bound",
            _ => "closure",
        };
        write!(f, "Callback({kind}: {a:#x}/{b:#x})")
    }
}
