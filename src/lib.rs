//! Connector abstraction and event scheduling for heterogeneous I/O.
//!
//! Junction unifies TCP and UDP sockets, Unix domain sockets, FIFOs and
//! anonymous pipes (plus user-registered endpoint types) behind one
//! socket-like value type, the [`Connector`], selected by URL scheme. On
//! top of that sits the [`Scheduler`]: a single I/O dispatch loop that
//! multiplexes readiness events, timed events and user-defined events onto
//! a pool of worker threads, or onto a loop the caller drives.
//!
//! # Connectors
//!
//! ```no_run
//! use junction::{Api, Connector};
//!
//! # fn main() -> junction::Result<()> {
//! let api = Api::new()?;
//!
//! let server = Connector::new(&api, "tcp://127.0.0.1:0")?;
//! server.listen()?;
//!
//! let client = Connector::new(&api, &format!("tcp://{}", server.socket_address()))?;
//! client.connect()?;
//! # Ok(())
//! # }
//! ```
//!
//! Built-in schemes: `tcp4`, `tcp6`, `tcp`, `udp4`, `udp6`, `udp`,
//! `local`, `pipe`, `fifo` and `anon`. Query parameters tune behaviour,
//! e.g. `tcp://127.0.0.1:80?blocking=true` or
//! `local:///tmp/s?behaviour=datagram`. New schemes and parameters are
//! registered through [`Api::add_scheme`] and [`Api::add_parameter`].
//!
//! # Scheduling
//!
//! ```no_run
//! use std::time::Duration;
//! use junction::{Api, Callback, Events, Scheduler};
//!
//! # fn main() -> junction::Result<()> {
//! let api = Api::new()?;
//! let scheduler = Scheduler::new(&api, 4)?;
//!
//! let callback = Callback::closure(|_now, events, _error, _conn| {
//!     println!("fired for {:?}", events);
//!     Ok(())
//! });
//! scheduler.schedule_once(Duration::from_millis(50), &callback)?;
//! # Ok(())
//! # }
//! ```
//!
//! Callbacks are first-class comparable values (see [`Callback`]), which
//! is what makes unregistration work without handles or ids.

#![warn(missing_debug_implementations)]

#[cfg(not(unix))]
compile_error!("junction currently supports POSIX platforms only");

#[macro_use]
mod macros;

mod api;
mod callback;
mod error;
mod events;
mod handle;
mod scheduler;
mod sys;

pub mod connector;
pub mod net;
pub mod registry;
pub mod resolver;
pub mod util;

pub use api::Api;
pub use callback::{BoundFn, Callback, FreeFn};
pub use connector::{Connector, ConnectorOptions, ConnectorType, PeerAddress};
pub use error::{Error, Result};
pub use events::{Events, IoFlags};
pub use handle::Handle;
pub use scheduler::{IoType, Scheduler};
