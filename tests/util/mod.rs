// Not all helpers are used by all test binaries.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use junction::{Api, Callback, Connector, Error, Events};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub fn api() -> Arc<Api> {
    init();
    Api::new().expect("unable to create api instance")
}

/// A callback that counts invocations and records the event masks it was
/// invoked with.
pub struct Recorder {
    pub hits: Arc<AtomicUsize>,
    pub masks: Arc<Mutex<Vec<Events>>>,
}

impl Recorder {
    pub fn new() -> (Callback, Recorder) {
        Self::with_result(Ok(()))
    }

    /// Like [`Recorder::new`], with a fixed result the callback returns.
    pub fn with_result(result: Result<(), Error>) -> (Callback, Recorder) {
        let hits = Arc::new(AtomicUsize::new(0));
        let masks = Arc::new(Mutex::new(Vec::new()));

        let counted = Arc::clone(&hits);
        let recorded = Arc::clone(&masks);
        let callback = Callback::closure(move |_now, events, _error, _conn| {
            counted.fetch_add(1, Ordering::SeqCst);
            recorded.lock().unwrap().push(events);
            result
        });

        (callback, Recorder { hits, masks })
    }

    pub fn count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_mask(&self) -> Option<Events> {
        self.masks.lock().unwrap().last().copied()
    }
}

/// Spins on `op` until it stops returning `RepeatAction`/`Async`, up to
/// `timeout`. Non-blocking connector calls need this in tests.
pub fn retry<T>(
    timeout: Duration,
    mut op: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let deadline = Instant::now() + timeout;
    loop {
        match op() {
            Err(Error::RepeatAction) | Err(Error::Async) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            other => return other,
        }
    }
}

/// A unique temporary path for local sockets and FIFOs.
pub fn temp_path(tag: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "junction-test-{}-{}-{}",
        std::process::id(),
        tag,
        seq
    ))
}

/// Connects a client to a listening stream connector, completing the
/// non-blocking handshake.
pub fn connect_client(api: &Api, server: &Connector) -> Connector {
    let url = format!("tcp://{}", server.socket_address());
    let client = Connector::new(api, &url).expect("unable to create client connector");
    retry(Duration::from_secs(2), || client.connect()).expect("client failed to connect");
    client
}
