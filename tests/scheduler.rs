use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::RngCore;

use junction::{Callback, Connector, Error, Events, IoFlags, Scheduler};

mod util;

use util::{api, retry, Recorder};

const E1: Events = Events::USER;

fn e2() -> Events {
    Events::from_bits_retain(Events::USER.bits() << 1)
}

fn e3() -> Events {
    Events::from_bits_retain(Events::USER.bits() << 2)
}

fn pump(scheduler: &Scheduler, total: Duration) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        let _ = scheduler.process_events(Duration::from_millis(10), false, false);
    }
}

/// Polls until `predicate` holds; panics after `total`.
fn wait_for(total: Duration, what: &str, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + total;
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn anon_pipe_echo() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler
        .register_connector(Events::IO_READ, &conn, &callback)
        .unwrap();

    // Nothing to read: the callback must not fire.
    let result = scheduler.process_events(Duration::from_millis(50), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(recorder.count(), 0);

    conn.write(b"hi").unwrap();

    scheduler
        .process_events(Duration::from_millis(500), false, false)
        .unwrap();
    assert!(recorder.count() >= 1);
    assert!(recorder.last_mask().unwrap().contains(Events::IO_READ));

    let mut buf = [0u8; 8];
    let amount = conn.read(&mut buf).unwrap();
    assert_eq!(&buf[..amount], b"hi");
}

#[test]
fn scheduled_callback_with_count() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler
        .schedule(
            Instant::now(),
            Duration::from_millis(20),
            3,
            &callback,
        )
        .unwrap();

    for _ in 0..3 {
        scheduler
            .process_events(Duration::from_millis(50), false, false)
            .unwrap();
    }
    assert_eq!(recorder.count(), 3);
    assert_eq!(recorder.last_mask(), Some(Events::TIMEOUT));

    // The count is exhausted; the fourth call has nothing to dispatch.
    let result = scheduler.process_events(Duration::from_millis(50), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(recorder.count(), 3);
}

#[test]
fn schedule_once_and_at() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (once_cb, once) = Recorder::new();
    let (at_cb, at) = Recorder::new();

    scheduler
        .schedule_once(Duration::from_millis(5), &once_cb)
        .unwrap();
    scheduler
        .schedule_at(Instant::now() + Duration::from_millis(5), &at_cb)
        .unwrap();

    pump(&scheduler, Duration::from_millis(100));
    assert_eq!(once.count(), 1);
    assert_eq!(at.count(), 1);
}

#[test]
fn unschedule_stops_repeating_callback() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler
        .schedule(
            Instant::now(),
            Duration::from_millis(10),
            -1,
            &callback,
        )
        .unwrap();

    pump(&scheduler, Duration::from_millis(60));
    let fired = recorder.count();
    assert!(fired >= 2, "expected repeated firing, got {fired}");

    scheduler.unschedule(&callback).unwrap();
    scheduler.commit_callbacks().unwrap();

    let settled = recorder.count();
    let result = scheduler.process_events(Duration::from_millis(50), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(recorder.count(), settled);
}

#[test]
fn user_defined_events() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (cb_a, a) = Recorder::new();
    let (cb_b, b) = Recorder::new();

    scheduler.register_event(E1 | e2() | e3(), &cb_a).unwrap();
    scheduler.register_event(e2() | e3(), &cb_b).unwrap();

    scheduler.fire_events(E1).unwrap();
    scheduler
        .process_events(Duration::from_millis(100), false, false)
        .unwrap();
    assert_eq!(a.count(), 1);
    assert_eq!(a.last_mask(), Some(E1));
    assert_eq!(b.count(), 0);

    scheduler.fire_events(e2() | e3()).unwrap();
    scheduler
        .process_events(Duration::from_millis(100), false, false)
        .unwrap();
    assert_eq!(a.count(), 2);
    assert_eq!(a.last_mask(), Some(e2() | e3()));
    assert_eq!(b.count(), 1);
    assert_eq!(b.last_mask(), Some(e2() | e3()));

    scheduler.unregister_event(e2(), &cb_a).unwrap();
    scheduler.fire_events(e2()).unwrap();
    scheduler
        .process_events(Duration::from_millis(100), false, false)
        .unwrap();
    assert_eq!(a.count(), 2);
    assert_eq!(b.count(), 2);
}

#[test]
fn firing_system_events_is_rejected() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler.register_event(E1, &callback).unwrap();

    assert_eq!(scheduler.fire_events(Events::IO_READ), Err(Error::InvalidValue));
    assert_eq!(
        scheduler.fire_events(E1 | Events::IO_READ),
        Err(Error::InvalidValue)
    );
    assert_eq!(scheduler.fire_events(Events::empty()), Err(Error::InvalidValue));

    let result = scheduler.process_events(Duration::from_millis(30), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(recorder.count(), 0);
}

#[test]
fn registering_system_masks_as_user_events_is_rejected() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (callback, _recorder) = Recorder::new();
    assert_eq!(
        scheduler.register_event(Events::TIMEOUT, &callback),
        Err(Error::InvalidValue)
    );
    assert_eq!(
        scheduler.register_event(Events::empty(), &callback),
        Err(Error::InvalidValue)
    );
}

#[test]
fn empty_callbacks_are_rejected() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();
    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    let empty = Callback::empty();
    assert_eq!(
        scheduler.register_connector(Events::IO_READ, &conn, &empty),
        Err(Error::EmptyCallback)
    );
    assert_eq!(
        scheduler.schedule_once(Duration::ZERO, &empty),
        Err(Error::EmptyCallback)
    );
    assert_eq!(scheduler.register_event(E1, &empty), Err(Error::EmptyCallback));
    assert_eq!(scheduler.unschedule(&empty), Err(Error::EmptyCallback));
}

#[test]
fn accept_and_echo_over_tcp() {
    let api = api();
    let scheduler = Arc::new(Scheduler::new(&api, 0).unwrap());

    let server = Connector::new(&api, "tcp://127.0.0.1:0").unwrap();
    server.listen().unwrap();

    // The accept callback registers a stream echo callback for every
    // accepted connector.
    let accepted = Arc::new(Mutex::new(Vec::<Connector>::new()));

    let echo_cb = Callback::closure(|_, events, _, conn| {
        let Some(conn) = conn else { return Ok(()) };
        if events.contains(Events::IO_READ) {
            let mut buf = [0u8; 256];
            if let Ok(amount) = conn.read(&mut buf) {
                if amount > 0 {
                    conn.write(&buf[..amount])?;
                }
            }
        }
        Ok(())
    });

    let accept_scheduler = Arc::clone(&scheduler);
    let accept_echo = echo_cb.clone();
    let accept_log = Arc::clone(&accepted);
    let accept_cb = Callback::closure(move |_, _, _, conn| {
        let Some(listener) = conn else { return Ok(()) };
        let peer = listener.accept()?;
        accept_scheduler.register_connector(Events::IO_READ, &peer, &accept_echo)?;
        accept_log.lock().unwrap().push(peer);
        Ok(())
    });

    scheduler
        .register_connector(Events::IO_READ, &server, &accept_cb)
        .unwrap();

    let client = util::connect_client(&api, &server);

    let mut payload = [0u8; 32];
    rand::rng().fill_bytes(&mut payload);
    client.write(&payload).unwrap();

    let mut echoed = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while echoed.len() < payload.len() && Instant::now() < deadline {
        let _ = scheduler.process_events(Duration::from_millis(10), false, false);
        let mut buf = [0u8; 256];
        if let Ok(amount) = client.read(&mut buf) {
            echoed.extend_from_slice(&buf[..amount]);
        }
    }
    assert_eq!(&echoed[..], &payload[..]);

    // Unregister everything so the callback -> scheduler references are
    // dropped again.
    scheduler.unregister_connector_all(&server).unwrap();
    for peer in accepted.lock().unwrap().iter() {
        scheduler.unregister_connector_all(peer).unwrap();
    }
    scheduler.commit_callbacks().unwrap();
}

#[test]
fn worker_parallelism() {
    let api = api();
    let scheduler = Scheduler::new(&api, 2).unwrap();
    assert_eq!(scheduler.num_workers(), 2);

    let done = Arc::new(AtomicUsize::new(0));
    let make_sleeper = || {
        let counted = Arc::clone(&done);
        Callback::closure(move |_, _, _, _| {
            std::thread::sleep(Duration::from_millis(100));
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let (cb_1, cb_2) = (make_sleeper(), make_sleeper());

    let start = Instant::now();
    scheduler.schedule_at(start, &cb_1).unwrap();
    scheduler.schedule_at(start, &cb_2).unwrap();

    wait_for(Duration::from_secs(3), "both sleepers", || {
        done.load(Ordering::SeqCst) == 2
    });

    // Run sequentially this would take at least 200ms.
    let elapsed = start.elapsed();
    assert!(
        elapsed < Duration::from_millis(190),
        "callbacks did not run in parallel: {elapsed:?}"
    );
}

#[test]
fn process_events_requires_inline_mode() {
    let api = api();
    let scheduler = Scheduler::new(&api, 1).unwrap();
    assert_eq!(
        scheduler.process_events(Duration::from_millis(10), false, false),
        Err(Error::UnsupportedAction)
    );
}

#[test]
fn commit_callbacks_is_a_barrier() {
    let api = api();
    let scheduler = Scheduler::new(&api, 2).unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler.register_event(E1, &callback).unwrap();

    // After the commit returns, the registration must be in effect for
    // the very next fire.
    scheduler.commit_callbacks().unwrap();
    scheduler.fire_events(E1).unwrap();

    wait_for(Duration::from_secs(2), "user event callback", || {
        recorder.count() == 1
    });
}

#[test]
fn switching_worker_modes() {
    let api = api();
    let scheduler = Scheduler::new(&api, 2).unwrap();

    scheduler.set_num_workers(0).unwrap();
    assert_eq!(scheduler.num_workers(), 0);

    // Inline mode works now.
    let result = scheduler.process_events(Duration::from_millis(10), false, false);
    assert_eq!(result, Err(Error::Timeout));

    scheduler.set_num_workers(3).unwrap();
    assert_eq!(scheduler.num_workers(), 3);

    let (callback, recorder) = Recorder::new();
    scheduler.schedule_once(Duration::ZERO, &callback).unwrap();
    wait_for(Duration::from_secs(2), "scheduled callback", || {
        recorder.count() == 1
    });
}

#[test]
fn registration_forces_non_blocking_and_restores() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let conn = Connector::new(&api, "anon://?blocking=true").unwrap();
    conn.listen().unwrap();
    assert!(conn.is_blocking());

    let (callback, _recorder) = Recorder::new();
    scheduler
        .register_connector(Events::IO_READ, &conn, &callback)
        .unwrap();
    scheduler.commit_callbacks().unwrap();
    assert!(!conn.is_blocking());

    scheduler
        .unregister_connector(Events::IO_READ, &conn, &callback)
        .unwrap();
    scheduler.commit_callbacks().unwrap();
    assert!(conn.is_blocking());
}

#[test]
fn originally_non_blocking_stays_non_blocking() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();
    assert!(!conn.is_blocking());

    let (callback, _recorder) = Recorder::new();
    scheduler
        .register_connector(Events::IO_READ, &conn, &callback)
        .unwrap();
    scheduler.commit_callbacks().unwrap();
    scheduler
        .unregister_connector(Events::IO_READ, &conn, &callback)
        .unwrap();
    scheduler.commit_callbacks().unwrap();
    assert!(!conn.is_blocking());
}

#[test]
fn oneshot_fires_once() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler
        .register_connector_flags(Events::IO_READ, &conn, &callback, IoFlags::ONESHOT)
        .unwrap();

    conn.write(b"a").unwrap();
    scheduler
        .process_events(Duration::from_millis(500), false, false)
        .unwrap();
    assert_eq!(recorder.count(), 1);

    // Still readable, but the registration is gone.
    let result = scheduler.process_events(Duration::from_millis(50), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(recorder.count(), 1);
}

#[test]
fn repeat_re_registers_on_repeat_action() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&hits);
    let callback = Callback::closure(move |_, _, _, conn| {
        counted.fetch_add(1, Ordering::SeqCst);
        if let Some(conn) = conn {
            let mut buf = [0u8; 8];
            let _ = conn.read(&mut buf);
        }
        // Ask to be re-registered.
        Err(Error::RepeatAction)
    });

    scheduler
        .register_connector_flags(Events::IO_READ, &conn, &callback, IoFlags::REPEAT)
        .unwrap();

    conn.write(b"a").unwrap();
    scheduler
        .process_events(Duration::from_millis(500), false, false)
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    conn.write(b"b").unwrap();
    scheduler
        .process_events(Duration::from_millis(500), false, false)
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn exit_on_failure_stops_dispatching() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (failing, failed) = Recorder::with_result(Err(Error::Unexpected));
    let (succeeding, succeeded) = Recorder::new();

    // Equal deadlines fire in insertion order.
    let now = Instant::now();
    scheduler.schedule_at(now, &failing).unwrap();
    scheduler.schedule_at(now, &succeeding).unwrap();

    let result = scheduler.process_events(Duration::from_millis(100), false, true);
    assert_eq!(result, Err(Error::Unexpected));
    assert_eq!(failed.count(), 1);
    assert_eq!(succeeded.count(), 0);
}

#[test]
fn all_callbacks_run_without_exit_on_failure() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (failing, failed) = Recorder::with_result(Err(Error::Unexpected));
    let (succeeding, succeeded) = Recorder::new();

    let now = Instant::now();
    scheduler.schedule_at(now, &failing).unwrap();
    scheduler.schedule_at(now, &succeeding).unwrap();

    let result = scheduler.process_events(Duration::from_millis(100), false, false);
    assert_eq!(result, Err(Error::Unexpected));
    assert_eq!(failed.count(), 1);
    assert_eq!(succeeded.count(), 1);
}

#[test]
fn soft_timeout_waits_for_next_deadline() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let (callback, recorder) = Recorder::new();
    scheduler
        .schedule_once(Duration::from_millis(60), &callback)
        .unwrap();
    // Apply the command so the deadline is known to the loop.
    scheduler.commit_callbacks().unwrap();

    // A hard 10ms timeout returns before the deadline...
    let result = scheduler.process_events(Duration::from_millis(10), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(recorder.count(), 0);

    // ...while a soft one may extend past it to the deadline.
    scheduler
        .process_events(Duration::from_millis(10), true, false)
        .unwrap();
    assert_eq!(recorder.count(), 1);
}

#[test]
fn unregister_during_callback_is_safe() {
    let api = api();
    let scheduler = Arc::new(Scheduler::new(&api, 0).unwrap());

    let conn = Connector::new(&api, "anon://").unwrap();
    conn.listen().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&hits);
    let unregister_with = Arc::clone(&scheduler);
    let conn_for_cb = conn.clone();
    let callback_slot: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&callback_slot);

    let callback = Callback::closure(move |_, _, _, _| {
        counted.fetch_add(1, Ordering::SeqCst);
        let mut buf = [0u8; 8];
        let _ = conn_for_cb.read(&mut buf);
        if let Some(me) = slot.lock().unwrap().as_ref() {
            unregister_with.unregister_connector(Events::IO_READ, &conn_for_cb, me)?;
        }
        Ok(())
    });
    *callback_slot.lock().unwrap() = Some(callback.clone());

    scheduler
        .register_connector(Events::IO_READ, &conn, &callback)
        .unwrap();

    conn.write(b"x").unwrap();
    scheduler
        .process_events(Duration::from_millis(500), false, false)
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The removal took effect; new data no longer fires the callback.
    conn.write(b"y").unwrap();
    let result = scheduler.process_events(Duration::from_millis(50), false, false);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Break the callback -> scheduler cycle.
    *callback_slot.lock().unwrap() = None;
    scheduler.unregister_connector_all(&conn).unwrap();
    scheduler.commit_callbacks().unwrap();
}

#[test]
fn scheduled_error_does_not_stop_worker_mode() {
    let api = api();
    let scheduler = Scheduler::new(&api, 1).unwrap();

    let (failing, failed) = Recorder::with_result(Err(Error::Unexpected));
    let (fine, fine_rec) = Recorder::new();

    scheduler.schedule_once(Duration::ZERO, &failing).unwrap();
    scheduler
        .schedule_once(Duration::from_millis(5), &fine)
        .unwrap();

    // Workers swallow callback errors and keep going.
    wait_for(Duration::from_secs(2), "both callbacks", || {
        failed.count() == 1 && fine_rec.count() == 1
    });
}

#[test]
fn datagram_registration_with_scheduler() {
    let api = api();
    let scheduler = Scheduler::new(&api, 0).unwrap();

    let server = Connector::new(&api, "udp://127.0.0.1:0").unwrap();
    server.listen().unwrap();
    let addr = server.socket_address();

    let (callback, recorder) = Recorder::new();
    scheduler
        .register_connector(Events::IO_READ, &server, &callback)
        .unwrap();

    let client = Connector::new(&api, &format!("udp://{addr}")).unwrap();
    client.connect().unwrap();
    client.write(b"dgram").unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.count() == 0 && Instant::now() < deadline {
        let _ = scheduler.process_events(Duration::from_millis(10), false, false);
    }
    assert!(recorder.count() >= 1);

    let mut buf = [0u8; 16];
    let (amount, _) = retry(Duration::from_secs(1), || server.receive(&mut buf)).unwrap();
    assert_eq!(&buf[..amount], b"dgram");
}
