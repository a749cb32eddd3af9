//! Exercises the reactor's public surface from outside the crate, in
//! the same "spin up real fds, drive the loop, assert on side effects"
//! style as the teacher crate's own `test/custom_event.rs`: plain
//! `#[test]` functions, no test framework, `std::thread`/`Arc`/atomics
//! for cross-thread coordination.

use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use relay_io::{Handle, Interest, Mechanism, Reactor};

/// A callback that deregisters its own handle and cancels the loop
/// must not deadlock: dispatch holds the active lock, and
/// `deregister`/`cancel` are called from inside it.
#[test]
fn self_removal_during_dispatch() {
    let reactor = Reactor::new();
    let (a, b) = UnixStream::pair().unwrap();
    b.write_all(b"x").unwrap();
    let fd = a.as_raw_fd();

    let reactor_for_cb = reactor.clone();
    reactor
        .register(
            Handle(fd),
            Interest::readable(),
            Box::new(move |_| {
                reactor_for_cb.deregister(Handle(fd)).unwrap();
                reactor_for_cb.cancel();
            }),
        )
        .unwrap();

    assert_eq!(reactor.nfds(), 1);
    reactor.run(None::<fn(i32)>).unwrap();
    assert_eq!(reactor.nfds(), 0);

    drop(a);
    drop(b);
}

/// A callback that switches the active mechanism mid-batch must not
/// deadlock either (`set_mechanism` also acquires the active lock),
/// and the loop must keep dispatching under the new backend.
#[test]
fn mechanism_switch_under_load() {
    let reactor = Reactor::new();
    const N: usize = 8;

    let mut streams = Vec::with_capacity(N);
    for _ in 0..N {
        let (a, b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        streams.push((a, b));
    }

    let switched = Arc::new(AtomicBool::new(false));
    let fired = Arc::new(AtomicUsize::new(0));

    for (a, _b) in &streams {
        let fd = a.as_raw_fd();
        let switched = switched.clone();
        let fired = fired.clone();
        let reactor_for_switch = reactor.clone();
        reactor
            .register(
                Handle(fd),
                Interest::readable(),
                Box::new(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    if !switched.swap(true, Ordering::SeqCst) {
                        let target = if reactor_for_switch.get_mechanism() == Mechanism::Poll {
                            Mechanism::Select
                        } else {
                            Mechanism::Poll
                        };
                        reactor_for_switch.set_mechanism(target).unwrap();
                    }
                }),
            )
            .unwrap();
    }

    let reactor_for_cancel = reactor.clone();
    reactor.schedule_timer(Duration::from_millis(200), move || {
        reactor_for_cancel.cancel();
    });

    reactor.run(None::<fn(i32)>).unwrap();

    assert!(fired.load(Ordering::SeqCst) >= 1);
    assert!(switched.load(Ordering::SeqCst));
}

/// Readiness for the current batch dispatches before the loop services
/// timers that came due in the same iteration (§4.D step order: drain
/// the deferred list, *then* poll timers, only after every ready entry
/// in the batch has been dispatched).
#[test]
fn readiness_dispatches_before_same_iteration_timers() {
    let reactor = Reactor::new();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (a, b) = UnixStream::pair().unwrap();
    b.write_all(b"x").unwrap();
    let fd = a.as_raw_fd();

    let order_io = order.clone();
    reactor
        .register(
            Handle(fd),
            Interest::readable(),
            Box::new(move |_| {
                order_io.lock().unwrap().push("io");
            }),
        )
        .unwrap();

    let order_timer = order.clone();
    let reactor_for_cancel = reactor.clone();
    reactor.schedule_timer(Duration::from_millis(0), move || {
        order_timer.lock().unwrap().push("timer");
        reactor_for_cancel.cancel();
    });

    reactor.run(None::<fn(i32)>).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["io", "timer"]);

    drop(a);
    drop(b);
}

/// A foreign thread may register a handle under `thread_enter`; the
/// owning thread then drives the loop and dispatches it normally.
#[test]
fn foreign_thread_registration_via_thread_enter() {
    let reactor = Reactor::new();
    let (a, b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    let fired = Arc::new(AtomicBool::new(false));
    let fired_in_cb = fired.clone();
    let reactor_for_cancel = reactor.clone();

    let reactor_foreign = reactor.clone();
    let foreign = thread::spawn(move || {
        let guard = reactor_foreign.clone().thread_enter();
        reactor_foreign
            .register(
                Handle(fd),
                Interest::readable(),
                Box::new(move |_| {
                    fired_in_cb.store(true, Ordering::SeqCst);
                    reactor_for_cancel.cancel();
                }),
            )
            .unwrap();
        drop(guard);
    });
    foreign.join().unwrap();

    b.write_all(b"x").unwrap();
    reactor.run(None::<fn(i32)>).unwrap();

    assert!(fired.load(Ordering::SeqCst));

    drop(a);
    drop(b);
}

/// A signal handled through the latch reaches the callback passed to
/// `run`, delivered specifically to the reactor's owning OS thread
/// (not just "some thread in the process").
#[test]
fn signal_latch_delivers_to_owning_thread() {
    let received = Arc::new(AtomicI32::new(0));
    let received_in_cb = received.clone();
    let (tid_tx, tid_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let reactor = Reactor::new();
        tid_tx.send(unsafe { libc::pthread_self() }).unwrap();

        let reactor_for_cancel = reactor.clone();
        // Keep the loop cycling so it reaches the top and observes the
        // latch even on platforms where the interrupted wait syscall
        // auto-restarts instead of returning INTR.
        for i in 1..=50u64 {
            reactor.schedule_timer(Duration::from_millis(i * 10), || {});
        }

        reactor
            .run(Some(move |sig: i32| {
                received_in_cb.store(sig, Ordering::SeqCst);
                reactor_for_cancel.cancel();
            }))
            .unwrap();
    });

    let tid = tid_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    unsafe {
        libc::pthread_kill(tid, libc::SIGALRM);
    }

    handle.join().unwrap();
    assert_eq!(received.load(Ordering::SeqCst), libc::SIGALRM);
}

/// `cancel` is cooperative: the loop notices it at the top of the next
/// iteration and `run` returns cleanly, no matter what triggered it.
#[test]
fn cancel_stops_the_loop() {
    let reactor = Reactor::new();
    let reactor_for_cancel = reactor.clone();
    reactor.schedule_timer(Duration::from_millis(5), move || {
        reactor_for_cancel.cancel();
    });
    reactor.run(None::<fn(i32)>).unwrap();
}

/// The crate hosts arbitrary file-descriptor-bearing collaborators; a
/// plain `std::net::TcpListener` stands in for the out-of-scope
/// SIP/TLS collaborators mentioned only as context.
#[test]
fn hosts_a_plain_tcp_listener() {
    use std::net::{TcpListener, TcpStream};

    let reactor = Reactor::new();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let fd = listener.as_raw_fd();

    let accepted = Arc::new(AtomicBool::new(false));
    let accepted_in_cb = accepted.clone();
    let reactor_for_cancel = reactor.clone();

    reactor
        .register(
            Handle(fd),
            Interest::readable(),
            Box::new(move |readiness| {
                if readiness.is_readable() {
                    if listener.accept().is_ok() {
                        accepted_in_cb.store(true, Ordering::SeqCst);
                    }
                    reactor_for_cancel.cancel();
                }
            }),
        )
        .unwrap();

    let _client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let _ = TcpStream::connect(addr);
    });

    reactor.run(None::<fn(i32)>).unwrap();
    assert!(accepted.load(Ordering::SeqCst));
}
