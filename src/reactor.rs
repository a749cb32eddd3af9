//! The reactor loop (§4.D) and lifecycle (§4.H): the type that owns a
//! registry, a backend, a timer list, and the locking/signal state tying
//! them together. Grounded directly on the original's `struct re` and
//! its `re_alloc`/`fd_poll`/`re_main`/`re_cancel` functions.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use log::{trace, warn};
use parking_lot::RwLock;

use crate::backend::{Backend, Mechanism, ReadyRef};
use crate::error::{Error, Result};
use crate::handle::{Handle, Index};
use crate::interest::Interest;
use crate::lock::{self, InternalLock, RawLock};
use crate::registry::{Callback, Record, Registry};
use crate::signal::{self, SignalLatch};
use crate::timer::TimerList;

/// A callback wall-clock runtime past this bound is logged as slow,
/// mirroring the original's own 500ms instrumentation bound.
const SLOW_CALLBACK_MS: u128 = 500;

const DEFAULT_MAX_HANDLES: usize = 1024;

thread_local! {
    // Reactors (identified by address) whose active lock this thread
    // currently holds. The original relies on its mutex being
    // recursive so that a callback running under `re_main`'s held lock
    // can call back into `fd_listen` without deadlocking; `RawLock` has
    // no notion of recursion, so the reactor tracks it itself, scoped
    // per calling thread.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// A lock token returned by [`Reactor::acquire`]. The outermost token
/// for a given reactor on a given thread actually holds the active
/// lock; any nested token acquired while dispatch (or another guarded
/// call) is already on this thread's stack is a no-op that only pops
/// its own marker on drop.
struct Guard {
    key: usize,
    inner: Option<lock::LockGuard>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut stack = held.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|&k| k == self.key) {
                stack.remove(pos);
            }
        });
        // `self.inner`, if present, drops here and releases the real lock.
    }
}

/// State guarded by the active lock: everything `thread_enter` lets a
/// foreign thread touch, and everything the owning thread touches
/// outside of the blocking `wait` call.
struct Inner {
    registry: Registry,
    backend: Backend,
    mechanism: Mechanism,
    timers: TimerList,
    max_handles: usize,
    max_fd: RawFd,
    backend_ready: bool,
}

/// A per-thread I/O reactor. Cheap to share: created once per owning
/// thread (or attached from elsewhere) and held behind an `Arc` by the
/// thread-affinity layer.
pub struct Reactor {
    inner: std::cell::UnsafeCell<Inner>,
    active_lock: RwLock<Arc<dyn RawLock>>,
    internal_lock: Arc<dyn RawLock>,
    polling: AtomicBool,
    update: AtomicBool,
    in_dispatch: AtomicBool,
    thread_enter: AtomicBool,
    reuse: AtomicBool,
    signal_latch: SignalLatch,
    owner: ThreadId,
}

// Safety: all mutable access to `inner` happens only while the active
// lock (internal or externally redirected) is held; the lock, not the
// borrow checker, is what serializes it.
unsafe impl Send for Reactor {}
unsafe impl Sync for Reactor {}

impl Reactor {
    /// Allocate a new reactor for the calling thread. Mirrors the
    /// original's `re_alloc`: zero the state, wire the mutex to itself,
    /// record the owning thread, leave the backend uninitialized until
    /// the first `run`/`register`.
    pub fn new() -> Arc<Reactor> {
        let internal_lock: Arc<dyn RawLock> = Arc::new(InternalLock::new());
        Arc::new(Reactor {
            inner: std::cell::UnsafeCell::new(Inner {
                registry: Registry::new(DEFAULT_MAX_HANDLES, true),
                backend: Backend::new(Mechanism::Poll).expect("POLL is always available"),
                mechanism: Mechanism::None,
                timers: TimerList::new(),
                max_handles: DEFAULT_MAX_HANDLES,
                max_fd: 0,
                backend_ready: false,
            }),
            active_lock: RwLock::new(internal_lock.clone()),
            internal_lock,
            polling: AtomicBool::new(false),
            update: AtomicBool::new(false),
            in_dispatch: AtomicBool::new(false),
            thread_enter: AtomicBool::new(false),
            reuse: AtomicBool::new(true),
            signal_latch: SignalLatch::new(),
            owner: std::thread::current().id(),
        })
    }

    /// Acquire the active lock, or re-enter it if this thread already
    /// holds it further up its own call stack (e.g. a callback running
    /// under `run`'s dispatch calling `register`/`deregister`). See
    /// `HELD` above for why this tracking exists.
    fn acquire(&self) -> Guard {
        let key = self as *const Reactor as usize;
        let already_held = HELD.with(|held| held.borrow().contains(&key));
        let inner = if already_held {
            None
        } else {
            let active = self.active_lock.read().clone();
            Some(lock::acquire(&active))
        };
        HELD.with(|held| held.borrow_mut().push(key));
        Guard { key, inner }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn inner_mut(&self) -> &mut Inner {
        &mut *self.inner.get()
    }

    /// §4.F: `PERMISSION` unless called from the owning thread or from
    /// within a `thread_enter` window.
    pub fn thread_check(&self) -> Result<()> {
        if std::thread::current().id() == self.owner || self.thread_enter.load(Ordering::Acquire) {
            Ok(())
        } else {
            warn!(
                "reactor operation attempted without thread_enter(); backtrace:\n{}",
                std::backtrace::Backtrace::capture()
            );
            Err(Error::Permission)
        }
    }

    /// §4.F: acquire the active mutex from a foreign thread, marking
    /// the window so `thread_check` permits operations and so the
    /// record-reuse optimization is disabled for the rest of this
    /// reactor's life (irreversible, matching `re_thread_enter`).
    ///
    /// Returns an RAII guard: dropping it (or calling [`Reactor::thread_leave`]
    /// explicitly, for parity with the distilled API) ends the window.
    /// Takes `Arc<Reactor>` by value since the guard must outlive any
    /// borrow of the caller's own reference; clone before calling.
    pub fn thread_enter(self: Arc<Self>) -> ThreadEnterGuard {
        let guard = self.acquire();
        self.thread_enter.store(true, Ordering::SeqCst);
        self.reuse.store(false, Ordering::SeqCst);
        unsafe { self.inner_mut() }.registry.set_reuse(false);
        ThreadEnterGuard {
            reactor: self,
            _lock: guard,
        }
    }

    /// §4.F: leave the `thread_enter` window early, without waiting for
    /// the guard to drop. Idempotent.
    pub fn thread_leave(&self) {
        self.thread_enter.store(false, Ordering::SeqCst);
    }

    /// §4.F: redirect the active mutex pointer to a caller-supplied
    /// lock, or back to the reactor's own internal lock when `None`.
    pub fn set_mutex(&self, external: Option<Arc<dyn RawLock>>) {
        let mut active = self.active_lock.write();
        *active = external.unwrap_or_else(|| self.internal_lock.clone());
    }

    pub fn set_reuse_policy(&self, reuse: bool) {
        let _guard = self.acquire();
        self.reuse.store(reuse, Ordering::SeqCst);
        unsafe { self.inner_mut() }.registry.set_reuse(reuse);
    }

    pub fn set_max_handles(&self, n: usize) -> Result<()> {
        let _guard = self.acquire();
        let inner = unsafe { self.inner_mut() };
        inner.max_handles = n;
        inner.registry.set_max_handles(n);
        if inner.backend_ready {
            inner.backend.init(n)?;
        }
        Ok(())
    }

    /// `setsize(-1)` queries `RLIMIT_NOFILE`; `setsize(0)` tears down
    /// backend state without destroying the reactor.
    pub fn setsize(&self, n: i64) -> Result<()> {
        if n < 0 {
            let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
            let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
            if rc < 0 {
                return Err(Error::from_errno());
            }
            return self.set_max_handles(limit.rlim_cur as usize);
        }
        if n == 0 {
            let _guard = self.acquire();
            unsafe { self.inner_mut() }.backend.close();
            unsafe { self.inner_mut() }.backend_ready = false;
            return Ok(());
        }
        self.set_max_handles(n as usize)
    }

    pub fn get_mechanism(&self) -> Mechanism {
        let _guard = self.acquire();
        unsafe { self.inner_mut() }.mechanism
    }

    /// §4.B "switching mechanisms at runtime": validate, re-`init`,
    /// re-`apply` every active record, set `update` so the loop returns
    /// from dispatch at a safe point.
    pub fn set_mechanism(&self, mechanism: Mechanism) -> Result<()> {
        if !mechanism.is_supported() {
            return Err(Error::NotSupported(mechanism));
        }

        let _guard = self.acquire();
        let inner = unsafe { self.inner_mut() };

        if inner.mechanism == mechanism && inner.backend_ready {
            return Ok(());
        }

        if mechanism == Mechanism::Select && inner.max_handles > libc::FD_SETSIZE {
            return Err(Error::NotSupported(mechanism));
        }

        let mut backend = Backend::new(mechanism)?;
        backend.init(inner.max_handles)?;
        for record in inner.registry.iter_active() {
            backend.apply(record)?;
        }

        inner.backend.close();
        inner.backend = backend;
        inner.mechanism = mechanism;
        inner.backend_ready = true;
        self.update.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn nfds(&self) -> usize {
        let _guard = self.acquire();
        unsafe { self.inner_mut() }.registry.nfds()
    }

    pub fn count_active_handles(&self) -> usize {
        self.nfds()
    }

    /// §4.A: the single register/deregister entry point. Empty
    /// `interest` deregisters via [`Reactor::deregister`] instead.
    pub fn register(&self, handle: Handle, interest: Interest, callback: Callback) -> Result<Index> {
        self.thread_check()?;
        let guard = self.acquire();
        let inner = unsafe { self.inner_mut() };

        if !inner.backend_ready {
            let mechanism = if inner.mechanism == Mechanism::None {
                Mechanism::best()
            } else {
                inner.mechanism
            };
            drop(guard);
            self.set_mechanism(mechanism)?;
            return self.register(handle, interest, callback);
        }

        inner.max_fd = inner.max_fd.max(handle.0);
        let in_dispatch = self.in_dispatch.load(Ordering::Acquire);
        let index = match inner
            .registry
            .set_interest(handle, interest, Some(callback), in_dispatch)
        {
            Ok(index) => index,
            Err(err) => {
                // Mirrors the original's `fd_listen`: every failure
                // path, including the over-limit check, falls through
                // to closing the handle on the caller's behalf.
                unsafe { libc::close(handle.0) };
                return Err(err);
            }
        };

        if !interest.is_empty() {
            // The record just inserted/updated by `set_interest` is
            // individually boxed and stays put at this address for as
            // long as it's registered; `EPOLL`/`KQUEUE` stash that
            // address as kernel user data, so `apply` must see the
            // real boxed record, never a stack-local copy that goes
            // out of scope the moment this function returns.
            let record = inner.registry.get(handle).expect("just inserted by set_interest");
            if let Err(err) = inner.backend.apply(record) {
                let _ = inner
                    .registry
                    .set_interest(handle, Interest::empty(), None, in_dispatch);
                unsafe { libc::close(handle.0) };
                return Err(err);
            }
        }

        Ok(index)
    }

    /// §4.A: deregister by looking up the record's existing index
    /// first (needed by `POLL` to clear the right array slot), then
    /// clearing interest in the backend before mutating the registry.
    pub fn deregister(&self, handle: Handle) -> Result<()> {
        self.thread_check()?;
        let _guard = self.acquire();
        let inner = unsafe { self.inner_mut() };

        if let Some(record) = inner.registry.get(handle) {
            let probe = Record {
                handle,
                interest: Interest::empty(),
                index: record.index,
                callback: None,
            };
            inner.backend.apply(&probe)?;
        }

        let in_dispatch = self.in_dispatch.load(Ordering::Acquire);
        inner.registry.set_interest(handle, Interest::empty(), None, in_dispatch)?;
        Ok(())
    }

    /// Schedule `callback` to run once, `delay` from now, on this
    /// reactor's thread during a future `run` iteration.
    pub fn schedule_timer<F>(&self, delay: Duration, callback: F) -> crate::timer::TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let _guard = self.acquire();
        unsafe { self.inner_mut() }.timers.schedule(delay, callback)
    }

    pub fn cancel_timer(&self, id: crate::timer::TimerId) -> bool {
        let _guard = self.acquire();
        unsafe { self.inner_mut() }.timers.cancel(id)
    }

    /// §4.D step 7 equivalent entry: `cancel` just clears `polling`;
    /// the loop observes it at the top of its next iteration.
    pub fn cancel(&self) {
        self.polling.store(false, Ordering::SeqCst);
    }

    /// Dump a one-line-per-handle debug snapshot through `printer`,
    /// mirroring the original's `fd_debug`.
    pub fn debug_dump(&self, mut printer: impl FnMut(&str)) {
        let _guard = self.acquire();
        let inner = unsafe { self.inner_mut() };
        printer(&format!(
            "reactor: mechanism={:?} nfds={} max_handles={} polling={}",
            inner.mechanism,
            inner.registry.nfds(),
            inner.max_handles,
            self.polling.load(Ordering::Acquire),
        ));
        for record in inner.registry.iter_active() {
            printer(&format!(
                "  handle={} interest={:?} index={}",
                record.handle.0,
                record.interest,
                record.index.0
            ));
        }
    }

    /// §4.D: the reactor's main loop.
    pub fn run(&self, signal_callback: Option<impl Fn(i32)>) -> Result<()> {
        self.thread_check()?;

        if let Some(_) = signal_callback.as_ref() {
            signal::install(&self.signal_latch);
        }

        {
            let _guard = self.acquire();
            let inner = unsafe { self.inner_mut() };
            if !inner.backend_ready {
                let mechanism = if inner.mechanism == Mechanism::None {
                    Mechanism::best()
                } else {
                    inner.mechanism
                };
                drop(_guard);
                self.set_mechanism(mechanism)?;
            }
        }

        self.polling.store(true, Ordering::SeqCst);
        let mut guard = self.acquire();

        let result = loop {
            if let Some(sig) = self.signal_latch.take() {
                if let Some(cb) = signal_callback.as_ref() {
                    cb(sig);
                }
            }

            if !self.polling.load(Ordering::Acquire) {
                break Ok(());
            }

            let inner = unsafe { self.inner_mut() };
            let to = inner.timers.next_timeout_ms();

            drop(guard);
            let waited = {
                let Inner { backend, registry, .. } = inner;
                backend.wait(to, &*registry)
            };
            guard = self.acquire();

            let ready = match waited {
                Ok(ready) => ready,
                Err(Error::Intr) => continue,
                Err(Error::BadHandle) => continue,
                Err(err) => break Err(err),
            };

            self.update.store(false, Ordering::SeqCst);
            self.in_dispatch.store(true, Ordering::SeqCst);

            for event in ready {
                if self.update.load(Ordering::Acquire) {
                    break;
                }

                let inner = unsafe { self.inner_mut() };
                let started = Instant::now();
                let handled = match event.target {
                    ReadyRef::ByHandle(handle) => {
                        if let Some(record) = inner.registry.get_mut(handle) {
                            invoke(record, event.readiness)
                        } else {
                            None
                        }
                    }
                    ReadyRef::ByRecord(ptr) => {
                        // Safety: the pointer was handed back by a
                        // backend that stashed it as kernel user data;
                        // the record it points to is boxed individually
                        // and stays alive until deregistered.
                        trace!("dispatching by record pointer {:?}", ptr);
                        let record = unsafe { &mut *(ptr as *mut Record) };
                        invoke(record, event.readiness)
                    }
                };

                if let Some(handle) = handled {
                    let elapsed = started.elapsed();
                    if elapsed.as_millis() > SLOW_CALLBACK_MS {
                        warn!(
                            "callback for handle {} ran for {}ms (limit {}ms)",
                            handle,
                            elapsed.as_millis(),
                            SLOW_CALLBACK_MS
                        );
                    }
                }
            }

            self.in_dispatch.store(false, Ordering::SeqCst);

            let inner = unsafe { self.inner_mut() };
            inner.registry.drain_deferred();
            inner.timers.poll();
        };

        self.polling.store(false, Ordering::SeqCst);
        drop(guard);

        if signal_callback.is_some() {
            signal::uninstall();
        }

        result
    }
}

/// RAII handle for a `thread_enter` window: releases the active lock
/// and clears the `thread_enter` flag on drop.
pub struct ThreadEnterGuard {
    reactor: Arc<Reactor>,
    _lock: Guard,
}

impl Drop for ThreadEnterGuard {
    fn drop(&mut self) {
        self.reactor.thread_leave();
    }
}

/// Invoke a record's callback if it is still present and active,
/// returning the handle for slow-callback accounting.
fn invoke(record: &mut Record, readiness: Interest) -> Option<RawFd> {
    if record.index.is_none() {
        return None;
    }
    let handle = record.handle.0;
    if let Some(callback) = record.callback.as_mut() {
        callback(readiness);
    }
    Some(handle)
}
