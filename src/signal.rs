//! The signal latch (§4.G): one integer per reactor, written only by
//! the installed signal handler, observed and cleared at the top of
//! every loop iteration.
//!
//! Grounded directly on the original's `signal_handler`:
//! ```c
//! static void signal_handler(int sig) {
//!     struct re *re = re_get();
//!     if (!re) return;
//!     (void)signal(sig, signal_handler);
//!     re->sig = sig;
//! }
//! ```
//! A signal handler must be async-signal-safe, so the Rust handler
//! below performs the same two operations and nothing else: re-arm,
//! then a single relaxed store into a thread-local atomic. No lookup
//! of "the current reactor" happens in signal context — it happens on
//! the reactor thread instead, when the latch is observed.

use std::cell::Cell;
use std::sync::atomic::{AtomicI32, Ordering};

/// Latch written from signal context, read from the reactor loop.
#[derive(Debug, Default)]
pub struct SignalLatch(AtomicI32);

impl SignalLatch {
    pub fn new() -> SignalLatch {
        SignalLatch(AtomicI32::new(0))
    }

    /// Take and clear the latched signal number, if any.
    pub fn take(&self) -> Option<i32> {
        let sig = self.0.swap(0, Ordering::SeqCst);
        if sig == 0 {
            None
        } else {
            Some(sig)
        }
    }

    fn store(&self, sig: i32) {
        self.0.store(sig, Ordering::SeqCst);
    }
}

thread_local! {
    // The latch belonging to whichever reactor last installed signal
    // hooks on this thread. A raw pointer because the handler must
    // not touch anything that could allocate, lock, or panic.
    static ACTIVE_LATCH: Cell<*const SignalLatch> = Cell::new(std::ptr::null());
}

extern "C" fn dispatch(sig: libc::c_int) {
    unsafe {
        libc::signal(sig, dispatch as libc::sighandler_t);
    }

    ACTIVE_LATCH.with(|cell| {
        let ptr = cell.get();
        if !ptr.is_null() {
            // Safety: the pointer is only ever set to `&SignalLatch`
            // owned by the reactor that is currently running on this
            // thread, and cleared before that reactor can be dropped
            // (see `uninstall`).
            unsafe { (*ptr).store(sig) };
        }
    });
}

const HANDLED_SIGNALS: &[libc::c_int] = &[libc::SIGINT, libc::SIGALRM, libc::SIGTERM];

/// Install handlers for SIGINT/SIGALRM/SIGTERM that funnel into
/// `latch`. Must be called from the thread that will run the reactor
/// loop, since the latch pointer is stashed thread-locally.
pub fn install(latch: &SignalLatch) {
    ACTIVE_LATCH.with(|cell| cell.set(latch as *const SignalLatch));
    for &sig in HANDLED_SIGNALS {
        unsafe {
            libc::signal(sig, dispatch as libc::sighandler_t);
        }
    }
}

/// Clear the thread-local pointer so a dropped reactor never leaves a
/// dangling latch behind for the next signal.
pub fn uninstall() {
    ACTIVE_LATCH.with(|cell| cell.set(std::ptr::null()));
}
