//! The active-mutex indirection described in the design notes: "allow
//! a host to coordinate its own locking with the reactor's" by
//! redirecting a pointer to an externally supplied mutex.
//!
//! `std::sync::Mutex` only hands out access through a RAII guard tied
//! to a borrow of the `Mutex<T>` itself, which doesn't compose with
//! "lock it here, unlock it fifty lines later, from a pointer that can
//! be swapped out from under the data it protects". `lock_api::RawMutex`
//! is built for exactly this: a guard-less `lock`/`unlock` pair. We use
//! `parking_lot::RawMutex` as the default implementation and let a host
//! substitute any other `RawLock` by calling [`Reactor::set_mutex`].
//!
//! [`Reactor::set_mutex`]: crate::reactor::Reactor::set_mutex

use lock_api::RawMutex as _;
use std::fmt;
use std::sync::Arc;

/// A guard-less lock: `lock` blocks until acquired, `unlock` releases
/// a lock held by the caller. Implementors must be safe to call from
/// any thread, including recursively-incorrect callers (misuse is a
/// caller bug, not unsound, since the default impl is a real mutex).
pub trait RawLock: Send + Sync {
    fn lock(&self);
    fn unlock(&self);
}

/// The reactor's own lock, used unless a host redirects via `set_mutex`.
pub struct InternalLock(parking_lot::RawMutex);

impl InternalLock {
    pub fn new() -> InternalLock {
        InternalLock(parking_lot::RawMutex::INIT)
    }
}

impl Default for InternalLock {
    fn default() -> InternalLock {
        InternalLock::new()
    }
}

impl RawLock for InternalLock {
    fn lock(&self) {
        self.0.lock();
    }

    fn unlock(&self) {
        unsafe { self.0.unlock() };
    }
}

impl fmt::Debug for InternalLock {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "InternalLock")
    }
}

/// RAII guard over a [`RawLock`], acquired by [`acquire`].
///
/// Holds its own `Arc` clone rather than borrowing the active-lock
/// field, so a concurrent `set_mutex` redirect never has to outlive
/// an in-flight guard: the guard keeps unlocking the lock it actually
/// acquired.
pub struct LockGuard {
    lock: Arc<dyn RawLock>,
}

pub fn acquire(lock: &Arc<dyn RawLock>) -> LockGuard {
    lock.lock();
    LockGuard { lock: lock.clone() }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
