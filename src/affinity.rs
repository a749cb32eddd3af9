//! The thread-affinity layer (§4.E): a per-thread reactor slot plus a
//! process-wide fallback, both initialized exactly once. Grounded on
//! the original's `re_thread_init`/`re_thread_close`/`re_thread_attach`/
//! `re_thread_detach` quartet and on `tss_create`'s once-only semantics,
//! translated to `std::thread_local!` plus `std::sync::OnceLock`.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Error, Result};
use crate::reactor::Reactor;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Reactor>>> = const { RefCell::new(None) };
}

// The first reactor created on any thread is published here and stays
// the fallback until the owning thread calls `thread_close`.
static FALLBACK: OnceLock<RwLock<Option<Arc<Reactor>>>> = OnceLock::new();

fn fallback_slot() -> &'static RwLock<Option<Arc<Reactor>>> {
    FALLBACK.get_or_init(|| RwLock::new(None))
}

/// Create a reactor for the calling thread. Fails with `ALREADY` if one
/// already exists here. The first reactor created process-wide becomes
/// the global fallback.
pub fn thread_init() -> Result<Arc<Reactor>> {
    CURRENT.with(|cell| {
        if cell.borrow().is_some() {
            return Err(Error::Already);
        }

        let reactor = Reactor::new();
        *cell.borrow_mut() = Some(reactor.clone());

        let fallback = fallback_slot();
        let mut slot = fallback.write().expect("fallback lock poisoned");
        if slot.is_none() {
            *slot = Some(reactor.clone());
        }

        Ok(reactor)
    })
}

/// Destroy the calling thread's reactor, clearing the fallback slot if
/// it pointed here.
pub fn thread_close() {
    CURRENT.with(|cell| {
        let reactor = cell.borrow_mut().take();
        if let Some(reactor) = reactor {
            let fallback = fallback_slot();
            let mut slot = fallback.write().expect("fallback lock poisoned");
            if matches!(slot.as_ref(), Some(current) if Arc::ptr_eq(current, &reactor)) {
                *slot = None;
            }
        }
    });
}

/// Bind the calling thread to a reactor created elsewhere. A no-op if
/// the same reactor is already bound.
pub fn thread_attach(existing: Arc<Reactor>) {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if matches!(slot.as_ref(), Some(current) if Arc::ptr_eq(current, &existing)) {
            return;
        }
        *slot = Some(existing);
    });
}

/// Clear the calling thread's slot without destroying the reactor.
pub fn thread_detach() {
    CURRENT.with(|cell| {
        cell.borrow_mut().take();
    });
}

/// The reactor that public operations on this thread resolve to: the
/// thread-local reactor if one is bound, otherwise the process-wide
/// fallback.
pub fn current() -> Result<Arc<Reactor>> {
    if let Some(reactor) = CURRENT.with(|cell| cell.borrow().clone()) {
        return Ok(reactor);
    }

    let fallback = fallback_slot();
    fallback
        .read()
        .expect("fallback lock poisoned")
        .clone()
        .ok_or(Error::Invalid("no reactor for this thread and no fallback published"))
}
