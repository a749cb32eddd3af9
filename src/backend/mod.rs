//! Backend adapters (§4.B): translate a handle's interest into the OS
//! wait primitive's own state and back.
//!
//! Per the design notes, this is a tagged-variant sum type rather than
//! function pointers plus `#[cfg]`-gated dispatch: `Backend` wraps
//! exactly the variants compiled in for the target platform, and each
//! variant implements the same four-operation contract (`init`/
//! `apply`/`wait`/`close`). Grounded on the teacher crate's
//! `sys/epoll.rs` for syscall-wrapping style and directly on the
//! original's `set_poll_fds`/`set_epoll_fds`/`set_kqueue_fds`/
//! `fd_poll` for per-variant semantics.

pub mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollBackend;

pub mod poll;
pub use poll::PollBackend;

pub mod select;
pub use select::SelectBackend;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueBackend;

use crate::error::Result;
use crate::handle::Handle;
use crate::interest::Interest;
use crate::registry::{Record, Registry};

/// Which wait primitive is currently driving a reactor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mechanism {
    None,
    Poll,
    Select,
    Epoll,
    Kqueue,
}

impl Mechanism {
    /// Whether this tag is compiled in for the current target.
    pub fn is_supported(self) -> bool {
        match self {
            Mechanism::None => false,
            Mechanism::Poll | Mechanism::Select => true,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Mechanism::Epoll => true,
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            Mechanism::Epoll => false,
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Mechanism::Kqueue => true,
            #[cfg(not(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            )))]
            Mechanism::Kqueue => false,
        }
    }

    /// The best mechanism available at compile time for this target,
    /// preferring the readiness-notification-queue style backends
    /// over the O(n) array/set scans.
    pub fn best() -> Mechanism {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            Mechanism::Epoll
        }
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        {
            Mechanism::Kqueue
        }
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        )))]
        {
            Mechanism::Poll
        }
    }
}

/// One readiness report from a `wait` call. `EPOLL`/`KQUEUE` hand back
/// the record pointer they stashed as kernel user data, skipping the
/// hash lookup `POLL`/`SELECT` still need.
pub enum ReadyRef {
    ByHandle(Handle),
    ByRecord(*const Record),
}

pub struct ReadyEvent {
    pub readiness: Interest,
    pub target: ReadyRef,
}

/// Tagged-variant backend: exactly the mechanisms compiled in for this
/// platform, chosen and swapped at runtime.
pub enum Backend {
    Poll(PollBackend),
    Select(SelectBackend),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Epoll(EpollBackend),
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    Kqueue(KqueueBackend),
}

impl Backend {
    pub fn new(mechanism: Mechanism) -> Result<Backend> {
        Ok(match mechanism {
            Mechanism::Poll => Backend::Poll(PollBackend::new()),
            Mechanism::Select => Backend::Select(SelectBackend::new()),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Mechanism::Epoll => Backend::Epoll(EpollBackend::new()),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Mechanism::Kqueue => Backend::Kqueue(KqueueBackend::new()),
            _ => return Err(crate::error::Error::NotSupported(mechanism)),
        })
    }

    pub fn mechanism(&self) -> Mechanism {
        match self {
            Backend::Poll(_) => Mechanism::Poll,
            Backend::Select(_) => Mechanism::Select,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(_) => Mechanism::Epoll,
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(_) => Mechanism::Kqueue,
        }
    }

    pub fn init(&mut self, max_handles: usize) -> Result<()> {
        match self {
            Backend::Poll(b) => b.init(max_handles),
            Backend::Select(b) => b.init(max_handles),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(b) => b.init(max_handles),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(b) => b.init(max_handles),
        }
    }

    pub fn apply(&mut self, record: &Record) -> Result<()> {
        match self {
            Backend::Poll(b) => b.apply(record),
            Backend::Select(b) => b.apply(record),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(b) => b.apply(record),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(b) => b.apply(record),
        }
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, registry: &Registry) -> Result<Vec<ReadyEvent>> {
        match self {
            Backend::Poll(b) => b.wait(timeout_ms, registry),
            Backend::Select(b) => b.wait(timeout_ms, registry),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(b) => b.wait(timeout_ms, registry),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(b) => b.wait(timeout_ms, registry),
        }
    }

    pub fn close(&mut self) {
        match self {
            Backend::Poll(b) => b.close(),
            Backend::Select(b) => b.close(),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(b) => b.close(),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(b) => b.close(),
        }
    }
}

/// Map OS-reported exceptional conditions (hang-up, invalid, error)
/// onto the unified `EXCEPT` bit; never leaked past the backend
/// boundary as raw OS event constants.
pub(crate) fn except_if(cond: bool) -> Interest {
    if cond {
        Interest::except()
    } else {
        Interest::empty()
    }
}
