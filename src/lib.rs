//! A per-thread asynchronous I/O reactor: a handle-readiness
//! multiplexer that switches between `poll`, `select`, `epoll`, and
//! `kqueue` at runtime, dispatches timers alongside readiness, and
//! defines the thread-affinity and re-entrancy rules for the callbacks
//! it drives.
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::os::unix::io::AsRawFd;
//!
//! use relay_io::{affinity, Handle, Interest};
//!
//! let reactor = affinity::thread_init().unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! let handle = Handle(listener.as_raw_fd());
//!
//! reactor
//!     .register(handle, Interest::readable(), Box::new(move |readiness| {
//!         if readiness.is_readable() {
//!             let _ = listener.accept();
//!         }
//!     }))
//!     .unwrap();
//!
//! reactor.cancel(); // in a real program, run() would block until cancel()
//! reactor.run(None::<fn(i32)>).unwrap();
//! affinity::thread_close();
//! ```

pub mod affinity;
pub mod backend;
pub mod error;
pub mod handle;
pub mod interest;
pub mod lock;
pub mod reactor;
pub mod registry;
pub mod signal;
pub mod timer;

pub use backend::Mechanism;
pub use error::{Error, Result};
pub use handle::{Handle, Index};
pub use interest::Interest;
pub use reactor::{Reactor, ThreadEnterGuard};
pub use registry::Callback;
pub use timer::TimerId;
