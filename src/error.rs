use std::io;

/// The crate's error taxonomy (see the error-kinds table in the design
/// notes). Kept stable across platforms and across which backend is
/// active, so callers can match on a kind instead of an `io::ErrorKind`
/// that varies by selector.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad argument, missing reactor for the calling thread, or the
    /// sentinel "no handle" value.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    /// Allocation failed while growing backend-owned state.
    #[error("out of memory")]
    NoMemory,

    /// The registry (or the selected backend) cannot accept another
    /// handle at its configured capacity.
    #[error("too many registered handles (limit {limit})")]
    TooMany { limit: usize },

    /// The requested mechanism isn't compiled in, or isn't compatible
    /// with the current registry size.
    #[error("polling mechanism not supported: {0:?}")]
    NotSupported(crate::backend::Mechanism),

    /// A foreign thread called a reactor operation without holding
    /// `thread_enter`.
    #[error("permission denied: call thread_enter() first")]
    Permission,

    /// A lifecycle call that must only happen once was made twice
    /// (e.g. `thread_init` on a thread that already has a reactor).
    #[error("already initialized")]
    Already,

    /// The backend reported that a handle is gone.
    #[error("bad handle")]
    BadHandle,

    /// The wait primitive was interrupted by a signal.
    #[error("interrupted")]
    Intr,

    /// Any syscall failure that doesn't map onto one of the named
    /// kinds above is carried through losslessly.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Reinterpret the last OS error as one of our kinds, falling back
    /// to wrapping it verbatim. Used right after a `wait` syscall
    /// returns a negative count.
    pub fn from_errno() -> Error {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => Error::Intr,
            Some(libc::EBADF) => Error::BadHandle,
            _ => Error::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
