//! Set-based readiness (`SELECT`). Grounded on the original's
//! `METHOD_SELECT` arm of `fd_poll`: three fd sets rebuilt from the
//! registry on every wait, scanned up to `max_fd + 1`. Limited to
//! `FD_SETSIZE` handles, which this backend refuses to exceed.

use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

use crate::backend::{except_if, ReadyEvent, ReadyRef};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::interest::Interest;
use crate::registry::Record;
use crate::registry::Registry;

const FD_SETSIZE: usize = libc::FD_SETSIZE;

fn fd_zero(set: &mut libc::fd_set) {
    unsafe { libc::FD_ZERO(set) };
}

fn fd_set(fd: RawFd, set: &mut libc::fd_set) {
    unsafe { libc::FD_SET(fd, set) };
}

fn fd_isset(fd: RawFd, set: &libc::fd_set) -> bool {
    unsafe { libc::FD_ISSET(fd, set) }
}

pub struct SelectBackend {
    max_handles: usize,
}

impl SelectBackend {
    pub fn new() -> SelectBackend {
        SelectBackend { max_handles: 0 }
    }

    pub fn init(&mut self, max_handles: usize) -> Result<()> {
        self.max_handles = max_handles.min(FD_SETSIZE);
        Ok(())
    }

    pub fn apply(&mut self, record: &Record) -> Result<()> {
        if record.interest.is_empty() {
            return Ok(());
        }

        let limit = self.max_handles.min(FD_SETSIZE);
        if record.handle.0 as usize >= limit {
            return Err(Error::TooMany { limit });
        }

        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, registry: &Registry) -> Result<Vec<ReadyEvent>> {
        let mut rfds = unsafe { MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
        let mut wfds = unsafe { MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
        let mut efds = unsafe { MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
        fd_zero(&mut rfds);
        fd_zero(&mut wfds);
        fd_zero(&mut efds);

        let mut max_fd = 0;
        for record in registry.iter_active() {
            if record.interest.is_readable() {
                fd_set(record.handle.0, &mut rfds);
            }
            if record.interest.is_writable() {
                fd_set(record.handle.0, &mut wfds);
            }
            if record.interest.is_except() {
                fd_set(record.handle.0, &mut efds);
            }
            max_fd = max_fd.max(record.handle.0);
        }

        let mut tv = to_timeval(timeout_ms);
        let tv_ptr = if timeout_ms.is_some() {
            &mut tv as *mut libc::timeval
        } else {
            std::ptr::null_mut()
        };

        let n = unsafe {
            libc::select(
                max_fd + 1,
                &mut rfds,
                &mut wfds,
                &mut efds,
                tv_ptr,
            )
        };
        if n < 0 {
            return Err(Error::from_errno());
        }

        let mut out = Vec::with_capacity(n.max(0) as usize);
        for record in registry.iter_active() {
            let fd = record.handle.0;
            let mut readiness = Interest::empty();
            if fd_isset(fd, &rfds) {
                readiness |= Interest::readable();
            }
            if fd_isset(fd, &wfds) {
                readiness |= Interest::writable();
            }
            readiness |= except_if(fd_isset(fd, &efds));

            if !readiness.is_empty() {
                out.push(ReadyEvent {
                    readiness,
                    target: ReadyRef::ByHandle(Handle(fd)),
                });
            }
        }

        Ok(out)
    }

    pub fn close(&mut self) {}
}

fn to_timeval(timeout_ms: Option<u64>) -> libc::timeval {
    match timeout_ms {
        None => libc::timeval { tv_sec: 0, tv_usec: 0 },
        Some(ms) => libc::timeval {
            tv_sec: (ms / 1000) as libc::time_t,
            tv_usec: ((ms % 1000) * 1000) as libc::suseconds_t,
        },
    }
}
