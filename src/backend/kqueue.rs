//! Readiness-queue backend (`KQUEUE`), BSD/macOS family. Grounded on
//! the original's `set_kqueue_fds`: two independent filters per
//! handle, `EVFILT_READ` and `EVFILT_WRITE`. Unlike `EPOLL`'s single
//! combined registration, `apply` always issues a delete for both
//! filters before (re-)adding the ones the new interest wants — kqueue
//! has no `MOD` operation, and this keeps switching race-free at the
//! cost of a pair of redundant deletes on a handle's first
//! registration (silently ignored: `ENOENT` is not an error here).

use std::os::unix::io::RawFd;
use std::ptr;

use crate::backend::{except_if, ReadyEvent, ReadyRef};
use crate::error::{Error, Result};
use crate::interest::Interest;
use crate::registry::{Record, Registry};

pub struct KqueueBackend {
    kqfd: RawFd,
    events: Vec<libc::kevent>,
}

impl KqueueBackend {
    pub fn new() -> KqueueBackend {
        KqueueBackend {
            kqfd: -1,
            events: Vec::new(),
        }
    }

    pub fn init(&mut self, max_handles: usize) -> Result<()> {
        if self.kqfd < 0 {
            let fd = unsafe { libc::kqueue() };
            if fd < 0 {
                return Err(Error::from_errno());
            }
            self.kqfd = fd;
        }
        self.events.resize(max_handles.max(1), empty_kevent());
        Ok(())
    }

    pub fn apply(&mut self, record: &Record) -> Result<()> {
        let udata = record.as_ptr() as *mut libc::c_void;
        let mut changes = [empty_kevent(); 2];

        changes[0] = make_kevent(record.handle.0, libc::EVFILT_READ, libc::EV_DELETE, udata);
        changes[1] = make_kevent(record.handle.0, libc::EVFILT_WRITE, libc::EV_DELETE, udata);
        unsafe {
            libc::kevent(self.kqfd, changes.as_ptr(), 2, ptr::null_mut(), 0, ptr::null());
        }
        // Deletes are best-effort: a handle not previously registered
        // on either filter reports ENOENT, which is not a failure here.

        if record.interest.is_empty() {
            return Ok(());
        }

        let mut adds = Vec::with_capacity(2);
        if record.interest.is_readable() || record.interest.is_except() {
            adds.push(make_kevent(record.handle.0, libc::EVFILT_READ, libc::EV_ADD, udata));
        }
        if record.interest.is_writable() {
            adds.push(make_kevent(record.handle.0, libc::EVFILT_WRITE, libc::EV_ADD, udata));
        }

        if !adds.is_empty() {
            let rc = unsafe {
                libc::kevent(
                    self.kqfd,
                    adds.as_ptr(),
                    adds.len() as libc::c_int,
                    ptr::null_mut(),
                    0,
                    ptr::null(),
                )
            };
            if rc < 0 {
                return Err(Error::from_errno());
            }
        }

        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, _registry: &Registry) -> Result<Vec<ReadyEvent>> {
        let timeout = to_timespec(timeout_ms);
        let timeout_ptr = timeout
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(ptr::null());

        let n = unsafe {
            libc::kevent(
                self.kqfd,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ptr,
            )
        };
        if n < 0 {
            return Err(Error::from_errno());
        }

        let mut out = Vec::with_capacity(n as usize);
        for event in &self.events[..n as usize] {
            let mut readiness = Interest::empty();
            match event.filter {
                libc::EVFILT_READ => readiness |= Interest::readable(),
                libc::EVFILT_WRITE => readiness |= Interest::writable(),
                _ => {}
            }
            readiness |= except_if(event.flags & libc::EV_EOF != 0 || event.flags & libc::EV_ERROR != 0);

            let record = event.udata as *const Record;
            out.push(ReadyEvent {
                readiness,
                target: ReadyRef::ByRecord(record),
            });
        }

        Ok(out)
    }

    pub fn close(&mut self) {
        if self.kqfd >= 0 {
            unsafe { libc::close(self.kqfd) };
            self.kqfd = -1;
        }
        self.events.clear();
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn empty_kevent() -> libc::kevent {
    libc::kevent {
        ident: 0,
        filter: 0,
        flags: 0,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

fn make_kevent(
    fd: RawFd,
    filter: libc::c_short,
    flags: libc::c_ushort,
    udata: *mut libc::c_void,
) -> libc::kevent {
    libc::kevent {
        ident: fd as libc::uintptr_t,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata,
    }
}

fn to_timespec(timeout_ms: Option<u64>) -> Option<libc::timespec> {
    timeout_ms.map(|ms| libc::timespec {
        tv_sec: (ms / 1000) as libc::time_t,
        tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long,
    })
}
