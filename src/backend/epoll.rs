//! Readiness-queue backend (`EPOLL`), Linux/Android only. Grounded on
//! the teacher crate's `sys/epoll.rs` syscall wrapper and on the
//! original's `set_epoll_fds`/`rebuild_fd`: `ADD` a handle on first
//! sight, fall back to `MOD` on `EEXIST` (a record whose mask changed
//! without an intervening `DEL`), `DEL` on empty interest. The kernel
//! user data carries the record's own pointer, so a ready event is
//! resolved without a hash lookup.

use std::os::unix::io::RawFd;

use crate::backend::{except_if, ReadyEvent, ReadyRef};
use crate::error::{Error, Result};
use crate::interest::Interest;
use crate::registry::{Record, Registry};

pub struct EpollBackend {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new() -> EpollBackend {
        EpollBackend {
            epfd: -1,
            events: Vec::new(),
        }
    }

    pub fn init(&mut self, max_handles: usize) -> Result<()> {
        if self.epfd < 0 {
            let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if fd < 0 {
                return Err(Error::from_errno());
            }
            self.epfd = fd;
        }
        self.events.resize(
            max_handles.max(1),
            libc::epoll_event { events: 0, u64: 0 },
        );
        Ok(())
    }

    pub fn apply(&mut self, record: &Record) -> Result<()> {
        let mut event = libc::epoll_event {
            events: to_epoll_events(record.interest),
            u64: record.as_ptr() as u64,
        };

        if record.interest.is_empty() {
            let rc = unsafe {
                libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, record.handle.0, &mut event)
            };
            if rc < 0 {
                let err = Error::from_errno();
                if !matches!(err, Error::BadHandle) {
                    return Err(err);
                }
            }
            return Ok(());
        }

        let rc =
            unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, record.handle.0, &mut event) };
        if rc < 0 {
            let errno = unsafe { *libc::__errno_location() };
            if errno == libc::EEXIST {
                let rc = unsafe {
                    libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, record.handle.0, &mut event)
                };
                if rc < 0 {
                    return Err(Error::from_errno());
                }
            } else {
                return Err(Error::from_errno());
            }
        }

        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, _registry: &Registry) -> Result<Vec<ReadyEvent>> {
        let timeout = match timeout_ms {
            None => -1,
            Some(ms) => ms.min(libc::c_int::MAX as u64) as libc::c_int,
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout,
            )
        };
        if n < 0 {
            return Err(Error::from_errno());
        }

        let mut out = Vec::with_capacity(n as usize);
        for event in &self.events[..n as usize] {
            let mut readiness = Interest::empty();
            let flags = event.events as libc::c_int;
            if flags & libc::EPOLLIN != 0 {
                readiness |= Interest::readable();
            }
            if flags & libc::EPOLLOUT != 0 {
                readiness |= Interest::writable();
            }
            readiness |= except_if(flags & (libc::EPOLLERR | libc::EPOLLHUP) != 0);

            let record = event.u64 as *const Record;
            out.push(ReadyEvent {
                readiness,
                target: ReadyRef::ByRecord(record),
            });
        }

        Ok(out)
    }

    pub fn close(&mut self) {
        if self.epfd >= 0 {
            unsafe { libc::close(self.epfd) };
            self.epfd = -1;
        }
        self.events.clear();
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn to_epoll_events(interest: Interest) -> u32 {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= libc::EPOLLIN;
    }
    if interest.is_writable() {
        kind |= libc::EPOLLOUT;
    }
    if interest.is_except() {
        kind |= libc::EPOLLPRI;
    }
    kind as u32
}
