//! Array-based readiness (`POLL`). Grounded directly on the original's
//! `set_poll_fds`/`fd_poll` `METHOD_POLL` arm: a parallel array of
//! `{handle, requested, returned}` slots indexed by the record's dense
//! index, with unused slots carrying the sentinel handle value so the
//! kernel ignores them.

use std::os::unix::io::RawFd;

use crate::backend::{except_if, ReadyEvent, ReadyRef};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::interest::Interest;
use crate::registry::{Record, Registry};

const IGNORED_FD: RawFd = -1;

pub struct PollBackend {
    slots: Vec<libc::pollfd>,
    // High-water mark over every index ever placed into `slots`, not
    // the registry's current live count: indexes are monotonic and
    // never recycled (§3), so a deregistered low index leaves a hole
    // that must still be scanned to reach a higher index assigned
    // later. Mirrors the original's `re->nfds`, which is likewise a
    // high-water count bumped on `fhs_update`, not a live-count.
    high_water: usize,
}

impl PollBackend {
    pub fn new() -> PollBackend {
        PollBackend {
            slots: Vec::new(),
            high_water: 0,
        }
    }

    pub fn init(&mut self, max_handles: usize) -> Result<()> {
        if self.slots.len() != max_handles {
            self.slots = vec![
                libc::pollfd {
                    fd: IGNORED_FD,
                    events: 0,
                    revents: 0,
                };
                max_handles
            ];
        }
        self.high_water = self.high_water.min(self.slots.len());
        Ok(())
    }

    pub fn apply(&mut self, record: &Record) -> Result<()> {
        let index = match record.index.get() {
            Some(index) => index,
            None => return Ok(()), // empty interest: nothing to place in the array
        };

        self.high_water = self.high_water.max(index + 1);
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::TooMany { limit: self.slots.len() })?;

        if record.interest.is_empty() {
            slot.fd = IGNORED_FD;
            slot.events = 0;
            return Ok(());
        }

        slot.fd = record.handle.0;
        let mut events = 0;
        if record.interest.is_readable() {
            events |= libc::POLLIN;
        }
        if record.interest.is_writable() {
            events |= libc::POLLOUT;
        }
        if record.interest.is_except() {
            events |= libc::POLLERR;
        }
        slot.events = events as libc::c_short;
        slot.revents = 0;

        Ok(())
    }

    pub fn wait(&mut self, timeout_ms: Option<u64>, _registry: &Registry) -> Result<Vec<ReadyEvent>> {
        let timeout = to_poll_timeout(timeout_ms);
        let nfds = self.high_water.min(self.slots.len()) as libc::nfds_t;

        let n = unsafe { libc::poll(self.slots.as_mut_ptr(), nfds, timeout) };
        if n < 0 {
            return Err(Error::from_errno());
        }

        let mut out = Vec::with_capacity(n as usize);
        for slot in self.slots.iter_mut().take(nfds as usize) {
            if slot.revents == 0 {
                continue;
            }

            let mut readiness = Interest::empty();
            if slot.revents & libc::POLLIN != 0 {
                readiness |= Interest::readable();
            }
            if slot.revents & libc::POLLOUT != 0 {
                readiness |= Interest::writable();
            }
            readiness |= except_if(
                slot.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
            );

            let fd = slot.fd;
            slot.revents = 0;

            if fd == IGNORED_FD {
                continue;
            }

            out.push(ReadyEvent {
                readiness,
                target: ReadyRef::ByHandle(Handle(fd)),
            });
        }

        Ok(out)
    }

    pub fn close(&mut self) {
        self.slots.clear();
        self.high_water = 0;
    }
}

fn to_poll_timeout(timeout_ms: Option<u64>) -> libc::c_int {
    match timeout_ms {
        None => -1,
        Some(ms) => ms.min(libc::c_int::MAX as u64) as libc::c_int,
    }
}
