//! The timer list the reactor loop treats as an opaque collaborator:
//! "next deadline in milliseconds, or none" and "fire all timers whose
//! deadline is in the past".
//!
//! Grounded on the binary-heap sketch in the teacher crate's
//! `plus/timer.rs` (`Timer { tick_ms, tasks: BinaryHeap<Task> }`),
//! which declares `insert`/`remove`/`pop` but never implements them;
//! this is the completed version, ordered soonest-first with ties
//! broken by insertion sequence so firing order is deterministic.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Handle returned by [`TimerList::schedule`], usable with [`TimerList::cancel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry {
    deadline: Instant,
    seq: u64,
    id: TimerId,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

impl Entry {
    fn key(&self) -> (Instant, u64) {
        (self.deadline, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the soonest deadline sorts highest.
        other.key().cmp(&self.key())
    }
}

/// An ordered collection of timers. Only the head deadline is ever
/// consulted by the reactor loop; insertion, cancellation, and firing
/// are entirely owned here.
#[derive(Debug, Default)]
pub struct TimerList {
    tasks: BinaryHeap<Entry>,
    next_seq: u64,
    next_id: u64,
}

impl TimerList {
    pub fn new() -> TimerList {
        TimerList::default()
    }

    /// Schedule `callback` to run once, `delay` from now.
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let seq = self.next_seq;
        self.next_seq += 1;

        self.tasks.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            id,
            callback: Some(Box::new(callback)),
        });

        id
    }

    /// Remove a pending timer before it fires. Returns `false` if the
    /// timer already fired or never existed.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.tasks.len();
        self.tasks = self
            .tasks
            .drain()
            .filter(|entry| entry.id != id)
            .collect();
        self.tasks.len() != before
    }

    /// Milliseconds until the next timer fires, or `None` if the list
    /// is empty. Saturates to `0` if the deadline is already past.
    pub fn next_timeout_ms(&self) -> Option<u64> {
        self.tasks.peek().map(|entry| {
            let now = Instant::now();
            if entry.deadline <= now {
                0
            } else {
                (entry.deadline - now).as_millis() as u64
            }
        })
    }

    /// Fire every timer whose deadline is in the past.
    pub fn poll(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.tasks.peek() {
            if entry.deadline > now {
                break;
            }
            let mut entry = self.tasks.pop().expect("peeked entry vanished");
            if let Some(callback) = entry.callback.take() {
                callback();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl PartialEq for TimerId {
    fn eq(&self, other: &TimerId) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerList::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        timers.schedule(Duration::from_millis(0), move || o1.lock().unwrap().push(1));
        let o2 = order.clone();
        timers.schedule(Duration::from_millis(0), move || o2.lock().unwrap().push(2));

        std::thread::sleep(Duration::from_millis(5));
        timers.poll();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut timers = TimerList::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = timers.schedule(Duration::from_millis(0), move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });

        assert!(timers.cancel(id));
        std::thread::sleep(Duration::from_millis(5));
        timers.poll();

        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn next_timeout_reflects_empty_list() {
        let timers = TimerList::new();
        assert_eq!(timers.next_timeout_ms(), None);
    }
}
