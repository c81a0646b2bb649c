//! Bounded MPMC ready queue of job ids with producer/consumer blocking and a
//! signal word.
//!
//! Grounded on `ze-jobsystem`'s `SharedWorkerData` (`parking_lot::{Mutex,
//! Condvar}` guarding sleep/wake of worker threads around an unbounded
//! `crossbeam::deque::Injector`), generalized to a fixed-capacity ring with
//! *two* condition variables, since producers must also block on full, not
//! just consumers on empty — `SharedWorkerData`'s injector never blocks a
//! producer, since it is unbounded.

use crate::job::{JobId, QueueId};
use parking_lot::{Condvar, Mutex};

/// Signal codes. `Clear` (0) is the default; non-zero values stay
/// signaled until explicitly cleared.
pub const SIGNAL_CLEAR: u32 = 0;
pub const SIGNAL_TERMINATE: u32 = 1;

struct Ring {
    slots: Vec<JobId>,
    mask: u64,
    push: u64,
    take: u64,
}

impl Ring {
    fn new(capacity: u32) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            slots: vec![JobId::INVALID; capacity as usize],
            mask: (capacity - 1) as u64,
            push: 0,
            take: 0,
        }
    }

    fn len(&self) -> u64 {
        self.push - self.take
    }

    fn is_full(&self) -> bool {
        self.len() == self.slots.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.push == self.take
    }

    fn push_job(&mut self, job: JobId) {
        let index = (self.push & self.mask) as usize;
        self.slots[index] = job;
        self.push += 1;
    }

    fn take_job(&mut self) -> JobId {
        let index = (self.take & self.mask) as usize;
        let job = self.slots[index];
        self.take += 1;
        job
    }
}

/// A bounded, waitable FIFO of ready job ids.
pub struct Queue {
    id: QueueId,
    ring: Mutex<Ring>,
    signal: Mutex<u32>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl Queue {
    /// Capacity is fixed at the slot-table size: a full queue
    /// would mean every live job is enqueued at once, which the scheduler's
    /// invariants never allow to arise.
    pub fn new(id: QueueId, capacity: u32) -> Self {
        Self {
            id,
            ring: Mutex::new(Ring::new(capacity)),
            signal: Mutex::new(SIGNAL_CLEAR),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn check_signal(&self) -> u32 {
        *self.signal.lock()
    }

    /// Writes the signal word; a non-zero value wakes every blocked producer
    /// and consumer.
    pub fn signal(&self, code: u32) {
        *self.signal.lock() = code;
        if code != SIGNAL_CLEAR {
            self.not_full.notify_all();
            self.not_empty.notify_all();
        }
    }

    /// Blocks while the queue is full and unsignaled. Returns `false`
    /// (without enqueueing) if the queue is signaled; otherwise enqueues
    /// `job`, wakes one consumer, and returns `true`.
    pub fn push(&self, job: JobId) -> bool {
        let mut ring = self.ring.lock();
        loop {
            if self.check_signal() != SIGNAL_CLEAR {
                return false;
            }
            if !ring.is_full() {
                break;
            }
            self.not_full.wait(&mut ring);
        }
        ring.push_job(job);
        drop(ring);
        self.not_empty.notify_one();
        true
    }

    /// Blocks while the queue is empty and unsignaled. Returns `None` if
    /// signaled with an empty queue; otherwise dequeues, wakes one producer,
    /// and returns the job.
    pub fn take(&self) -> Option<JobId> {
        let mut ring = self.ring.lock();
        loop {
            if !ring.is_empty() {
                break;
            }
            if self.check_signal() != SIGNAL_CLEAR {
                return None;
            }
            self.not_empty.wait(&mut ring);
        }
        let job = ring.take_job();
        drop(ring);
        self.not_full.notify_one();
        Some(job)
    }

    /// Resets both counters to empty and wakes all producers, for recovery
    /// paths where contents must be discarded without draining.
    pub fn flush(&self) {
        let mut ring = self.ring.lock();
        ring.push = 0;
        ring.take = 0;
        drop(ring);
        self.not_full.notify_all();
    }

    pub fn len(&self) -> u64 {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}
