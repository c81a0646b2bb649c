//! Fixed-capacity table of `(descriptor, execution-state)` pairs addressed by
//! packed `(index, generation)` ids.
//!
//! Grounded on `ze-core::pool::Pool`'s page-of-slots/generation-tag pattern,
//! generalized from one `Slot<T>` enum per entry to two records per entry (a
//! `JobDescriptor` a caller may read via `resolve`, and a private
//! `ExecutionState` guarded by its own lock) so each job can be locked
//! independently rather than one lock covering the whole table.

use crate::config::MAX_WAITERS;
use crate::job::{BufferId, CancelOutcome, JobDescriptor, JobId, State};
use crossbeam::utils::CachePadded;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU32, Ordering};

/// Bounded waiter list: jobs registered to be notified when this slot's job
/// completes.
#[derive(Copy, Clone)]
pub struct WaiterList {
    ids: [JobId; MAX_WAITERS],
    count: usize,
}

impl WaiterList {
    fn clear(&mut self) {
        self.ids = [JobId::INVALID; MAX_WAITERS];
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_slice(&self) -> &[JobId] {
        &self.ids[..self.count]
    }

    /// Appends `id`. Returns `false` (without mutating) if the list is full.
    pub fn push(&mut self, id: JobId) -> bool {
        if self.count >= MAX_WAITERS {
            return false;
        }
        self.ids[self.count] = id;
        self.count += 1;
        true
    }
}

impl Default for WaiterList {
    fn default() -> Self {
        Self {
            ids: [JobId::INVALID; MAX_WAITERS],
            count: 0,
        }
    }
}

/// The private half of a slot, the execution record: everything guarded by
/// the slot's lock.
pub struct ExecutionState {
    pub descriptor: JobDescriptor,
    pub waiters: WaiterList,
    /// Remaining uncompleted dependencies, plus the `-1` creation marker.
    pub wait: i32,
    /// Uncompleted children + 1 for self.
    pub work: i32,
    pub state: State,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            descriptor: JobDescriptor::new(BufferId(0)),
            waiters: WaiterList::default(),
            wait: 0,
            work: 0,
            state: State::Uninitialized,
        }
    }
}

struct Slot {
    /// Mirrors `record.descriptor.id` so [`SlotTable::resolve`] can reject a
    /// stale id without taking the lock in the common case.
    current_id: AtomicU32,
    record: RwLock<ExecutionState>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            current_id: AtomicU32::new(JobId::INVALID.raw()),
            record: RwLock::new(ExecutionState::default()),
        }
    }
}

pub struct SlotTable {
    slots: Vec<CachePadded<Slot>>,
}

impl SlotTable {
    pub fn new(capacity: u32) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || CachePadded::new(Slot::default()));
        Self { slots }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn slot(&self, index: u32) -> &CachePadded<Slot> {
        &self.slots[index as usize]
    }

    pub(crate) fn write(&self, index: u32) -> RwLockWriteGuard<'_, ExecutionState> {
        self.slot(index).record.write()
    }

    pub(crate) fn read(&self, index: u32) -> RwLockReadGuard<'_, ExecutionState> {
        self.slot(index).record.read()
    }

    /// Publishes `id` as the slot's current occupant for lock-free `resolve`
    /// rejection. Must be called while still holding the slot's write lock
    /// after changing `record.descriptor.id`.
    pub(crate) fn publish_current_id(&self, index: u32, id: JobId) {
        self.slot(index).current_id.store(id.raw(), Ordering::Release);
    }

    /// Allocates a fresh generation at `index` for a newly-created job owned
    /// by `owning_buffer`, and fully initializes its execution record the
    /// way `create_job` requires: `wait = -1`, `work = 1`,
    /// `state = NotSubmitted`, waiter list cleared. The descriptor's
    /// payload/entry/parent are left at their defaults; the caller (job
    /// context) fills those in with a follow-up `write(index)` before
    /// handing the id back to the user, which is safe because no other
    /// thread can observe this id until `create_job` returns it.
    pub(crate) fn activate(&self, index: u32, owning_buffer: BufferId) -> JobId {
        let mut record = self.write(index);
        let next_generation = (record.descriptor.id.generation() + 1) & crate::job::GENERATION_MASK;
        let id = JobId::new(index, next_generation);
        record.descriptor = JobDescriptor::new(owning_buffer);
        record.descriptor.id = id;
        record.waiters.clear();
        record.wait = -1;
        record.work = 1;
        record.state = State::NotSubmitted;
        drop(record);
        self.publish_current_id(index, id);
        id
    }

    /// Cheap, mostly-lock-free read used for parent lookup and by external
    /// callers to detect an already-completed job.
    pub fn resolve(&self, id: JobId) -> Option<JobDescriptor> {
        if !id.is_valid() {
            return None;
        }
        let index = id.index();
        if index >= self.capacity() {
            return None;
        }
        let slot = self.slot(index);
        if slot.current_id.load(Ordering::Acquire) != id.raw() {
            return None;
        }
        let record = slot.record.read();
        if record.descriptor.id.raw() != id.raw() {
            return None;
        }
        Some(record.descriptor)
    }

    /// Locks the slot and, if its state is neither `Running` nor `Completed`,
    /// sets it to `Canceled`; returns the resulting state as a
    /// [`CancelOutcome`].
    ///
    /// A generation mismatch (the id is stale — its slot has since been
    /// reused, or otherwise no longer belongs to this id) is reported as the
    /// slot's *current* state without mutating it: this crate's chosen
    /// policy is that canceling a stale id never disturbs whatever currently
    /// occupies the slot, but still hands back whatever state is available
    /// (`Completed`, if the slot hasn't yet been reused; `Pending` if it has
    /// been reused by a new, not-yet-terminal job). See DESIGN.md.
    pub fn cancel(&self, id: JobId) -> CancelOutcome {
        if !id.is_valid() {
            return CancelOutcome::Unknown;
        }
        let index = id.index();
        if index >= self.capacity() {
            return CancelOutcome::Unknown;
        }
        let mut record = self.write(index);
        if record.descriptor.id.generation() != id.generation() {
            return CancelOutcome::from_state(record.state);
        }
        if !matches!(record.state, State::Running | State::Completed) {
            record.state = State::Canceled;
        }
        CancelOutcome::from_state(record.state)
    }
}
