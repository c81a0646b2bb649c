//! Per-thread job context: `create_job`, `submit_job`, `wait_ready_job`,
//! `wait_job`, `complete_job`, `cancel_job`.
//!
//! Grounded on `ze-jobsystem`'s `Job`/`JobHandle` finish-propagation pair
//! (`Job::finish` decrementing `unfinished_jobs`, recursing into the parent,
//! then scheduling continuations), generalized from an intrusive refcounted
//! pointer graph to the slot table's indexed records, and from
//! `ze-jobsystem`'s work-stealing `job.wait()` busy-spin to a
//! queue-draining cooperative wait; this crate does not implement work
//! stealing between queues.

use crate::job::{
    BufferId, CallType, CancelOutcome, CreateJobError, JobDescriptor, JobId, QueueId, State,
    SubmitKind, SubmitResult,
};
use crate::queue::Queue;
use crate::scheduler::Shared;
use crate::{job_warn};
use std::sync::Arc;
use std::thread::ThreadId;

/// Upper bound on a job's ancestor chain depth, asserted against in
/// [`JobContext::is_canceled_via_ancestor_chain`]. Parents are required to
/// exist before a child is created, so the chain is acyclic by
/// construction; this only catches a corrupted parent link.
const MAX_ANCESTOR_DEPTH: u32 = crate::config::SLOT_CAPACITY;

/// A single-owner handle bound to one ready queue and one active job buffer.
/// Acquired from [`crate::scheduler::Scheduler::acquire_context`] and
/// returned via `release_context`.
pub struct JobContext {
    scheduler: Arc<Shared>,
    thread_id: ThreadId,
    default_queue: Arc<Queue>,
    active_buffer: BufferId,
}

impl JobContext {
    pub(crate) fn new(
        scheduler: Arc<Shared>,
        thread_id: ThreadId,
        default_queue: Arc<Queue>,
        active_buffer: BufferId,
    ) -> Self {
        Self {
            scheduler,
            thread_id,
            default_queue,
            active_buffer,
        }
    }

    pub(crate) fn into_parts(self) -> (Arc<Queue>, BufferId) {
        (self.default_queue, self.active_buffer)
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// The thread identifier may be reassigned to support handing a context
    /// to a recovery/replacement thread.
    pub fn set_thread_id(&mut self, thread_id: ThreadId) {
        self.thread_id = thread_id;
    }

    pub fn default_queue(&self) -> &Arc<Queue> {
        &self.default_queue
    }

    /// Reads a live job's descriptor, or `None` if `id` is stale or unknown.
    pub fn resolve(&self, id: JobId) -> Option<JobDescriptor> {
        self.scheduler.slots.resolve(id)
    }

    /// Allocates a waiter-list and payload of `(size, align)` from the
    /// active buffer, rolling over to a fresh buffer once (on a per-buffer
    /// job-count cap, or a bump-allocation overflow) and retrying once
    /// before giving up.
    ///
    /// The execution record's waiter list is not itself bump-allocated from
    /// the buffer — it is a fixed-size array embedded directly in each
    /// slot's execution record
    /// (see [`crate::slot_table::ExecutionState`]), for the same bounded
    /// capacity at lower indirection. Only the job's payload bytes come out
    /// of the buffer arena. See DESIGN.md.
    ///
    /// Resource exhaustion here is fatal in debug builds (`debug_assert!`
    /// before returning), since every buffer-rollover path can only be
    /// reached if the scheduler was sized too small for its workload; release
    /// builds just hand back the error.
    pub fn create_job(&mut self, size: usize, align: usize) -> Result<JobId, CreateJobError> {
        let align = align.max(1);
        let mut buffers = self.scheduler.buffers.lock();

        if buffers.get(self.active_buffer).is_full_of_jobs() {
            let old = self.active_buffer;
            self.active_buffer = match buffers.acquire(Some(old)) {
                Some(id) => id,
                None => {
                    debug_assert!(
                        false,
                        "slot table full: no buffer left to roll a full job buffer into"
                    );
                    job_warn!("Slot table full creating job (buffer rollover)");
                    return Err(CreateJobError::SlotTableFull);
                }
            };
        }

        let saved_offset = buffers.get(self.active_buffer).saved_offset();
        let ptr = match buffers.get_mut(self.active_buffer).bump_alloc(size, align) {
            Some((ptr, _)) => ptr,
            None => {
                buffers.get_mut(self.active_buffer).rollback(saved_offset);
                let old = self.active_buffer;
                self.active_buffer = match buffers.acquire(Some(old)) {
                    Some(id) => id,
                    None => {
                        debug_assert!(false, "buffer pool exhausted allocating job payload");
                        job_warn!("Buffer pool exhausted creating job");
                        return Err(CreateJobError::BufferPoolExhausted);
                    }
                };
                match buffers.get_mut(self.active_buffer).bump_alloc(size, align) {
                    Some((ptr, _)) => ptr,
                    None => {
                        debug_assert!(false, "payload does not fit even in a freshly rolled buffer");
                        return Err(CreateJobError::BufferPoolExhausted);
                    }
                }
            }
        };

        let local_slot = match buffers.get_mut(self.active_buffer).reserve_local_slot() {
            Some(slot) => slot,
            None => {
                debug_assert!(false, "slot table full: freshly rolled buffer already full");
                return Err(CreateJobError::SlotTableFull);
            }
        };
        buffers.get(self.active_buffer).add_ref();
        let owning_buffer = self.active_buffer;
        drop(buffers);

        let id = self.scheduler.slots.activate(local_slot, owning_buffer);

        if size > 0 {
            let mut record = self.scheduler.slots.write(local_slot);
            let non_null = std::ptr::NonNull::new(ptr).expect("bump_alloc never returns null");
            record.descriptor.payload = unsafe { crate::job::Payload::new(non_null, size) };
        }

        Ok(id)
    }

    /// Sets the job's entry point, target queue, and parent before
    /// submission. Only meaningful between `create_job` and `submit_job`,
    /// since no other thread can observe the id until then.
    pub fn configure_job(
        &mut self,
        id: JobId,
        entry: crate::job::JobFn,
        target_queue: Option<QueueId>,
        parent: JobId,
    ) {
        let index = id.index();
        if index >= self.scheduler.slots.capacity() {
            return;
        }
        let mut record = self.scheduler.slots.write(index);
        if record.descriptor.id.raw() != id.raw() {
            return;
        }
        record.descriptor.entry = entry;
        record.descriptor.target_queue = target_queue;
        record.descriptor.parent = parent;
    }

    /// Registers `deps` as dependencies, applies the additive wait-counter
    /// protocol, bumps the parent's `work` counter, and enqueues the job if
    /// it is ready.
    ///
    /// Locking order is dependency record(s) → this job's record → parent
    /// record; the target queue's push happens only after every lock above
    /// has been released.
    pub fn submit_job(&mut self, job: JobId, deps: &[JobId], kind: SubmitKind) -> SubmitResult {
        if !job.is_valid() {
            return SubmitResult::InvalidJob;
        }
        let index = job.index();
        if index >= self.scheduler.slots.capacity() {
            return SubmitResult::InvalidJob;
        }
        {
            let record = self.scheduler.slots.read(index);
            if record.descriptor.id.raw() != job.raw() {
                return SubmitResult::InvalidJob;
            }
        }

        if kind == SubmitKind::Cancel {
            {
                let mut record = self.scheduler.slots.write(index);
                record.state = State::Canceled;
            }
            self.bump_parent_work(index);
            self.enqueue(job, index);
            return SubmitResult::Success;
        }

        let already_canceled = self.scheduler.slots.read(index).state == State::Canceled;

        let mut wait_count: i32 = 0;
        let mut too_many = false;

        if !already_canceled {
            for &dep in deps {
                if !dep.is_valid() {
                    continue;
                }
                let dep_index = dep.index();
                if dep_index >= self.scheduler.slots.capacity() {
                    continue;
                }
                let mut dep_record = self.scheduler.slots.write(dep_index);
                if dep_record.descriptor.id.raw() != dep.raw() {
                    continue; // stale dependency: treat as already resolved
                }
                if matches!(dep_record.state, State::Completed | State::Canceled) {
                    continue;
                }
                if dep_record.waiters.push(job) {
                    wait_count += 1;
                } else {
                    too_many = true;
                }
            }
        }

        let became_ready = {
            let mut record = self.scheduler.slots.write(index);
            record.wait += wait_count + 1;
            if record.state != State::Canceled {
                record.state = if record.wait == 0 {
                    State::Ready
                } else {
                    State::NotReady
                };
            }
            record.state != State::NotReady
        };

        self.bump_parent_work(index);

        if became_ready {
            self.enqueue(job, index);
        }

        if too_many {
            SubmitResult::TooManyWaiters
        } else {
            SubmitResult::Success
        }
    }

    fn bump_parent_work(&self, index: u32) {
        let parent = self.scheduler.slots.read(index).descriptor.parent;
        if !parent.is_valid() {
            return;
        }
        let parent_index = parent.index();
        if parent_index >= self.scheduler.slots.capacity() {
            return;
        }
        let mut parent_record = self.scheduler.slots.write(parent_index);
        if parent_record.descriptor.id.raw() == parent.raw()
            && parent_record.state != State::Canceled
        {
            parent_record.work += 1;
        }
    }

    fn enqueue(&self, job: JobId, index: u32) {
        let target = self.scheduler.slots.read(index).descriptor.target_queue;
        let queue = match target {
            Some(qid) => self.scheduler.queues.lock().get(qid),
            None => None,
        };
        let queue = queue.unwrap_or_else(|| self.default_queue.clone());
        queue.push(job);
    }

    /// Pulls the next ready job from this context's queue, transparently
    /// draining and retiring any job (or descendant of a canceled ancestor)
    /// whose whole chain has been canceled before returning one meant to
    /// actually run. Returns `None` once the queue is signaled and drained.
    pub fn wait_ready_job(&mut self) -> Option<JobId> {
        loop {
            let job = self.default_queue.take()?;
            if self.is_canceled_via_ancestor_chain(job) {
                self.run_cleanup_only(job);
                continue;
            }
            let index = job.index();
            {
                let mut record = self.scheduler.slots.write(index);
                if record.descriptor.id.raw() == job.raw() {
                    record.state = State::Running;
                }
            }
            return Some(job);
        }
    }

    /// Walks `job` and its ancestors, guarding `INVALID` before dereferencing
    /// a parent, returning `true` if any link in the chain is `Canceled`.
    fn is_canceled_via_ancestor_chain(&self, job: JobId) -> bool {
        let mut current = job;
        let mut depth = 0;
        loop {
            if !current.is_valid() {
                return false;
            }
            let index = current.index();
            if index >= self.scheduler.slots.capacity() {
                return false;
            }
            let (state, parent) = {
                let record = self.scheduler.slots.read(index);
                if record.descriptor.id.raw() != current.raw() {
                    return false; // stale ancestor: chain already resolved elsewhere
                }
                (record.state, record.descriptor.parent)
            };
            if state == State::Canceled {
                return true;
            }
            current = parent;
            depth += 1;
            debug_assert!(depth <= MAX_ANCESTOR_DEPTH, "parent chain too deep or cyclic");
        }
    }

    /// Delivers the single `Cleanup` call a canceled-before-run job is owed
    /// and retires it.
    fn run_cleanup_only(&mut self, job: JobId) {
        let index = job.index();
        let entry = {
            let mut record = self.scheduler.slots.write(index);
            if record.descriptor.id.raw() != job.raw() {
                return;
            }
            record.state = State::Canceled;
            record.descriptor.entry
        };
        let exit_code = entry(self, job, CallType::Cleanup);
        {
            let mut record = self.scheduler.slots.write(index);
            if record.descriptor.id.raw() == job.raw() {
                record.descriptor.exit_code = exit_code;
            }
        }
        self.complete_job(job);
    }

    /// Runs `job`'s entry point (`Execute` then `Cleanup`) and retires it.
    /// Used by [`JobContext::wait_job`]'s cooperative drain; a host writing
    /// its own worker loop around `wait_ready_job`/`complete_job` performs
    /// the same two calls itself.
    fn execute_and_complete(&mut self, job: JobId) {
        let index = job.index();
        let entry = self.scheduler.slots.read(index).descriptor.entry;
        entry(self, job, CallType::Execute);
        let exit_code = entry(self, job, CallType::Cleanup);
        {
            let mut record = self.scheduler.slots.write(index);
            if record.descriptor.id.raw() == job.raw() {
                record.descriptor.exit_code = exit_code;
            }
        }
        self.complete_job(job);
    }

    /// Cooperatively blocks until `id` is `Completed` or `Canceled`,
    /// draining and running other ready jobs from this context's queue in
    /// the meantime instead of idling (no work stealing between queues).
    /// Returns `false` if the queue was signaled before `id` resolved.
    pub fn wait_job(&mut self, id: JobId) -> bool {
        loop {
            if !id.is_valid() {
                return true;
            }
            let index = id.index();
            if index >= self.scheduler.slots.capacity() {
                return true;
            }
            let state = {
                let record = self.scheduler.slots.read(index);
                if record.descriptor.id.raw() != id.raw() {
                    return true; // stale: already retired
                }
                record.state
            };
            if matches!(state, State::Completed | State::Canceled) {
                return true;
            }
            match self.wait_ready_job() {
                Some(ready) => self.execute_and_complete(ready),
                None => return false,
            }
        }
    }

    /// Delegates to the scheduler-level state transition:
    /// locks the slot and, unless `Running` or `Completed`, sets it
    /// `Canceled`.
    pub fn cancel_job(&self, id: JobId) -> CancelOutcome {
        self.scheduler.slots.cancel(id)
    }

    #[cfg(test)]
    fn peek_state(&self, id: JobId) -> Option<State> {
        let index = id.index();
        if index >= self.scheduler.slots.capacity() {
            return None;
        }
        let record = self.scheduler.slots.read(index);
        if record.descriptor.id.raw() != id.raw() {
            return None;
        }
        Some(record.state)
    }

    /// Finalizes a job that has finished running: releases the buffer
    /// reference taken at creation, wakes every waiter (decrementing its
    /// `wait` counter and enqueueing it if it reaches zero), and recurses
    /// into the parent if this was its last outstanding child.
    pub fn complete_job(&mut self, job: JobId) {
        if !job.is_valid() {
            return;
        }
        let index = job.index();
        if index >= self.scheduler.slots.capacity() {
            return;
        }

        let mut finalize = None;

        {
            let mut record = self.scheduler.slots.write(index);
            if record.descriptor.id.raw() != job.raw() {
                return;
            }
            let was_last = record.work == 1;
            record.work -= 1;
            debug_assert!(record.work >= 0, "work counter underflow");
            if was_last {
                if record.state != State::Canceled {
                    record.state = State::Completed;
                }
                finalize = Some((
                    record.waiters,
                    record.descriptor.owning_buffer,
                    record.descriptor.parent,
                ));
            }
        }

        let Some((waiters, owning_buffer, parent)) = finalize else {
            return;
        };

        for &waiter in waiters.as_slice() {
            self.release_waiter(waiter);
        }

        {
            let mut buffers = self.scheduler.buffers.lock();
            buffers.release(owning_buffer);
        }

        if parent.is_valid() {
            self.complete_job(parent);
        }
    }

    /// Decrements a waiter's `wait` counter; if it reaches zero, marks it
    /// `Ready` (unless already `Canceled`) and enqueues it, outside the
    /// waiter's own lock.
    fn release_waiter(&self, waiter: JobId) {
        let index = waiter.index();
        if index >= self.scheduler.slots.capacity() {
            return;
        }
        let became_ready = {
            let mut record = self.scheduler.slots.write(index);
            if record.descriptor.id.raw() != waiter.raw() {
                return;
            }
            record.wait -= 1;
            let ready_now = record.wait == 0;
            if ready_now && record.state != State::Canceled {
                record.state = State::Ready;
            }
            ready_now
        };
        if became_ready {
            self.enqueue(waiter, index);
        }
    }
}

impl Drop for JobContext {
    fn drop(&mut self) {
        job_warn!(
            "JobContext for thread {:?} dropped without release_context; its active buffer leaks until the scheduler is torn down",
            self.thread_id
        );
    }
}
