//! Owns the slot table, the buffer pool, and the queue registry; issues and
//! retires contexts; terminates queues.
//!
//! Grounded on `ze-jobsystem`'s `JobSystem`: a single struct owning the shared
//! state (`SharedWorkerData`) that per-thread workers reach through, created
//! once via `JobSystem::new(count)`. This crate's `Scheduler` does not spawn
//! or own OS threads itself — OS thread creation/join is an out-of-scope
//! external collaborator here, so unlike `JobSystem` it has no
//! `worker_threads` field; `context_count` is an advisory hint for how many
//! contexts a host intends to run concurrently; contexts are actually
//! allocated on demand by `acquire_context`.

use crate::buffer::BufferPool;
use crate::config::{buffer_pool_capacity, SLOT_CAPACITY};
use crate::context::JobContext;
use crate::job::{CancelOutcome, JobDescriptor, JobId, QueueId};
use crate::queue::{Queue, SIGNAL_TERMINATE};
use crate::slot_table::SlotTable;
use crate::{job_info, job_warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AcquireContextError {
    BufferPoolExhausted,
    TooManyQueues,
    ContextPoolExhausted,
}

/// Bookkeeping-only context free list: tracks how many contexts are
/// concurrently checked out against the capacity pre-allocated at
/// [`Scheduler::create`]. A `JobContext` can't itself be pre-built and
/// pooled the way a buffer can (it is bound to a caller-supplied queue and
/// thread id at acquire time), so "popping from the free list" here means
/// admitting one more outstanding context rather than handing back a
/// previously-built object.
struct ContextPool {
    capacity: u32,
    outstanding: u32,
}

impl ContextPool {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            outstanding: 0,
        }
    }

    fn acquire(&mut self) -> Result<(), AcquireContextError> {
        if self.outstanding >= self.capacity {
            return Err(AcquireContextError::ContextPoolExhausted);
        }
        self.outstanding += 1;
        Ok(())
    }

    fn release(&mut self) {
        debug_assert!(self.outstanding > 0, "context pool refcount underflow");
        self.outstanding = self.outstanding.saturating_sub(1);
    }
}

pub(crate) struct QueueRegistry {
    // (id, queue, registration refcount)
    entries: Vec<(QueueId, Arc<Queue>, u32)>,
}

impl QueueRegistry {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn register(&mut self, queue: Arc<Queue>) -> Result<(), AcquireContextError> {
        let id = queue.id();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.0 == id) {
            entry.2 += 1;
            return Ok(());
        }
        if self.entries.len() >= crate::config::MAX_QUEUES {
            return Err(AcquireContextError::TooManyQueues);
        }
        self.entries.push((id, queue, 1));
        Ok(())
    }

    fn deregister(&mut self, id: QueueId) {
        if let Some(pos) = self.entries.iter().position(|e| e.0 == id) {
            self.entries[pos].2 -= 1;
            if self.entries[pos].2 == 0 {
                self.entries.remove(pos);
            }
        }
    }

    pub(crate) fn get(&self, id: QueueId) -> Option<Arc<Queue>> {
        self.entries.iter().find(|e| e.0 == id).map(|e| e.1.clone())
    }

    fn worker_count(&self, id: QueueId) -> u32 {
        self.entries
            .iter()
            .find(|e| e.0 == id)
            .map(|e| e.2)
            .unwrap_or(0)
    }

    fn all_queues(&self) -> Vec<Arc<Queue>> {
        self.entries.iter().map(|e| e.1.clone()).collect()
    }
}

/// State shared between a `Scheduler` and every `JobContext` it hands out.
pub(crate) struct Shared {
    pub(crate) slots: SlotTable,
    pub(crate) buffers: Mutex<BufferPool>,
    pub(crate) queues: Mutex<QueueRegistry>,
    context_pool: Mutex<ContextPool>,
}

/// Owns the slot table, buffer pool, and queue registry for one job graph
///. Cheap to clone (an `Arc` of shared state), so it can be
/// handed to every thread that will `acquire_context` from it.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// `context_count` pre-allocates that many context slots on the
    /// scheduler's context free list and an equal number of job buffers on
    /// the buffer pool's free list. `acquire_context` fails with
    /// `ContextPoolExhausted` once that many contexts are concurrently
    /// checked out.
    pub fn create(context_count: u32) -> Self {
        job_info!(
            "Creating scheduler: {} slots, {} context(s) expected",
            SLOT_CAPACITY,
            context_count
        );

        let shared = Arc::new(Shared {
            slots: SlotTable::new(SLOT_CAPACITY),
            buffers: Mutex::new(BufferPool::new(buffer_pool_capacity())),
            queues: Mutex::new(QueueRegistry::new()),
            context_pool: Mutex::new(ContextPool::new(context_count)),
        });

        Self { shared }
    }

    /// Pops a context slot (failing once `context_count` are already
    /// outstanding), registers the queue in the scheduler's registry, and
    /// acquires an active job buffer for it.
    ///
    /// Resource exhaustion on either the context pool or the buffer pool is
    /// fatal in debug builds (`debug_assert!` before returning), since a
    /// correctly-sized scheduler should never hit either; release builds
    /// just hand back the error.
    pub fn acquire_context(
        &self,
        queue: Arc<Queue>,
        thread_id: ThreadId,
    ) -> Result<JobContext, AcquireContextError> {
        if let Err(err) = self.shared.context_pool.lock().acquire() {
            debug_assert!(
                false,
                "context pool exhausted: no free context and capacity reached"
            );
            job_warn!("Context pool exhausted acquiring a context");
            return Err(err);
        }

        {
            let mut queues = self.shared.queues.lock();
            if let Err(err) = queues.register(queue.clone()) {
                self.shared.context_pool.lock().release();
                return Err(err);
            }
        }

        let active_buffer = {
            let mut buffers = self.shared.buffers.lock();
            match buffers.acquire(None) {
                Some(id) => id,
                None => {
                    self.shared.queues.lock().deregister(queue.id());
                    self.shared.context_pool.lock().release();
                    debug_assert!(false, "buffer pool exhausted acquiring a context");
                    job_warn!("Buffer pool exhausted acquiring a context");
                    return Err(AcquireContextError::BufferPoolExhausted);
                }
            }
        };

        Ok(JobContext::new(self.shared.clone(), thread_id, queue, active_buffer))
    }

    /// Releases a context back to the pool: its active buffer is released
    /// (possibly returning it to the buffer free list), the queue
    /// registry's reference count for its queue is decremented, removing
    /// the entry on last release, and its context-pool slot is freed.
    pub fn release_context(&self, ctx: JobContext) {
        let (default_queue, active_buffer) = ctx.into_parts();
        {
            let mut buffers = self.shared.buffers.lock();
            buffers.release(active_buffer);
        }
        {
            let mut queues = self.shared.queues.lock();
            queues.deregister(default_queue.id());
        }
        self.shared.context_pool.lock().release();
    }

    /// Signals every registered queue with `SIGNAL_TERMINATE`, waking all
    /// threads blocked in `push`/`take` on any of them.
    pub fn terminate(&self) {
        job_warn!("Terminating scheduler: signaling all registered queues");
        for queue in self.shared.queues.lock().all_queues() {
            queue.signal(SIGNAL_TERMINATE);
        }
    }

    pub fn get_queue(&self, id: QueueId) -> Option<Arc<Queue>> {
        self.shared.queues.lock().get(id)
    }

    pub fn get_worker_count(&self, id: QueueId) -> u32 {
        self.shared.queues.lock().worker_count(id)
    }

    /// Slot-level state update: locks the slot and, unless
    /// it is `Running` or `Completed`, sets it `Canceled`.
    pub fn cancel(&self, id: JobId) -> CancelOutcome {
        self.shared.slots.cancel(id)
    }

    /// Exposes the generation check: `None` if `id` is stale or unknown.
    pub fn resolve(&self, id: JobId) -> Option<JobDescriptor> {
        self.shared.slots.resolve(id)
    }

    /// `(allocated buffer count, free-list length)`, for the buffer-accounting
    /// testable property (spec §8 property 7).
    #[cfg(test)]
    pub(crate) fn buffer_pool_snapshot(&self) -> (u32, u32) {
        let buffers = self.shared.buffers.lock();
        (buffers.allocated_count(), buffers.free_list_len())
    }

    pub fn cpu_thread_count() -> usize {
        num_cpus::get()
    }
}
