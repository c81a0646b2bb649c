//! Constants fixed per build, in the shape of `ze-jobsystem`'s own
//! hand-picked constants (`MAX_CONTINUATIONS`,
//! `MAX_USERDATA_SIZE`, `MAX_JOB_COUNT_PER_THREAD`) rather than a
//! runtime-configurable struct — these values must be fixed per build. The
//! one genuinely create-time parameter, the number of contexts to
//! pre-allocate, stays an argument to
//! [`crate::scheduler::Scheduler::create`] instead.

/// Total number of job slots. Must be a power of two: slot indices are
/// packed into [`crate::job::JobId`] and the ready queue masks its push/take
/// counters against `SLOT_CAPACITY - 1`.
pub const SLOT_CAPACITY: u32 = 65536;

/// Jobs allocated from a single job buffer before it rolls over to a fresh one.
pub const JOBS_PER_BUFFER: u32 = 64;

/// Bytes of payload storage contributed per job-slot's share of a buffer.
pub const BYTES_PER_BUFFER_JOB: u32 = 1024;

/// Total bytes backing one job buffer.
pub const BUFFER_SIZE_BYTES: u32 = JOBS_PER_BUFFER * BYTES_PER_BUFFER_JOB;

/// Waiter-list capacity per job. Submitting a dependent beyond this yields
/// `SubmitResult::TooManyWaiters`.
pub const MAX_WAITERS: usize = 32;

/// Upper bound on distinct queues registered with a scheduler at once.
pub const MAX_QUEUES: usize = 16;

/// Number of job buffers the pool can hold: one per `JOBS_PER_BUFFER` slots.
pub fn buffer_pool_capacity() -> u32 {
    (SLOT_CAPACITY + JOBS_PER_BUFFER - 1) / JOBS_PER_BUFFER
}
