//! Fine-grained, dependency-tracking job scheduler: slot-based job storage
//! with generational identifiers, waitable bounded ready queues, parent/
//! child completion accounting, and a bump-allocated, refcounted job buffer
//! arena.
//!
//! A typical host: create a [`Scheduler`], create one or more [`Queue`]s,
//! have each worker thread `acquire_context` a [`JobContext`] bound to one of
//! them, then loop pulling ready jobs with [`JobContext::wait_ready_job`],
//! running their entry point, and retiring them with
//! [`JobContext::complete_job`]. A thread waiting on a specific job's result
//! calls [`JobContext::wait_job`] instead, which cooperatively drains other
//! ready work from its own queue rather than idling — this crate does not
//! implement work stealing between queues.

pub mod buffer;
pub mod config;
pub mod context;
pub mod job;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod slot_table;
pub mod thread_registry;

pub use context::JobContext;
pub use job::{
    CallType, CancelOutcome, CreateJobError, JobDescriptor, JobFn, JobId, QueueId, State,
    SubmitKind, SubmitResult,
};
pub use queue::Queue;
pub use scheduler::{AcquireContextError, Scheduler};

#[cfg(test)]
mod tests;
