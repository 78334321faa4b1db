//! Work distribution for real-time simulation.
//!
//! This crate provides a fixed-capacity multi-producer/multi-consumer task
//! queue with job completion tracking, built for cooperative pools of worker
//! threads that are supplied and driven by the caller. It includes:
//!
//! - [`TaskQueue`]: a bounded ring buffer of tasks with lock-free dequeues and
//!   batch enqueues
//! - [`Task`]: a unit of work identified by an id and a context pointer
//! - [`ContinuationHandle`]: a versioned handle tracking completion of a group
//!   of tasks
//! - [`TaskQueue::for_loop`] and [`TaskQueue::for_each`]: parallel for loops
//!   that use the calling thread as an additional worker
//!
//! Nothing allocates after construction and no operation blocks the caller
//! except the explicitly blocking helpers, each of which has a non-blocking
//! `try_*` counterpart that reports a status instead.

mod continuation;
mod continuation_handle;
mod index_pool;
mod results;
mod task;
mod task_queue;

// Re-export public API
pub use continuation::{CompletionFunction, TaskContinuation, WrappedTaskContext};
pub use continuation_handle::ContinuationHandle;
pub use results::{AllocateTaskContinuationResult, DequeueTaskResult, EnqueueTaskResult};
pub use task::{Task, TaskFunction};
pub use task_queue::{TaskQueue, DEFAULT_CONTINUATION_CAPACITY, DEFAULT_TASK_CAPACITY};
