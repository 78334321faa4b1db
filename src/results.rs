//! Result statuses for queue operations.
//!
//! Contention and capacity exhaustion are expected, recoverable conditions;
//! callers choose their own retry or fallback policy.

/// Describes the result status of a dequeue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DequeueTaskResult {
    /// A task was successfully dequeued.
    Success = 0,
    /// The queue was empty, but may have more tasks in the future.
    Empty = 1,
    /// The queue has been terminated and all threads seeking work should stop.
    Stop = 2,
}

/// Describes the result of a task enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnqueueTaskResult {
    /// The tasks were successfully enqueued.
    Success = 0,
    /// The enqueue attempt was blocked by concurrent access.
    Contested = 1,
    /// The enqueue attempt was blocked because no space remained in the tasks buffer.
    Full = 2,
}

/// Describes the result of a continuation allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AllocateTaskContinuationResult {
    /// The continuation was successfully allocated.
    Success = 0,
    /// The allocation attempt was blocked by concurrent access.
    Contested = 1,
    /// The queue's continuation buffer is full and can't hold the continuation.
    Full = 2,
}
