//! Task definition for the task queue.
//!
//! Tasks represent individual chunks of scheduled work pulled from the queue by
//! worker threads.

use std::ffi::c_void;

/// Function pointer type for task execution.
/// Takes as arguments: task id, context pointer, and executing worker index.
pub type TaskFunction = fn(id: i64, context: *mut c_void, worker_index: usize);

/// Description of one task within a job to be submitted to a
/// [`TaskQueue`](crate::TaskQueue).
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Task {
    /// Function to be executed by the task. Takes as arguments the [`Task::id`],
    /// [`Task::context`] pointer, and executing worker index.
    /// A task with no function is a stop command: dequeues report
    /// [`DequeueTaskResult::Stop`](crate::DequeueTaskResult::Stop) without
    /// consuming it.
    pub function: Option<TaskFunction>,
    /// Context to be passed into the [`Task::function`].
    pub context: *mut c_void,
    /// Identifier of this task within the job.
    pub id: i64,
}

// Safety: Task contains a raw context pointer but is designed for cross-thread
// use in a controlled environment where the submitter ensures pointer validity
// until the task has executed.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Default for Task {
    #[inline(always)]
    fn default() -> Self {
        Self {
            function: None,
            context: std::ptr::null_mut(),
            id: 0,
        }
    }
}

impl Task {
    /// Creates a new task.
    ///
    /// # Arguments
    /// * `function` - Function to be executed by the task.
    /// * `context` - Context pointer to pass to the function.
    /// * `task_id` - Id of this task to be passed into the function.
    #[inline(always)]
    pub fn new(function: TaskFunction, context: *mut c_void, task_id: i64) -> Self {
        Self {
            function: Some(function),
            context,
            id: task_id,
        }
    }

    /// Creates a new task with just a function.
    #[inline(always)]
    pub fn from_function(function: TaskFunction) -> Self {
        Self {
            function: Some(function),
            context: std::ptr::null_mut(),
            id: 0,
        }
    }

    /// Runs the task.
    ///
    /// # Arguments
    /// * `worker_index` - Worker index to pass to the function.
    #[inline(always)]
    pub fn run(&self, worker_index: usize) {
        debug_assert!(
            self.function.is_some(),
            "A stop command is not a runnable task."
        );
        if let Some(function) = self.function {
            function(self.id, self.context, worker_index);
        }
    }
}

impl From<TaskFunction> for Task {
    #[inline(always)]
    fn from(function: TaskFunction) -> Self {
        Task::from_function(function)
    }
}
