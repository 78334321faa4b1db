//! Multithreaded task queue for cooperative worker pools.
//!
//! The queue is a fixed-capacity ring buffer of task descriptors shared by any
//! number of producers and consumers. Dequeues are lock-free; enqueues
//! serialize batches through a short-hold spinlock. Nothing allocates after
//! construction, and nothing blocks except the explicitly blocking helpers,
//! which express all waiting as bounded spinning with escalating backoff.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::{Backoff, CachePadded};
use log::trace;

use crate::continuation::{
    run_and_mark_as_complete, CompletionFunction, ContinuationTable, TaskContinuation,
    WrappedTaskContext,
};
use crate::continuation_handle::ContinuationHandle;
use crate::results::{AllocateTaskContinuationResult, DequeueTaskResult, EnqueueTaskResult};
use crate::task::{Task, TaskFunction};

/// Default maximum number of tasks the queue can hold at one moment.
pub const DEFAULT_TASK_CAPACITY: usize = 1024;
/// Default maximum number of continuations that can be live at one moment.
pub const DEFAULT_CONTINUATION_CAPACITY: usize = 256;

/// Task lists no longer than this are built in stack storage by the loop
/// helpers; longer lists fall back to a heap allocation outside the hot path.
const INLINE_TASK_CAPACITY: usize = 64;

/// Escalating wait shared by every blocking-style call: spin, then yield, then
/// a brief sleep once the backoff saturates. The lock-free dequeue path never
/// uses it.
#[inline]
pub(crate) fn wait(backoff: &Backoff) {
    if backoff.is_completed() {
        thread::sleep(Duration::from_micros(1));
    } else {
        backoff.snooze();
    }
}

/// Multithreaded task queue with job completion tracking.
///
/// Any thread may enqueue batches of tasks and any thread may dequeue them;
/// dequeue order is FIFO with respect to the order batches became visible.
/// A task whose function is absent is a stop command: it is reported to every
/// dequeuer and never consumed, and no further tasks may be enqueued after it.
pub struct TaskQueue {
    tasks: Box<[UnsafeCell<Task>]>,
    task_mask: i64,
    /// Next logical index to claim for execution.
    task_index: CachePadded<AtomicI64>,
    /// Boundary past which no task is visible to consumers yet.
    written_task_index: CachePadded<AtomicI64>,
    /// Boundary reserved by an in-progress producer. Guarded by `task_locker`.
    allocated_task_index: AtomicI64,
    task_locker: CachePadded<AtomicBool>,
    /// Boxed so wrapped task contexts can hold a stable pointer to the table.
    continuations: Box<ContinuationTable>,
}

// Safety: TaskQueue is designed for concurrent access. Slots are only read
// before a claim that validates them or written inside the producer lock, and
// all other shared state is atomic.
unsafe impl Send for TaskQueue {}
unsafe impl Sync for TaskQueue {}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Constructs a new task queue with the default capacities.
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_TASK_CAPACITY, DEFAULT_CONTINUATION_CAPACITY)
    }

    /// Constructs a new task queue.
    ///
    /// # Arguments
    /// * `maximum_task_capacity` - Maximum number of tasks to allocate space for.
    ///   Rounded up to the nearest power of 2.
    /// * `maximum_continuation_capacity` - Maximum number of continuations to
    ///   allocate space for. If more continuations exist at any one moment,
    ///   attempts to create new continuations may have to stall until space is
    ///   available.
    pub fn with_capacities(
        maximum_task_capacity: usize,
        maximum_continuation_capacity: usize,
    ) -> Self {
        assert!(
            maximum_task_capacity > 0 && maximum_continuation_capacity > 0,
            "Queue capacities must be nonzero."
        );
        let task_capacity = maximum_task_capacity.next_power_of_two();
        let tasks: Box<[UnsafeCell<Task>]> = (0..task_capacity)
            .map(|_| UnsafeCell::new(Task::default()))
            .collect();
        Self {
            tasks,
            task_mask: task_capacity as i64 - 1,
            task_index: CachePadded::new(AtomicI64::new(0)),
            written_task_index: CachePadded::new(AtomicI64::new(0)),
            allocated_task_index: AtomicI64::new(0),
            task_locker: CachePadded::new(AtomicBool::new(false)),
            continuations: Box::new(ContinuationTable::new(maximum_continuation_capacity)),
        }
    }

    /// Returns the task queue to a fresh state without reallocating.
    pub fn reset(&mut self) {
        debug_assert!(
            !self.task_locker.load(Ordering::Relaxed),
            "There appears to be a thread actively working still. That's invalid."
        );
        self.task_index.store(0, Ordering::Relaxed);
        self.written_task_index.store(0, Ordering::Relaxed);
        self.allocated_task_index.store(0, Ordering::Relaxed);
        self.continuations.reset();
    }

    /// Gets the queue's capacity for tasks.
    #[inline(always)]
    pub fn task_capacity(&self) -> usize {
        self.tasks.len()
    }

    /// Gets the queue's capacity for continuations.
    #[inline(always)]
    pub fn continuation_capacity(&self) -> usize {
        self.continuations.capacity()
    }

    /// Gets the number of tasks active in the queue without taking the
    /// producer lock; if other threads are mutating the queue, the reported
    /// count may be stale.
    #[inline(always)]
    pub fn unsafe_task_count(&self) -> usize {
        let written = self.written_task_index.load(Ordering::Relaxed);
        let next = self.task_index.load(Ordering::Relaxed);
        (written - next).max(0) as usize
    }

    /// Gets the number of tasks active in the queue.
    pub fn task_count(&self) -> usize {
        let backoff = Backoff::new();
        while self
            .task_locker
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            wait(&backoff);
        }
        let written = self.written_task_index.load(Ordering::Relaxed);
        let next = self.task_index.load(Ordering::Relaxed);
        self.task_locker.store(false, Ordering::Release);
        (written - next).max(0) as usize
    }

    /// Gets the number of continuations active in the queue.
    #[inline(always)]
    pub fn continuation_count(&self) -> usize {
        self.continuations.count()
    }

    /// Attempts to dequeue a task. Lock-free; a claim that loses its race is
    /// retried from a fresh sample, and `Stop` is reported without consuming
    /// the stop command so that every dequeuer observes it.
    ///
    /// # Returns
    /// Tuple of (result status, dequeued task if any).
    pub fn try_dequeue(&self) -> (DequeueTaskResult, Option<Task>) {
        loop {
            // No lock taken. We sample the currently visible frontiers and
            // treat the dequeue as a transaction; if the claim below fails we
            // make no changes and sample again.
            let next_task_index = self.task_index.load(Ordering::Acquire);
            let sampled_written_index = self.written_task_index.load(Ordering::Acquire);
            if next_task_index >= sampled_written_index {
                return (DequeueTaskResult::Empty, None);
            }
            let slot = self.tasks[(next_task_index & self.task_mask) as usize].get();
            // The slot is read before the claim. A successful claim orders this
            // read before any producer reuse of the slot (the producer must
            // observe the advanced frontier first); a failed claim discards the
            // value, which may have raced with such a reuse.
            let task = unsafe { slot.read_volatile() };
            if task.function.is_none() {
                return (DequeueTaskResult::Stop, None);
            }
            // A dequeue has a fixed contention window on a single value, so
            // there is no point in backing off; the next attempt is not any
            // more likely to be blocked.
            if self
                .task_index
                .compare_exchange(
                    next_task_index,
                    next_task_index + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }
            return (DequeueTaskResult::Success, Some(task));
        }
    }

    /// Attempts to dequeue a task and run it.
    ///
    /// # Arguments
    /// * `worker_index` - Index of the worker to pass into the task function.
    #[inline(always)]
    pub fn try_dequeue_and_run(&self, worker_index: usize) -> DequeueTaskResult {
        let (result, task) = self.try_dequeue();
        if let Some(task) = task {
            task.run(worker_index);
        }
        result
    }

    /// Reserves and fills ring slots for a batch. The caller must hold the
    /// producer lock or otherwise guarantee exclusive producer access, and
    /// publishes the returned end index itself.
    fn try_enqueue_tasks_internal(&self, tasks: &[Task]) -> (EnqueueTaskResult, i64) {
        debug_assert!(
            !tasks.is_empty(),
            "Probably shouldn't be trying to enqueue zero tasks."
        );
        #[cfg(debug_assertions)]
        {
            let written = self.written_task_index.load(Ordering::Relaxed);
            if written > 0 {
                let last =
                    unsafe { self.tasks[((written - 1) & self.task_mask) as usize].get().read() };
                debug_assert!(
                    last.function.is_some(),
                    "No more tasks should be written after a stop command."
                );
            }
        }
        let task_start_index = self.allocated_task_index.load(Ordering::Relaxed);
        let task_end_index = task_start_index + tasks.len() as i64;
        if task_end_index - self.task_index.load(Ordering::Acquire) > self.tasks.len() as i64 {
            // Out of space in the ring buffer. Writing would overwrite tasks
            // that haven't been completed yet.
            return (EnqueueTaskResult::Full, 0);
        }
        self.allocated_task_index
            .store(task_end_index, Ordering::Relaxed);
        let wrapped_inclusive_start = (task_start_index & self.task_mask) as usize;
        let wrapped_exclusive_end = (task_end_index & self.task_mask) as usize;
        let buffer = self.tasks.as_ptr() as *mut Task;
        unsafe {
            if wrapped_exclusive_end > wrapped_inclusive_start {
                // The whole task block fits as one contiguous copy.
                ptr::copy_nonoverlapping(
                    tasks.as_ptr(),
                    buffer.add(wrapped_inclusive_start),
                    tasks.len(),
                );
            } else {
                // The range wraps past the buffer end; copy as two segments.
                let first_region_count = self.tasks.len() - wrapped_inclusive_start;
                ptr::copy_nonoverlapping(
                    tasks.as_ptr(),
                    buffer.add(wrapped_inclusive_start),
                    first_region_count,
                );
                ptr::copy_nonoverlapping(
                    tasks.as_ptr().add(first_region_count),
                    buffer,
                    tasks.len() - first_region_count,
                );
            }
        }
        (EnqueueTaskResult::Success, task_end_index)
    }

    /// Tries to append a set of tasks to the queue. Does not take the producer
    /// lock; cannot return [`EnqueueTaskResult::Contested`].
    ///
    /// # Safety
    /// Must not be used while other threads could be performing task enqueues
    /// or task dequeues.
    pub unsafe fn try_enqueue_tasks_unsafely(&self, tasks: &[Task]) -> EnqueueTaskResult {
        if tasks.is_empty() {
            return EnqueueTaskResult::Success;
        }
        let (result, task_end_index) = self.try_enqueue_tasks_internal(tasks);
        if result == EnqueueTaskResult::Success {
            self.written_task_index
                .store(task_end_index, Ordering::Relaxed);
        }
        result
    }

    /// Tries to append a set of tasks to the queue if the producer lock is
    /// uncontested. The batch becomes visible to consumers all at once or not
    /// at all.
    pub fn try_enqueue_tasks(&self, tasks: &[Task]) -> EnqueueTaskResult {
        if tasks.is_empty() {
            return EnqueueTaskResult::Success;
        }
        if self
            .task_locker
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return EnqueueTaskResult::Contested;
        }
        // We have the lock.
        let (result, task_end_index) = self.try_enqueue_tasks_internal(tasks);
        if result == EnqueueTaskResult::Success {
            // A single release store publishes the whole batch; consumers can
            // never observe a partially written batch.
            self.written_task_index
                .store(task_end_index, Ordering::Release);
        }
        self.task_locker.store(false, Ordering::Release);
        result
    }

    /// Appends a set of tasks to the queue, retrying until submission succeeds.
    ///
    /// If the queue is full, the head of the remaining batch is executed inline
    /// on the calling thread instead of waiting for room. An inlined task that
    /// itself enqueues into this queue recurses through this path; the
    /// recursion depth is unbounded.
    ///
    /// # Arguments
    /// * `tasks` - Tasks composing the job.
    /// * `worker_index` - Worker index to pass to inline-executed tasks if the
    ///   task buffer is full.
    pub fn enqueue_tasks(&self, tasks: &[Task], worker_index: usize) {
        let mut tasks = tasks;
        let backoff = Backoff::new();
        loop {
            match self.try_enqueue_tasks(tasks) {
                EnqueueTaskResult::Success => return,
                EnqueueTaskResult::Full => {
                    // No room, so clearly there's plenty of work available to
                    // execute; run one task inline.
                    tasks[0].run(worker_index);
                    if tasks.len() == 1 {
                        return;
                    }
                    tasks = &tasks[1..];
                }
                EnqueueTaskResult::Contested => wait(&backoff),
            }
        }
    }

    /// Tries to enqueue the stop command.
    pub fn try_enqueue_stop(&self) -> EnqueueTaskResult {
        self.try_enqueue_tasks(&[Task::default()])
    }

    /// Enqueues the stop command, retrying until submission succeeds.
    /// If the task buffer is full, this dequeues and runs tasks inline to make
    /// room.
    ///
    /// # Arguments
    /// * `worker_index` - Worker index to pass to any inline-executed tasks.
    pub fn enqueue_stop(&self, worker_index: usize) {
        let stop = [Task::default()];
        let backoff = Backoff::new();
        loop {
            match self.try_enqueue_tasks(&stop) {
                EnqueueTaskResult::Success => {
                    trace!("stop command enqueued");
                    return;
                }
                EnqueueTaskResult::Full => {
                    let dequeue_result = self.try_dequeue_and_run(worker_index);
                    debug_assert!(
                        dequeue_result != DequeueTaskResult::Stop,
                        "We're trying to enqueue a stop, we shouldn't have found one already present!"
                    );
                }
                EnqueueTaskResult::Contested => wait(&backoff),
            }
        }
    }

    /// Tries to enqueue the stop command without taking the producer lock;
    /// cannot return [`EnqueueTaskResult::Contested`].
    ///
    /// # Safety
    /// Must not be used while other threads could be performing task enqueues
    /// or task dequeues.
    pub unsafe fn try_enqueue_stop_unsafely(&self) -> EnqueueTaskResult {
        self.try_enqueue_tasks_unsafely(&[Task::default()])
    }

    /// Attempts to allocate a continuation for a set of tasks.
    ///
    /// # Arguments
    /// * `task_count` - Number of tasks associated with the continuation.
    /// * `user_id` - User id to associate with the continuation.
    /// * `on_completed` - Function to execute upon completing all associated
    ///   tasks, if any.
    /// * `on_completed_context` - Context pointer to pass into the completion
    ///   function.
    ///
    /// # Returns
    /// Tuple of (result status, handle of the continuation if allocation
    /// succeeded).
    pub fn try_allocate_continuation(
        &self,
        task_count: usize,
        user_id: u64,
        on_completed: Option<CompletionFunction>,
        on_completed_context: *mut c_void,
    ) -> (AllocateTaskContinuationResult, ContinuationHandle) {
        self.continuations
            .try_allocate(task_count, user_id, on_completed, on_completed_context)
    }

    /// Allocates a continuation for a set of tasks, retrying until allocation
    /// succeeds. If the continuation buffer is full, tasks are dequeued and run
    /// inline while waiting for a slot to free up; if nothing is consuming
    /// tasks either, this blocks forever.
    ///
    /// # Arguments
    /// * `task_count` - Number of tasks associated with the continuation.
    /// * `worker_index` - Worker index to pass to any inline-executed tasks.
    /// * `user_id` - User id to associate with the continuation.
    /// * `on_completed` - Function to execute upon completing all associated
    ///   tasks, if any.
    /// * `on_completed_context` - Context pointer to pass into the completion
    ///   function.
    pub fn allocate_continuation(
        &self,
        task_count: usize,
        worker_index: usize,
        user_id: u64,
        on_completed: Option<CompletionFunction>,
        on_completed_context: *mut c_void,
    ) -> ContinuationHandle {
        let backoff = Backoff::new();
        loop {
            let (result, handle) = self.try_allocate_continuation(
                task_count,
                user_id,
                on_completed,
                on_completed_context,
            );
            match result {
                AllocateTaskContinuationResult::Success => return handle,
                AllocateTaskContinuationResult::Full => {
                    let dequeue_result = self.try_dequeue_and_run(worker_index);
                    debug_assert!(
                        dequeue_result != DequeueTaskResult::Stop,
                        "We're trying to allocate a continuation, we shouldn't have run into a stop command!"
                    );
                }
                AllocateTaskContinuationResult::Contested => wait(&backoff),
            }
        }
    }

    /// Checks whether all tasks composing a job, as reported to the
    /// continuation, have completed.
    #[inline(always)]
    pub fn is_complete(&self, continuation_handle: ContinuationHandle) -> bool {
        self.continuations.is_complete(continuation_handle)
    }

    /// Retrieves a pointer to the continuation backing the given handle, or
    /// `None` if the handle's slot has since been freed or reused.
    ///
    /// # Safety
    /// The pointed-to continuation becomes invalid the moment the continuation
    /// completes; the caller must not dereference the pointer past that point.
    pub unsafe fn get_continuation(
        &self,
        continuation_handle: ContinuationHandle,
    ) -> Option<NonNull<TaskContinuation>> {
        self.continuations.get(continuation_handle)
    }

    /// Wraps a set of tasks in continuation tasks that will report their
    /// completion.
    ///
    /// # Arguments
    /// * `continuation_handle` - Handle of the continuation to report to.
    /// * `tasks` - Tasks to wrap.
    /// * `wrapped_task_contexts` - Contexts to be used for the wrapped tasks.
    ///   This storage must remain valid until the wrapped tasks complete.
    /// * `wrapped_tasks` - Destination for the tasks created by this function.
    pub fn create_completion_wrapped_tasks(
        &self,
        continuation_handle: ContinuationHandle,
        tasks: &[Task],
        wrapped_task_contexts: &mut [WrappedTaskContext],
        wrapped_tasks: &mut [Task],
    ) {
        debug_assert!(
            tasks.len() == wrapped_tasks.len() && tasks.len() == wrapped_task_contexts.len(),
            "Mismatched wrapping spans are probably a bug!"
        );
        let count = tasks.len().min(wrapped_tasks.len()).min(wrapped_task_contexts.len());
        for i in 0..count {
            let source = &tasks[i];
            wrapped_task_contexts[i] = WrappedTaskContext {
                function: source.function,
                context: source.context,
                continuation: continuation_handle,
                continuations: &*self.continuations,
            };
            wrapped_tasks[i] = Task::new(
                run_and_mark_as_complete,
                &mut wrapped_task_contexts[i] as *mut WrappedTaskContext as *mut c_void,
                source.id,
            );
        }
    }

    /// Enqueues a for loop onto the queue without taking the producer lock;
    /// cannot return [`EnqueueTaskResult::Contested`]. One task is created per
    /// index in `[inclusive_start_index, exclusive_end_index)`.
    ///
    /// # Safety
    /// Must not be used while other threads could be performing task enqueues
    /// or task dequeues.
    pub unsafe fn try_enqueue_for_unsafely(
        &self,
        function: TaskFunction,
        context: *mut c_void,
        inclusive_start_index: i64,
        exclusive_end_index: i64,
    ) -> EnqueueTaskResult {
        let task_count = (exclusive_end_index - inclusive_start_index).max(0) as usize;
        if task_count == 0 {
            return EnqueueTaskResult::Success;
        }
        let mut inline_tasks;
        let mut heap_tasks;
        let tasks: &mut [Task] = if task_count <= INLINE_TASK_CAPACITY {
            inline_tasks = [Task::default(); INLINE_TASK_CAPACITY];
            &mut inline_tasks[..task_count]
        } else {
            heap_tasks = vec![Task::default(); task_count];
            &mut heap_tasks
        };
        for (i, task) in tasks.iter_mut().enumerate() {
            *task = Task::new(function, context, inclusive_start_index + i as i64);
        }
        self.try_enqueue_tasks_unsafely(tasks)
    }

    /// Enqueues a for loop onto the queue, retrying until submission succeeds.
    /// One task is created per index in
    /// `[inclusive_start_index, exclusive_end_index)`; this does not wait for
    /// any of them to execute. If the queue is full, loop tasks are run inline
    /// while waiting for room.
    ///
    /// # Arguments
    /// * `function` - Function to execute on each iteration of the loop.
    /// * `context` - Context pointer to pass into each task execution.
    /// * `inclusive_start_index` - Inclusive start index of the loop range.
    /// * `exclusive_end_index` - Exclusive end index of the loop range.
    /// * `worker_index` - Worker index to pass to any inline-executed tasks.
    pub fn enqueue_for(
        &self,
        function: TaskFunction,
        context: *mut c_void,
        inclusive_start_index: i64,
        exclusive_end_index: i64,
        worker_index: usize,
    ) {
        let task_count = (exclusive_end_index - inclusive_start_index).max(0) as usize;
        if task_count == 0 {
            return;
        }
        let mut inline_tasks;
        let mut heap_tasks;
        let tasks: &mut [Task] = if task_count <= INLINE_TASK_CAPACITY {
            inline_tasks = [Task::default(); INLINE_TASK_CAPACITY];
            &mut inline_tasks[..task_count]
        } else {
            heap_tasks = vec![Task::default(); task_count];
            &mut heap_tasks
        };
        for (i, task) in tasks.iter_mut().enumerate() {
            *task = Task::new(function, context, inclusive_start_index + i as i64);
        }
        self.enqueue_tasks(tasks, worker_index);
    }

    /// Submits a set of tasks representing a for loop over the given indices
    /// and returns when all loop iterations are complete.
    ///
    /// The calling thread executes the first index itself without yielding its
    /// timeslice, then helps run queued work until the loop's continuation
    /// reports completion. If the queue is full during submission, loop tasks
    /// are executed inline instead of waiting for room.
    ///
    /// # Arguments
    /// * `function` - Function to execute on each iteration of the loop.
    /// * `context` - Context pointer to pass into each iteration of the loop.
    /// * `inclusive_start_index` - Inclusive start index of the loop range.
    /// * `exclusive_end_index` - Exclusive end index of the loop range.
    /// * `worker_index` - Index of the currently executing worker.
    pub fn for_loop(
        &self,
        function: TaskFunction,
        context: *mut c_void,
        inclusive_start_index: i64,
        exclusive_end_index: i64,
        worker_index: usize,
    ) {
        let iteration_count = exclusive_end_index - inclusive_start_index;
        if iteration_count <= 0 {
            return;
        }
        if iteration_count == 1 {
            function(inclusive_start_index, context, worker_index);
            return;
        }
        // Only indices beyond the first are submitted to the queue. The
        // current thread is responsible for at least the first index.
        let task_count = (iteration_count - 1) as usize;
        // Queued tasks point into this context storage, so it must stay alive
        // until the completion wait below observes every one of them finished.
        let mut inline_contexts;
        let mut heap_contexts;
        let mut inline_tasks;
        let mut heap_tasks;
        let contexts: &mut [WrappedTaskContext] = if task_count <= INLINE_TASK_CAPACITY {
            inline_contexts = [WrappedTaskContext::default(); INLINE_TASK_CAPACITY];
            &mut inline_contexts[..task_count]
        } else {
            heap_contexts = vec![WrappedTaskContext::default(); task_count];
            &mut heap_contexts
        };
        let tasks: &mut [Task] = if task_count <= INLINE_TASK_CAPACITY {
            inline_tasks = [Task::default(); INLINE_TASK_CAPACITY];
            &mut inline_tasks[..task_count]
        } else {
            heap_tasks = vec![Task::default(); task_count];
            &mut heap_tasks
        };
        let continuation_handle =
            self.allocate_continuation(task_count, worker_index, 0, None, ptr::null_mut());
        for i in 0..task_count {
            contexts[i] = WrappedTaskContext {
                function: Some(function),
                context,
                continuation: continuation_handle,
                continuations: &*self.continuations,
            };
            tasks[i] = Task::new(
                run_and_mark_as_complete,
                &mut contexts[i] as *mut WrappedTaskContext as *mut c_void,
                inclusive_start_index + 1 + i as i64,
            );
        }
        let mut pending: &[Task] = tasks;
        let backoff = Backoff::new();
        loop {
            match self.try_enqueue_tasks(pending) {
                EnqueueTaskResult::Success => break,
                EnqueueTaskResult::Full => {
                    // The task buffer is full, so there's enough work for other
                    // threads to keep running productively; execute the head
                    // locally.
                    pending[0].run(worker_index);
                    if pending.len() == 1 {
                        break;
                    }
                    pending = &pending[1..];
                }
                EnqueueTaskResult::Contested => wait(&backoff),
            }
        }
        // Queued indices may now be executing on other workers. This thread
        // should not relinquish its timeslice; it immediately begins working on
        // the first index.
        function(inclusive_start_index, context, worker_index);

        // The first index is done; seek out other work until the whole job is
        // complete.
        let backoff = Backoff::new();
        while !self.is_complete(continuation_handle) {
            let (dequeue_result, task) = self.try_dequeue();
            match dequeue_result {
                DequeueTaskResult::Stop => {
                    // An incomplete loop can only run into a stop if the loop
                    // was enqueued after the stop command, which the enqueue
                    // path asserts against.
                    debug_assert!(
                        false,
                        "Did you enqueue this for loop *after* some thread enqueued a stop command? That's illegal!"
                    );
                    return;
                }
                DequeueTaskResult::Success => {
                    if let Some(task) = task {
                        task.run(worker_index);
                    }
                    backoff.reset();
                }
                DequeueTaskResult::Empty => wait(&backoff),
            }
        }
    }

    /// Submits a for loop over the given indices with a closure body and
    /// returns when all iterations are complete.
    ///
    /// The closure is borrowed for the duration of the call; since
    /// [`TaskQueue::for_loop`] does not return until every iteration has
    /// executed, the borrow is released only after the last iteration finishes.
    ///
    /// # Arguments
    /// * `inclusive_start_index` - Inclusive start index of the loop range.
    /// * `exclusive_end_index` - Exclusive end index of the loop range.
    /// * `worker_index` - Index of the currently executing worker.
    /// * `body` - Closure invoked with each index and the executing worker's
    ///   index.
    pub fn for_each<F>(
        &self,
        inclusive_start_index: i64,
        exclusive_end_index: i64,
        worker_index: usize,
        body: &F,
    ) where
        F: Fn(i64, usize) + Sync,
    {
        fn call_body<F: Fn(i64, usize) + Sync>(
            id: i64,
            context: *mut c_void,
            worker_index: usize,
        ) {
            let body = unsafe { &*(context as *const F) };
            body(id, worker_index);
        }
        self.for_loop(
            call_body::<F>,
            body as *const F as *mut c_void,
            inclusive_start_index,
            exclusive_end_index,
            worker_index,
        );
    }

    /// Runs the calling thread as a worker until a stop command is observed.
    /// Threads are supplied and owned by the caller; this only drives them.
    ///
    /// # Arguments
    /// * `worker_index` - Index of the worker this thread acts as.
    pub fn worker_loop(&self, worker_index: usize) {
        trace!("worker {worker_index} entering work loop");
        let backoff = Backoff::new();
        loop {
            match self.try_dequeue_and_run(worker_index) {
                DequeueTaskResult::Stop => {
                    trace!("worker {worker_index} observed stop");
                    return;
                }
                DequeueTaskResult::Success => backoff.reset(),
                DequeueTaskResult::Empty => wait(&backoff),
            }
        }
    }
}
