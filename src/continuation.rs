//! Completion tracking for jobs submitted to a task queue.
//!
//! A continuation records how many tasks of one job remain and which callback,
//! if any, to invoke once the count reaches zero. Continuations live in a
//! fixed-capacity table and are reachable only through versioned handles.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::continuation_handle::ContinuationHandle;
use crate::index_pool::IndexPool;
use crate::results::AllocateTaskContinuationResult;
use crate::task::TaskFunction;

/// Function pointer type for job completion callbacks.
/// Takes as arguments: the user-provided job id, context pointer, and the index
/// of the worker whose task completed the job.
pub type CompletionFunction = fn(user_id: u64, context: *mut c_void, worker_index: usize);

/// Stores data relevant to tracking task completion and reporting completion
/// for a job.
#[repr(C)]
pub struct TaskContinuation {
    /// Function to call upon completion of the job, if any.
    pub on_completed: Option<CompletionFunction>,
    /// Context to pass to the completion function, if any.
    pub on_completed_context: *mut c_void,
    /// Id provided by the user to identify this job.
    pub user_id: u64,
    /// Generation of this continuation's slot. Bumped on every allocation so
    /// stale handles are detected instead of aliasing a reused slot.
    pub(crate) version: AtomicU32,
    /// Number of tasks not yet reported as complete in the job.
    pub(crate) remaining_task_counter: AtomicI32,
}

impl Default for TaskContinuation {
    fn default() -> Self {
        Self {
            on_completed: None,
            on_completed_context: std::ptr::null_mut(),
            user_id: 0,
            version: AtomicU32::new(0),
            remaining_task_counter: AtomicI32::new(0),
        }
    }
}

impl TaskContinuation {
    /// Gets the number of tasks not yet reported as complete in the job.
    #[inline(always)]
    pub fn remaining_task_count(&self) -> i32 {
        self.remaining_task_counter.load(Ordering::Acquire)
    }
}

/// Wraps a task for easier use with continuations.
///
/// The wrapper context is caller-owned and must remain valid until the wrapped
/// task has executed; the queue only stores a pointer to it.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct WrappedTaskContext {
    /// Function to be invoked by this wrapped task.
    pub function: Option<TaskFunction>,
    /// Context to be passed to this wrapped task.
    pub context: *mut c_void,
    /// Handle of the continuation associated with this wrapped task.
    pub continuation: ContinuationHandle,
    /// Table holding the continuation.
    pub(crate) continuations: *const ContinuationTable,
}

// Safety: the context pointer's validity is the submitter's responsibility, and
// the table pointer refers to the owning queue's table, which outlives every
// task it transports.
unsafe impl Send for WrappedTaskContext {}
unsafe impl Sync for WrappedTaskContext {}

impl Default for WrappedTaskContext {
    #[inline(always)]
    fn default() -> Self {
        Self {
            function: None,
            context: std::ptr::null_mut(),
            continuation: ContinuationHandle::null(),
            continuations: std::ptr::null(),
        }
    }
}

/// Fixed-capacity table of continuation slots.
///
/// Slot allocation and free take a short-hold spinlock over the index pool
/// bookkeeping; the per-task completion path touches slots only through an
/// atomic decrement.
pub(crate) struct ContinuationTable {
    continuations: Box<[UnsafeCell<TaskContinuation>]>,
    /// Guarded by `locker`.
    index_pool: UnsafeCell<IndexPool>,
    continuation_count: AtomicUsize,
    locker: AtomicBool,
}

// Safety: all shared mutable state is either behind `locker` or accessed
// through atomics; slot payload fields are written only while the slot is not
// reachable through any live handle.
unsafe impl Send for ContinuationTable {}
unsafe impl Sync for ContinuationTable {}

impl ContinuationTable {
    pub fn new(capacity: usize) -> Self {
        let continuations = (0..capacity)
            .map(|_| UnsafeCell::new(TaskContinuation::default()))
            .collect();
        Self {
            continuations,
            index_pool: UnsafeCell::new(IndexPool::new(capacity)),
            continuation_count: AtomicUsize::new(0),
            locker: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.continuations.len()
    }

    /// Gets the number of continuations active in the table.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.continuation_count.load(Ordering::Relaxed)
    }

    /// Attempts to allocate a continuation for a set of tasks.
    /// Cannot block; reports `Contested` if another thread holds the table lock.
    pub fn try_allocate(
        &self,
        task_count: usize,
        user_id: u64,
        on_completed: Option<CompletionFunction>,
        on_completed_context: *mut c_void,
    ) -> (AllocateTaskContinuationResult, ContinuationHandle) {
        if self
            .locker
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return (
                AllocateTaskContinuationResult::Contested,
                ContinuationHandle::null(),
            );
        }
        // We have the lock.
        debug_assert!(self.continuation_count.load(Ordering::Relaxed) <= self.continuations.len());
        let result = if self.continuation_count.load(Ordering::Relaxed) >= self.continuations.len()
        {
            // No room.
            (
                AllocateTaskContinuationResult::Full,
                ContinuationHandle::null(),
            )
        } else {
            let index = unsafe { (*self.index_pool.get()).take() };
            let slot = self.continuations[index].get();
            // The slot is unreachable through any live handle until the new
            // handle escapes below, so plain field writes cannot race.
            let new_version = unsafe {
                let new_version = (*slot).version.load(Ordering::Relaxed) + 1;
                (*slot).on_completed = on_completed;
                (*slot).on_completed_context = on_completed_context;
                (*slot).user_id = user_id;
                (*slot)
                    .remaining_task_counter
                    .store(task_count as i32, Ordering::Relaxed);
                (*slot).version.store(new_version, Ordering::Release);
                new_version
            };
            self.continuation_count.fetch_add(1, Ordering::Relaxed);
            (
                AllocateTaskContinuationResult::Success,
                ContinuationHandle::new(index as u32, new_version),
            )
        };
        self.locker.store(false, Ordering::Release);
        result
    }

    /// Checks whether all tasks composing a job, as reported to the
    /// continuation, have completed.
    pub fn is_complete(&self, handle: ContinuationHandle) -> bool {
        debug_assert!(
            handle.initialized(),
            "This continuation handle was never initialized."
        );
        if !handle.initialized() {
            return false;
        }
        let index = handle.index() as usize;
        debug_assert!(
            index < self.continuations.len(),
            "This continuation handle refers to an invalid index."
        );
        if index >= self.continuations.len() {
            return false;
        }
        let slot = unsafe { &*self.continuations[index].get() };
        slot.version.load(Ordering::Acquire) > handle.version()
            || slot.remaining_task_counter.load(Ordering::Acquire) == 0
    }

    /// Retrieves a pointer to the continuation backing the given handle, or
    /// `None` if the handle's slot has since been freed or reused.
    pub fn get(&self, handle: ContinuationHandle) -> Option<NonNull<TaskContinuation>> {
        debug_assert!(
            handle.initialized(),
            "This continuation handle was never initialized."
        );
        if !handle.initialized() {
            return None;
        }
        let index = handle.index() as usize;
        debug_assert!(
            index < self.continuations.len(),
            "This continuation handle refers to an invalid index."
        );
        if index >= self.continuations.len() {
            return None;
        }
        let slot = self.continuations[index].get();
        if unsafe { (*slot).version.load(Ordering::Acquire) } != handle.version() {
            return None;
        }
        NonNull::new(slot)
    }

    /// Returns a completed continuation's slot to the pool.
    /// Only the thread that observed the remaining count reach zero may call
    /// this, so a slot is freed at most once per allocation.
    fn free(&self, index: u32) {
        let backoff = Backoff::new();
        while self
            .locker
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            crate::task_queue::wait(&backoff);
        }
        // We have the lock.
        unsafe { (*self.index_pool.get()).return_id(index as usize) };
        self.continuation_count.fetch_sub(1, Ordering::Relaxed);
        self.locker.store(false, Ordering::Release);
    }

    /// Restores the table to a freshly constructed state without reallocating.
    pub fn reset(&mut self) {
        debug_assert!(
            !self.locker.load(Ordering::Relaxed),
            "There appears to be a thread actively working still. That's invalid."
        );
        for slot in self.continuations.iter_mut() {
            *slot.get_mut() = TaskContinuation::default();
        }
        self.index_pool.get_mut().clear();
        self.continuation_count.store(0, Ordering::Relaxed);
    }
}

/// Task function used by completion wrapped tasks. Runs the wrapped inner task,
/// then reports its completion to the continuation; the decrement that reaches
/// zero invokes the completion callback and frees the continuation's slot.
///
/// The context must point to a live [`WrappedTaskContext`]; the wrapping
/// helpers uphold this by requiring the context storage to outlive execution.
pub(crate) fn run_and_mark_as_complete(task_id: i64, context: *mut c_void, worker_index: usize) {
    let wrapper = unsafe { &*(context as *const WrappedTaskContext) };
    debug_assert!(
        wrapper.function.is_some(),
        "A wrapped task must carry an inner function."
    );
    if let Some(function) = wrapper.function {
        function(task_id, wrapper.context, worker_index);
    }
    // The wrapper storage may be reclaimed by its owner the moment the counter
    // reaches zero, so everything needed afterwards is copied out first.
    let continuation_handle = wrapper.continuation;
    let continuations = unsafe { &*wrapper.continuations };
    let Some(continuation) = continuations.get(continuation_handle) else {
        debug_assert!(
            false,
            "A continuation must stay live until its last task reports completion."
        );
        return;
    };
    let continuation = unsafe { continuation.as_ref() };
    let old_count = continuation.remaining_task_counter.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(
        old_count >= 1,
        "The counter should not go negative. Was a completion reported twice?"
    );
    if old_count == 1 {
        // This entire job has completed.
        if let Some(on_completed) = continuation.on_completed {
            on_completed(
                continuation.user_id,
                continuation.on_completed_context,
                worker_index,
            );
        }
        // Free this continuation slot.
        continuations.free(continuation_handle.index());
    }
}
