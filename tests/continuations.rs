//! Continuation lifecycle coverage: counting, completion callbacks, slot
//! reuse, and stale handle detection.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use task_queue::{
    AllocateTaskContinuationResult, DequeueTaskResult, EnqueueTaskResult, Task, TaskQueue,
    WrappedTaskContext,
};

fn noop(_id: i64, _context: *mut c_void, _worker_index: usize) {}

#[repr(C)]
#[derive(Default)]
struct CallbackRecord {
    observed_user_id: AtomicU64,
    calls: AtomicUsize,
}

fn record_completion(user_id: u64, context: *mut c_void, _worker_index: usize) {
    let record = unsafe { &*(context as *const CallbackRecord) };
    record.observed_user_id.store(user_id, Ordering::Relaxed);
    record.calls.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn completes_after_exactly_task_count_decrements() {
    let queue = TaskQueue::with_capacities(64, 8);
    let (result, handle) = queue.try_allocate_continuation(3, 0, None, ptr::null_mut());
    assert_eq!(result, AllocateTaskContinuationResult::Success);
    assert!(handle.initialized());
    assert!(!queue.is_complete(handle));
    assert_eq!(queue.continuation_count(), 1);

    let inner: Vec<Task> = (0..3).map(|i| Task::new(noop, ptr::null_mut(), i)).collect();
    let mut contexts = vec![WrappedTaskContext::default(); 3];
    let mut wrapped = vec![Task::default(); 3];
    queue.create_completion_wrapped_tasks(handle, &inner, &mut contexts, &mut wrapped);

    wrapped[0].run(0);
    assert!(!queue.is_complete(handle));
    wrapped[1].run(0);
    assert!(!queue.is_complete(handle));
    wrapped[2].run(0);
    assert!(queue.is_complete(handle));
    assert_eq!(queue.continuation_count(), 0);
}

#[test]
fn completion_callback_fires_once_with_the_user_id() {
    let queue = TaskQueue::with_capacities(64, 8);
    let record = CallbackRecord::default();
    let (result, handle) = queue.try_allocate_continuation(
        2,
        0xfeed_beef,
        Some(record_completion),
        &record as *const CallbackRecord as *mut c_void,
    );
    assert_eq!(result, AllocateTaskContinuationResult::Success);

    let inner = [
        Task::new(noop, ptr::null_mut(), 0),
        Task::new(noop, ptr::null_mut(), 1),
    ];
    let mut contexts = [WrappedTaskContext::default(); 2];
    let mut wrapped = [Task::default(); 2];
    queue.create_completion_wrapped_tasks(handle, &inner, &mut contexts, &mut wrapped);

    wrapped[0].run(0);
    assert_eq!(record.calls.load(Ordering::Relaxed), 0);
    wrapped[1].run(0);
    assert_eq!(record.calls.load(Ordering::Relaxed), 1);
    assert_eq!(record.observed_user_id.load(Ordering::Relaxed), 0xfeed_beef);
}

#[test]
fn freed_slot_is_reused_and_the_stale_handle_reads_as_dead() {
    let queue = TaskQueue::with_capacities(64, 1);
    let (result, first) = queue.try_allocate_continuation(1, 1, None, ptr::null_mut());
    assert_eq!(result, AllocateTaskContinuationResult::Success);
    // Single continuation slot; a second allocation has no room.
    let (result, _) = queue.try_allocate_continuation(1, 2, None, ptr::null_mut());
    assert_eq!(result, AllocateTaskContinuationResult::Full);

    let inner = [Task::new(noop, ptr::null_mut(), 0)];
    let mut contexts = [WrappedTaskContext::default(); 1];
    let mut wrapped = [Task::default(); 1];
    queue.create_completion_wrapped_tasks(first, &inner, &mut contexts, &mut wrapped);
    wrapped[0].run(0);
    assert!(queue.is_complete(first));

    let (result, second) = queue.try_allocate_continuation(1, 3, None, ptr::null_mut());
    assert_eq!(result, AllocateTaskContinuationResult::Success);
    // Same slot, new generation: the handles must not alias.
    assert_ne!(first, second);
    assert!(queue.is_complete(first));
    assert!(!queue.is_complete(second));
    unsafe {
        assert!(queue.get_continuation(first).is_none());
        let live = queue.get_continuation(second).unwrap();
        assert_eq!(live.as_ref().user_id, 3);
        assert_eq!(live.as_ref().remaining_task_count(), 1);
    }
}

#[test]
fn blocking_allocation_drains_the_queue_to_free_a_slot() {
    let queue = TaskQueue::with_capacities(64, 1);
    let (result, first) = queue.try_allocate_continuation(1, 1, None, ptr::null_mut());
    assert_eq!(result, AllocateTaskContinuationResult::Success);

    // Queue up the task whose completion frees the only slot, then ask for
    // another continuation; the blocking allocator must run it inline.
    let inner = [Task::new(noop, ptr::null_mut(), 0)];
    let mut contexts = [WrappedTaskContext::default(); 1];
    let mut wrapped = [Task::default(); 1];
    queue.create_completion_wrapped_tasks(first, &inner, &mut contexts, &mut wrapped);
    assert_eq!(queue.try_enqueue_tasks(&wrapped), EnqueueTaskResult::Success);

    let second = queue.allocate_continuation(1, 0, 9, None, ptr::null_mut());
    assert!(queue.is_complete(first));
    assert!(!queue.is_complete(second));
    assert_eq!(queue.try_dequeue().0, DequeueTaskResult::Empty);
}
