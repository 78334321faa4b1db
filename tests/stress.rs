//! Concurrent stress coverage: many producers enqueue batches while many
//! workers dequeue and run, then a stop drains the pool.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use task_queue::{Task, TaskQueue};

const PRODUCER_COUNT: usize = 4;
const BATCHES_PER_PRODUCER: usize = 128;
const BATCH_SIZE: usize = 16;
const TOTAL_TASKS: usize = PRODUCER_COUNT * BATCHES_PER_PRODUCER * BATCH_SIZE;

fn mark_executed(id: i64, context: *mut c_void, _worker_index: usize) {
    let counts =
        unsafe { std::slice::from_raw_parts(context as *const AtomicUsize, TOTAL_TASKS) };
    counts[id as usize].fetch_add(1, Ordering::Relaxed);
}

#[test]
fn every_task_executes_exactly_once_under_contention() {
    let worker_count = num_cpus::get().clamp(2, 4);
    // A small ring forces the producers through the full-queue inline path.
    let queue = TaskQueue::with_capacities(128, 32);
    let counts: Vec<AtomicUsize> = (0..TOTAL_TASKS).map(|_| AtomicUsize::new(0)).collect();
    let context = counts.as_ptr() as *mut c_void;

    thread::scope(|scope| {
        let queue = &queue;
        for worker_index in 1..=worker_count {
            scope.spawn(move || queue.worker_loop(worker_index));
        }
        let producers: Vec<_> = (0..PRODUCER_COUNT)
            .map(|producer| {
                let context_bits = context as usize;
                scope.spawn(move || {
                    let context = context_bits as *mut c_void;
                    let producer_worker_index = worker_count + 1 + producer;
                    for batch in 0..BATCHES_PER_PRODUCER {
                        let base = (producer * BATCHES_PER_PRODUCER + batch) * BATCH_SIZE;
                        let tasks: Vec<Task> = (0..BATCH_SIZE)
                            .map(|i| Task::new(mark_executed, context, (base + i) as i64))
                            .collect();
                        queue.enqueue_tasks(&tasks, producer_worker_index);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        // All producers are done; the stop releases every worker.
        queue.enqueue_stop(0);
    });

    for (id, count) in counts.iter().enumerate() {
        assert_eq!(
            count.load(Ordering::Relaxed),
            1,
            "task {id} did not execute exactly once"
        );
    }
    assert_eq!(queue.try_dequeue().0, task_queue::DequeueTaskResult::Stop);
}
