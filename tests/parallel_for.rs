//! Parallel for loop coverage: exactly-once execution over a range, with and
//! without helper workers, including ranges larger than the queue capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use task_queue::TaskQueue;

fn iteration_flags(count: i64) -> Vec<AtomicUsize> {
    (0..count).map(|_| AtomicUsize::new(0)).collect()
}

fn assert_each_ran_once(flags: &[AtomicUsize]) {
    for (index, flag) in flags.iter().enumerate() {
        assert_eq!(
            flag.load(Ordering::Relaxed),
            1,
            "iteration {index} did not run exactly once"
        );
    }
}

#[test]
fn runs_every_index_exactly_once_without_workers() {
    let queue = TaskQueue::with_capacities(256, 64);
    for count in [0i64, 1, 5, 1000] {
        let flags = iteration_flags(count);
        queue.for_each(0, count, 0, &|i, _worker| {
            flags[i as usize].fetch_add(1, Ordering::Relaxed);
        });
        assert_each_ran_once(&flags);
        assert_eq!(queue.unsafe_task_count(), 0);
        assert_eq!(queue.continuation_count(), 0);
    }
}

#[test]
fn range_larger_than_queue_capacity_falls_back_to_inline_execution() {
    // 1000 pending iterations cannot fit a 64-slot ring; submission must run
    // the overflow inline and the loop must still cover every index.
    let queue = TaskQueue::with_capacities(64, 16);
    let flags = iteration_flags(1000);
    queue.for_each(0, 1000, 0, &|i, _worker| {
        flags[i as usize].fetch_add(1, Ordering::Relaxed);
    });
    assert_each_ran_once(&flags);
}

#[test]
fn nonzero_start_index_passes_the_real_indices_to_the_body() {
    let queue = TaskQueue::with_capacities(64, 16);
    let flags = iteration_flags(10);
    queue.for_each(100, 110, 0, &|i, _worker| {
        assert!((100..110).contains(&i));
        flags[(i - 100) as usize].fetch_add(1, Ordering::Relaxed);
    });
    assert_each_ran_once(&flags);
}

#[test]
fn workers_share_the_loop_and_the_call_returns_after_full_coverage() {
    let worker_count = num_cpus::get().clamp(2, 4);
    let queue = TaskQueue::new();
    let flags = iteration_flags(10_000);
    thread::scope(|scope| {
        let queue = &queue;
        for worker_index in 1..=worker_count {
            scope.spawn(move || queue.worker_loop(worker_index));
        }
        queue.for_each(0, 10_000, 0, &|i, _worker| {
            flags[i as usize].fetch_add(1, Ordering::Relaxed);
        });
        // for_each must not return before every iteration has executed.
        assert_each_ran_once(&flags);
        queue.enqueue_stop(0);
    });
}

#[test]
fn consecutive_loops_reuse_the_queue() {
    let queue = TaskQueue::with_capacities(128, 16);
    for round in 0..20i64 {
        let flags = iteration_flags(50);
        queue.for_each(0, 50, 0, &|i, _worker| {
            flags[i as usize].fetch_add(1, Ordering::Relaxed);
        });
        assert_each_ran_once(&flags);
        assert_eq!(queue.continuation_count(), 0, "round {round} leaked a continuation");
    }
}
