use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use taskloom::{FiberContext, TaskDesc, TaskGroup, TaskScheduler};

fn increment(_context: &FiberContext, user_data: *mut ()) {
    let counter = unsafe { &*(user_data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

fn slow_task(_context: &FiberContext, _user_data: *mut ()) {
    std::thread::sleep(Duration::from_millis(10));
}

#[test]
fn test_idle_shutdown_is_prompt() {
    let scheduler = TaskScheduler::with_worker_count(4);
    let start = Instant::now();
    drop(scheduler);
    // Workers sit in a bounded event wait; the exit signal must cut it
    // short rather than riding out the full idle timeout.
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_shutdown_reports_clean_exit() {
    let scheduler = TaskScheduler::with_worker_count(2);
    let counter = AtomicUsize::new(0);
    let group = TaskGroup::new(0);

    let desc = TaskDesc::new(increment, &counter as *const AtomicUsize as *mut ());
    let tasks = vec![desc; 32];
    scheduler.run_tasks(group, &[&tasks]);

    assert!(scheduler.wait_group(group, Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::SeqCst), 32);
    scheduler.shutdown().expect("workers should exit cleanly");
}

#[test]
fn test_running_tasks_finish_before_exit() {
    // Dropping without waiting: tasks already picked up run to completion;
    // only queued-but-unstarted work may be abandoned.
    let scheduler = TaskScheduler::with_worker_count(2);
    for _ in 0..10 {
        let desc = TaskDesc::new(slow_task, std::ptr::null_mut());
        scheduler.run_tasks(TaskGroup::new(1), &[&[desc]]);
    }
    drop(scheduler);
}

#[test]
fn test_repeated_construction_and_teardown() {
    for _ in 0..4 {
        let scheduler = TaskScheduler::with_worker_count(2);
        let counter = AtomicUsize::new(0);
        let desc = TaskDesc::new(increment, &counter as *const AtomicUsize as *mut ());
        let group = TaskGroup::new(0);
        scheduler.run_tasks(group, &[&[desc]]);
        assert!(scheduler.wait_group(group, Duration::from_secs(5)));
        scheduler.shutdown().expect("workers should exit cleanly");
    }
}
