//! Integration tests for the fiber task scheduler.

use crate::config::MAX_WORKER_COUNT;
use crate::{FiberContext, TaskDesc, TaskGroup, TaskScheduler};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn set_flag(_context: &FiberContext, user_data: *mut ()) {
    let flag = unsafe { &*(user_data as *const AtomicBool) };
    flag.store(true, Ordering::SeqCst);
}

fn increment(_context: &FiberContext, user_data: *mut ()) {
    let counter = unsafe { &*(user_data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

fn sleep_briefly(_context: &FiberContext, _user_data: *mut ()) {
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn test_single_task_runs() {
    let scheduler = TaskScheduler::with_worker_count(2);
    let flag = AtomicBool::new(false);
    let group = TaskGroup::new(0);

    let desc = TaskDesc::new(set_flag, &flag as *const AtomicBool as *mut ());
    scheduler.run_tasks(group, &[&[desc]]);

    assert!(scheduler.wait_group(group, Duration::from_secs(5)));
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn test_flat_batch_of_1000() {
    let scheduler = TaskScheduler::with_worker_count(4);
    let counter = AtomicUsize::new(0);
    let group = TaskGroup::new(1);

    let desc = TaskDesc::new(increment, &counter as *const AtomicUsize as *mut ());
    let tasks = vec![desc; 1000];
    scheduler.run_tasks(group, &[&tasks]);

    assert!(scheduler.wait_group(group, Duration::from_secs(10)));
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
}

#[test]
fn test_buckets_spread_round_robin() {
    let scheduler = TaskScheduler::with_worker_count(4);
    let counter = AtomicUsize::new(0);
    let group = TaskGroup::new(2);

    let desc = TaskDesc::new(increment, &counter as *const AtomicUsize as *mut ());
    let tasks = vec![desc; 100];
    let buckets: Vec<&[TaskDesc]> = tasks.chunks(25).collect();
    scheduler.run_tasks(group, &buckets);

    assert!(scheduler.wait_group(group, Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_wait_all_covers_every_group() {
    let scheduler = TaskScheduler::with_worker_count(4);
    let counter = AtomicUsize::new(0);

    let desc = TaskDesc::new(increment, &counter as *const AtomicUsize as *mut ());
    let tasks = vec![desc; 16];
    scheduler.run_tasks(TaskGroup::new(0), &[&tasks]);
    scheduler.run_tasks(TaskGroup::new(1), &[&tasks]);
    scheduler.run_tasks(TaskGroup::new(2), &[&tasks]);

    assert!(scheduler.wait_all(Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::SeqCst), 48);
}

#[test]
fn test_wait_group_times_out_on_slow_task() {
    let scheduler = TaskScheduler::with_worker_count(2);
    let group = TaskGroup::new(3);

    let desc = TaskDesc::new(sleep_briefly, std::ptr::null_mut());
    scheduler.run_tasks(group, &[&[desc]]);

    assert!(!scheduler.wait_group(group, Duration::from_millis(5)));
    assert!(scheduler.wait_group(group, Duration::from_secs(5)));
}

#[test]
fn test_wait_on_unused_group_returns_immediately() {
    let scheduler = TaskScheduler::with_worker_count(2);
    assert!(scheduler.wait_group(TaskGroup::new(7), Duration::from_millis(1)));
    assert!(scheduler.wait_all(Duration::from_millis(1)));
}

#[test]
fn test_is_empty_is_idempotent() {
    let scheduler = TaskScheduler::with_worker_count(2);
    assert!(scheduler.is_empty());
    assert!(scheduler.is_empty());

    let counter = AtomicUsize::new(0);
    let desc = TaskDesc::new(increment, &counter as *const AtomicUsize as *mut ());
    let tasks = vec![desc; 64];
    let group = TaskGroup::new(4);
    scheduler.run_tasks(group, &[&tasks]);

    assert!(scheduler.wait_group(group, Duration::from_secs(5)));
    assert!(scheduler.is_empty());
}

#[test]
fn test_worker_count_is_clamped() {
    let scheduler = TaskScheduler::with_worker_count(0);
    assert_eq!(scheduler.worker_count(), 1);

    let scheduler = TaskScheduler::with_worker_count(MAX_WORKER_COUNT + 10);
    assert_eq!(scheduler.worker_count(), MAX_WORKER_COUNT);
}

#[test]
fn test_groups_complete_independently() {
    let scheduler = TaskScheduler::with_worker_count(2);
    let fast = AtomicUsize::new(0);
    let group_fast = TaskGroup::new(5);
    let group_slow = TaskGroup::new(6);

    let slow_desc = TaskDesc::new(sleep_briefly, std::ptr::null_mut());
    scheduler.run_tasks(group_slow, &[&[slow_desc]]);

    let fast_desc = TaskDesc::new(increment, &fast as *const AtomicUsize as *mut ());
    let tasks = vec![fast_desc; 8];
    scheduler.run_tasks(group_fast, &[&tasks]);

    assert!(scheduler.wait_group(group_fast, Duration::from_secs(5)));
    assert_eq!(fast.load(Ordering::SeqCst), 8);
    assert!(scheduler.wait_group(group_slow, Duration::from_secs(5)));
}
