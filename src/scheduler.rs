//! The task scheduler: submission, group accounting, and lifecycle.

use crate::config::{GROUP_COUNT, MAX_FIBER_COUNT, MAX_WORKER_COUNT, SCHEDULER_STACK_SIZE};
use crate::error::ShutdownError;
use crate::event::Event;
use crate::fiber::{FiberContext, FiberHandle};
use crate::queue::LifoQueue;
use crate::task::{GroupedTask, SendPtr, TaskDesc, TaskGroup, WorkItem};
use crate::worker::{thread_main, ThreadContext, THREAD_EXIT};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Completion accounting for one group (or for all groups together).
pub(crate) struct GroupStats {
    pub(crate) in_progress_task_count: AtomicI64,
    pub(crate) all_done_event: Event,
    /// Bumped on every 1 -> 0 transition of the counter. Lets a parking
    /// worker detect that the awaited group drained while the fiber was
    /// still on its way into the awaiter queue.
    pub(crate) drain_epoch: AtomicU64,
}

impl GroupStats {
    fn new() -> Self {
        GroupStats {
            in_progress_task_count: AtomicI64::new(0),
            // Initially signaled: waiting on a group that never had a
            // submit completes immediately.
            all_done_event: Event::manual(true),
            drain_epoch: AtomicU64::new(0),
        }
    }
}

/// Shared scheduler state. Boxed so its address is stable; workers and
/// fibers refer back to it by pointer for the scheduler's whole lifetime.
pub(crate) struct SchedulerCore {
    pub(crate) thread_contexts: Box<[ThreadContext]>,
    fiber_contexts: Box<[FiberContext]>,
    available_fibers: LifoQueue<FiberHandle>,
    wait_task_queues: [LifoQueue<FiberHandle>; GROUP_COUNT],
    group_stats: [GroupStats; GROUP_COUNT],
    all_group_stats: GroupStats,
    round_robin_thread_index: AtomicUsize,
}

impl SchedulerCore {
    fn next_worker(&self) -> &ThreadContext {
        let index =
            self.round_robin_thread_index.fetch_add(1, Ordering::Relaxed) % self.thread_contexts.len();
        &self.thread_contexts[index]
    }

    /// Submits `buckets` to `group`, one bucket per worker queue, on behalf
    /// of `parent_fiber` when the submission comes from inside a task.
    pub(crate) fn run_tasks_impl(
        &self,
        group: TaskGroup,
        buckets: &[&[TaskDesc]],
        parent_fiber: FiberHandle,
    ) {
        assert!(group.is_valid(), "invalid task group");

        let total: usize = buckets.iter().map(|bucket| bucket.len()).sum();
        if total == 0 {
            return;
        }
        for bucket in buckets {
            for task in *bucket {
                assert!(task.is_valid(), "invalid task descriptor");
            }
        }

        if !parent_fiber.is_null() {
            // Account for every child before any of them can be observed
            // finishing, so the counter never dips below its final total.
            // SAFETY: the parent is the running fiber that is submitting.
            unsafe { &*parent_fiber.0 }.add_children(total as i32);
        }

        let stats = &self.group_stats[group.index()];
        for bucket in buckets {
            if bucket.is_empty() {
                continue;
            }
            let context = self.next_worker();

            // Reset before add, so the counter is already non-zero wherever
            // a waiter can observe the event unsignaled.
            self.all_group_stats.all_done_event.reset();
            self.all_group_stats
                .in_progress_task_count
                .fetch_add(bucket.len() as i64, Ordering::SeqCst);
            stats.all_done_event.reset();
            stats
                .in_progress_task_count
                .fetch_add(bucket.len() as i64, Ordering::SeqCst);

            for task in *bucket {
                let grouped = GroupedTask {
                    desc: *task,
                    group,
                    parent_fiber,
                };
                if context.queue.push(WorkItem::Task(grouped)).is_err() {
                    panic!("worker queue overflow: more than TASK_BUFFER_CAPACITY pending items");
                }
            }
            context.has_new_tasks_event.signal();
        }
    }

    /// Pops a free fiber and binds `task` to it. Exhaustion is a fault:
    /// MAX_FIBER_COUNT is a hard ceiling, not a wait condition.
    pub(crate) fn request_fiber_context(&self, task: GroupedTask) -> FiberHandle {
        let Some(handle) = self.available_fibers.try_pop() else {
            panic!("fiber pool exhausted");
        };
        // SAFETY: arena handle; the fiber just left the free list.
        unsafe { &*handle.0 }.bind_task(task);
        handle
    }

    pub(crate) fn release_fiber_context(&self, handle: FiberHandle) {
        assert!(!handle.is_null(), "cannot release a null fiber");
        // SAFETY: arena handle; the caller is the sole holder.
        unsafe { &*handle.0 }.reset();
        self.available_fibers.push(handle);
    }

    /// Files a quiescent fiber under the awaiter queue of the group it
    /// waits on. Called by the worker that drove it, after the suspend
    /// completed.
    pub(crate) fn park_awaiting_fiber(&self, handle: FiberHandle) {
        // SAFETY: arena handle; the fiber is suspended.
        let context = unsafe { &*handle.0 };
        let group = context.awaited_group();
        debug_assert!(group.is_valid());
        let epoch = context.awaited_epoch();

        self.wait_task_queues[group.index()].push(handle);

        // The group may have drained between the wait beginning inside the
        // task and the push above; the epoch moves on every drain, so a
        // mismatch means the restore pass may already have run and missed
        // this fiber.
        if self.group_stats[group.index()].drain_epoch.load(Ordering::SeqCst) != epoch {
            self.restore_awaiting_tasks(group);
        }
    }

    /// Moves every fiber parked on `group` back onto runnable worker
    /// queues, round-robin, waking the targeted workers. The drain is a
    /// single step, so concurrent restorers hand each fiber to exactly one
    /// worker.
    pub(crate) fn restore_awaiting_tasks(&self, group: TaskGroup) {
        let parked = self.wait_task_queues[group.index()].drain();
        if parked.is_empty() {
            return;
        }
        tracing::trace!(
            group = group.index(),
            count = parked.len(),
            "restoring parked fibers"
        );
        for handle in parked {
            let context = self.next_worker();
            if context.queue.push(WorkItem::Resume(handle)).is_err() {
                panic!("worker queue overflow while restoring parked fibers");
            }
            context.has_new_tasks_event.signal();
        }
    }

    /// Group and global accounting for one finished task.
    pub(crate) fn on_task_finished(&self, group: TaskGroup) {
        let stats = &self.group_stats[group.index()];
        let remaining = stats.in_progress_task_count.fetch_sub(1, Ordering::SeqCst) - 1;
        assert!(remaining >= 0, "group task counter went negative");
        if remaining == 0 {
            stats.drain_epoch.fetch_add(1, Ordering::SeqCst);
            self.restore_awaiting_tasks(group);
            stats.all_done_event.signal();
        }

        let remaining = self
            .all_group_stats
            .in_progress_task_count
            .fetch_sub(1, Ordering::SeqCst)
            - 1;
        assert!(remaining >= 0, "global task counter went negative");
        if remaining == 0 {
            self.all_group_stats.all_done_event.signal();
        }
    }

    pub(crate) fn drain_epoch(&self, group: TaskGroup) -> u64 {
        self.group_stats[group.index()].drain_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.thread_contexts
            .iter()
            .any(|context| context.thread_id() == Some(current))
    }
}

/// A fixed pool of worker threads executing grouped tasks on a fixed pool
/// of fibers.
///
/// Submit batches with [`run_tasks`](TaskScheduler::run_tasks), wait from a
/// non-worker thread with [`wait_group`](TaskScheduler::wait_group) /
/// [`wait_all`](TaskScheduler::wait_all). Inside a task, spawn and await
/// sub-tasks through the [`FiberContext`] the task body receives.
pub struct TaskScheduler {
    core: Box<SchedulerCore>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    /// Creates a scheduler with the default worker count:
    /// `max(hardware_threads - 2, 1)`, capped at `MAX_WORKER_COUNT`.
    pub fn new() -> Self {
        Self::build(default_worker_count(), false)
    }

    /// Creates a scheduler with an explicit worker count, clamped to
    /// `[1, MAX_WORKER_COUNT]`.
    pub fn with_worker_count(worker_count: usize) -> Self {
        Self::build(worker_count, false)
    }

    /// Like [`new`](TaskScheduler::new), but pins each worker to a CPU core
    /// for cache locality.
    pub fn new_with_affinity() -> Self {
        Self::build(default_worker_count(), true)
    }

    fn build(worker_count: usize, pin_workers: bool) -> Self {
        let worker_count = worker_count.clamp(1, MAX_WORKER_COUNT);

        let core = Box::new(SchedulerCore {
            thread_contexts: (0..worker_count).map(ThreadContext::new).collect(),
            fiber_contexts: (0..MAX_FIBER_COUNT).map(|_| FiberContext::new()).collect(),
            available_fibers: LifoQueue::with_capacity(MAX_FIBER_COUNT),
            wait_task_queues: std::array::from_fn(|_| LifoQueue::with_capacity(MAX_FIBER_COUNT)),
            group_stats: std::array::from_fn(|_| GroupStats::new()),
            all_group_stats: GroupStats::new(),
            round_robin_thread_index: AtomicUsize::new(0),
        });

        // The arena addresses are final now; wire up the back-references.
        let core_ptr = &*core as *const SchedulerCore;
        for context in core.fiber_contexts.iter() {
            let handle = FiberHandle(context as *const FiberContext as *mut FiberContext);
            context.create_fiber(handle);
            core.available_fibers.push(handle);
        }
        for context in core.thread_contexts.iter() {
            context.attach_scheduler(core_ptr);
        }

        let core_ids = if pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let workers = (0..worker_count)
            .map(|index| {
                let scheduler = SendPtr(core_ptr as *mut SchedulerCore);
                let core_id = if core_ids.is_empty() {
                    None
                } else {
                    core_ids.get(index % core_ids.len()).copied()
                };
                thread::Builder::new()
                    .name(format!("taskloom-worker-{index}"))
                    .stack_size(SCHEDULER_STACK_SIZE)
                    .spawn(move || {
                        if let Some(core_id) = core_id {
                            core_affinity::set_for_current(core_id);
                        }
                        thread_main(scheduler, index)
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        TaskScheduler { core, workers }
    }

    /// Submits batches of tasks to `group`. Each bucket goes to one worker
    /// queue, chosen round-robin.
    pub fn run_tasks(&self, group: TaskGroup, buckets: &[&[TaskDesc]]) {
        self.core.run_tasks_impl(group, buckets, FiberHandle::null());
    }

    /// Blocks the calling thread until every task submitted to `group` has
    /// finished, or the timeout expires. Returns `false` on timeout, and
    /// refuses (returning `false`) when called from a worker thread, which
    /// would deadlock the fiber driving it. Use
    /// [`FiberContext::wait_group_and_yield`] from inside a task instead.
    pub fn wait_group(&self, group: TaskGroup, timeout: Duration) -> bool {
        assert!(group.is_valid(), "invalid task group");
        if self.core.is_worker_thread() {
            tracing::error!("wait_group called from a worker thread");
            return false;
        }
        self.core.group_stats[group.index()].all_done_event.wait(timeout)
    }

    /// Like [`wait_group`](TaskScheduler::wait_group), for every group at
    /// once.
    pub fn wait_all(&self, timeout: Duration) -> bool {
        if self.core.is_worker_thread() {
            tracing::error!("wait_all called from a worker thread");
            return false;
        }
        self.core.all_group_stats.all_done_event.wait(timeout)
    }

    pub fn worker_count(&self) -> usize {
        self.core.thread_contexts.len()
    }

    /// Advisory only: whether every worker's runnable queue is currently
    /// empty. Not synchronized with fibers in flight.
    pub fn is_empty(&self) -> bool {
        self.core
            .thread_contexts
            .iter()
            .all(|context| context.queue.is_empty())
    }

    /// Whether the calling thread is one of this scheduler's workers.
    pub fn is_worker_thread(&self) -> bool {
        self.core.is_worker_thread()
    }

    /// Signals every worker to exit, joins them, and reports workers that
    /// died to a panicked task. Queued-but-unstarted tasks are abandoned;
    /// running tasks finish first.
    pub fn shutdown(mut self) -> Result<(), ShutdownError> {
        let panicked = self.join_workers();
        if panicked > 0 {
            Err(ShutdownError { panicked })
        } else {
            Ok(())
        }
    }

    fn join_workers(&mut self) -> usize {
        for context in self.core.thread_contexts.iter() {
            context.state.store(THREAD_EXIT, Ordering::SeqCst);
            context.has_new_tasks_event.signal();
        }
        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                panicked += 1;
            }
        }
        panicked
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        TaskScheduler::new()
    }
}

impl Drop for TaskScheduler {
    /// Workers observe the exit state between task pops, so running tasks
    /// always finish before their worker exits.
    fn drop(&mut self) {
        let panicked = self.join_workers();
        if panicked > 0 {
            tracing::error!(panicked, "worker threads panicked during shutdown");
        }
    }
}

fn default_worker_count() -> usize {
    let hardware = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    hardware.saturating_sub(2).max(1)
}
