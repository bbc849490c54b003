//! Worker threads and the fiber driver.
//!
//! Each worker owns a bounded FIFO of runnable items and drives fibers
//! cooperatively on its own OS stack (the "scheduler fiber"). Whoever drives
//! a fiber holds one reference on its children counter for the duration, so
//! a completing child can never resume or free a fiber another worker is
//! still inspecting; the actor that drops the counter to zero takes that
//! reference over and continues the fiber in place.

use crate::config::TASK_BUFFER_CAPACITY;
use crate::event::Event;
use crate::fiber::{FiberHandle, FiberInput, FiberTaskStatus};
use crate::scheduler::SchedulerCore;
use crate::task::{SendPtr, WorkItem};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) const THREAD_ALIVE: u32 = 0;
pub(crate) const THREAD_EXIT: u32 = 1;

/// How long an idle worker sleeps before re-checking its queue.
const IDLE_WAIT: Duration = Duration::from_millis(2000);

/// Per-worker state: the runnable queue, the wake event, the lifecycle
/// flag, and a back-pointer to the owning scheduler.
pub(crate) struct ThreadContext {
    pub(crate) worker_index: usize,
    pub(crate) queue: ArrayQueue<WorkItem>,
    pub(crate) has_new_tasks_event: Event,
    pub(crate) state: AtomicU32,
    scheduler: AtomicPtr<SchedulerCore>,
    thread_id: OnceLock<ThreadId>,
}

impl ThreadContext {
    pub(crate) fn new(worker_index: usize) -> Self {
        ThreadContext {
            worker_index,
            queue: ArrayQueue::new(TASK_BUFFER_CAPACITY),
            has_new_tasks_event: Event::auto(true),
            state: AtomicU32::new(THREAD_ALIVE),
            scheduler: AtomicPtr::new(std::ptr::null_mut()),
            thread_id: OnceLock::new(),
        }
    }

    pub(crate) fn attach_scheduler(&self, scheduler: *const SchedulerCore) {
        self.scheduler
            .store(scheduler as *mut SchedulerCore, Ordering::Release);
    }

    /// The owning scheduler.
    pub(crate) fn scheduler(&self) -> &SchedulerCore {
        let scheduler = self.scheduler.load(Ordering::Acquire);
        debug_assert!(!scheduler.is_null(), "thread context not attached");
        // SAFETY: set once before workers start; the scheduler joins its
        // workers before the core is freed.
        unsafe { &*scheduler }
    }

    pub(crate) fn register_current_thread(&self) {
        let _ = self.thread_id.set(thread::current().id());
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }
}

/// Entry point of every worker thread.
pub(crate) fn thread_main(scheduler: SendPtr<SchedulerCore>, worker_index: usize) {
    // SAFETY: the scheduler joins its workers before the core is freed.
    let scheduler = unsafe { &*(scheduler.0 as *const SchedulerCore) };
    let context = &scheduler.thread_contexts[worker_index];
    context.register_current_thread();
    tracing::debug!(worker = context.worker_index, "worker thread started");

    while context.state.load(Ordering::SeqCst) != THREAD_EXIT {
        match context.queue.pop() {
            Some(item) => run_work_item(scheduler, context, item),
            None => {
                context.has_new_tasks_event.wait(IDLE_WAIT);
            }
        }
    }

    tracing::debug!(worker = context.worker_index, "worker thread exiting");
}

fn run_work_item(scheduler: &SchedulerCore, context: &ThreadContext, item: WorkItem) {
    let fiber = match item {
        WorkItem::Task(task) => scheduler.request_fiber_context(task),
        WorkItem::Resume(handle) => handle,
    };
    // Take the driving reference before the first switch-in.
    // SAFETY: arena handle, valid for the scheduler's lifetime.
    unsafe { &*fiber.0 }.add_children(1);
    drive_fiber(scheduler, context, fiber);
}

/// Runs `first` on the current worker, following parent chains and
/// re-driving in place as long as there is work this worker can continue.
///
/// The caller must already hold the driving reference on `first`; the loop
/// takes its own reference on every fiber it transitions to.
fn drive_fiber(scheduler: &SchedulerCore, thread_context: &ThreadContext, first: FiberHandle) {
    let mut current = first;
    loop {
        // SAFETY: arena handle, valid for the scheduler's lifetime.
        let context = unsafe { &*current.0 };

        let input = match context.status() {
            FiberTaskStatus::Unknown => FiberInput::Run,
            FiberTaskStatus::AwaitingGroup | FiberTaskStatus::AwaitingChild => FiberInput::Resume,
            status => unreachable!("cannot drive a fiber in state {status:?}"),
        };
        context.bind_worker(thread_context);
        context.resume_on_worker(input);

        match context.status() {
            FiberTaskStatus::Finished => {
                scheduler.on_task_finished(context.current_group());
                let parent = context.parent_fiber();

                let remaining = context.dec_children();
                debug_assert_eq!(remaining, 0, "task finished with live children");
                scheduler.release_fiber_context(current);

                if parent.is_null() {
                    return;
                }
                // SAFETY: the parent outlives its children; its counter is
                // non-zero until every child has decremented it.
                let parent_context = unsafe { &*parent.0 };
                if parent_context.dec_children() == 0 {
                    // Last child: resume the parent right here, taking over
                    // the driving reference. It may have last run on a
                    // different worker.
                    parent_context.add_children(1);
                    current = parent;
                    continue;
                }
                return;
            }
            FiberTaskStatus::AwaitingGroup => {
                // The stack is quiescent now that resume returned; release
                // the driving reference and hand the fiber to the awaiter
                // queue of its group.
                let remaining = context.dec_children();
                debug_assert_eq!(remaining, 0, "awaiting fiber with live children");
                scheduler.park_awaiting_fiber(current);
                return;
            }
            FiberTaskStatus::AwaitingChild => {
                let remaining = context.dec_children();
                if remaining == 0 {
                    // Every child finished before we released the driving
                    // reference, so nobody is left to resume the fiber.
                    // Take it back and continue in place.
                    context.add_children(1);
                    continue;
                }
                // Outstanding children; the last one to finish resumes it.
                return;
            }
            status => unreachable!("fiber yielded in state {status:?}"),
        }
    }
}
