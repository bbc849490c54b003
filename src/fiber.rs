//! Fiber contexts and the yield protocol.
//!
//! Every pooled fiber is a [`FiberContext`]: a preallocated coroutine stack
//! plus the task currently bound to it, its group, an optional parent
//! back-reference, a children counter, and a transient binding to the worker
//! thread driving it. Context switching is built on `corosensei`: switching
//! a worker into a fiber is `Coroutine::resume`, switching back to the
//! worker's scheduler fiber is `Yielder::suspend`.

use crate::config::FIBER_STACK_SIZE;
use crate::task::{GroupedTask, TaskDesc, TaskGroup};
use crate::worker::ThreadContext;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::{Cell, UnsafeCell};
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, Ordering};

type FiberCoroutine = Coroutine<FiberInput, (), ()>;

/// What a worker hands a fiber when switching into it.
#[derive(Clone, Copy, Debug)]
pub(crate) enum FiberInput {
    /// Begin the task currently bound to the context.
    Run,
    /// Continue past the suspension point of a parked task.
    Resume,
}

/// Execution status of a fiber context.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub(crate) enum FiberTaskStatus {
    /// On the free list, or bound to a task that has not started yet.
    Unknown = 0,
    /// Currently executing on some worker.
    Running = 1,
    /// The task body returned.
    Finished = 2,
    /// Parked until another group drains.
    AwaitingGroup = 3,
    /// Parked until every spawned child finishes.
    AwaitingChild = 4,
}

impl FiberTaskStatus {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => FiberTaskStatus::Unknown,
            1 => FiberTaskStatus::Running,
            2 => FiberTaskStatus::Finished,
            3 => FiberTaskStatus::AwaitingGroup,
            4 => FiberTaskStatus::AwaitingChild,
            other => unreachable!("corrupt fiber status {other}"),
        }
    }
}

/// Pointer to a fiber context in the scheduler's arena.
///
/// The arena outlives every worker, so handles stay valid for the
/// scheduler's whole lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct FiberHandle(pub(crate) *mut FiberContext);

unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

impl FiberHandle {
    pub(crate) fn null() -> Self {
        FiberHandle(std::ptr::null_mut())
    }

    pub(crate) fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// One preallocated fiber and its scheduling state.
///
/// Task bodies receive a shared reference to the context driving them and
/// suspend through it. The non-atomic fields are only ever touched by the
/// single worker currently holding the context (tracked by `thread_context`);
/// handoffs between workers go through the free list, the awaiter queues, or
/// the children counter, each of which orders the accesses.
pub struct FiberContext {
    fiber: UnsafeCell<Option<FiberCoroutine>>,
    /// Valid only while the fiber is running; set on entry by `fiber_main`.
    yielder: Cell<*const Yielder<FiberInput, ()>>,
    status: AtomicU32,
    current_task: Cell<TaskDesc>,
    current_group: Cell<TaskGroup>,
    /// Group recorded by `wait_group_and_yield` for the worker to park on.
    awaited_group: Cell<TaskGroup>,
    /// Drain epoch of the awaited group when the wait began.
    awaited_epoch: Cell<u64>,
    parent_fiber: Cell<FiberHandle>,
    children_count: AtomicI32,
    thread_context: AtomicPtr<ThreadContext>,
}

unsafe impl Send for FiberContext {}
unsafe impl Sync for FiberContext {}

impl FiberContext {
    pub(crate) fn new() -> Self {
        FiberContext {
            fiber: UnsafeCell::new(None),
            yielder: Cell::new(std::ptr::null()),
            status: AtomicU32::new(FiberTaskStatus::Unknown as u32),
            current_task: Cell::new(TaskDesc::default()),
            current_group: Cell::new(TaskGroup::UNDEFINED),
            awaited_group: Cell::new(TaskGroup::UNDEFINED),
            awaited_epoch: Cell::new(0),
            parent_fiber: Cell::new(FiberHandle::null()),
            children_count: AtomicI32::new(0),
            thread_context: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Allocates the coroutine stack for this slot. Called once per context
    /// at scheduler construction, after the arena address is final.
    pub(crate) fn create_fiber(&self, own_handle: FiberHandle) {
        let stack =
            DefaultStack::new(FIBER_STACK_SIZE).expect("failed to allocate fiber stack");
        let coroutine = Coroutine::with_stack(stack, move |yielder, input: FiberInput| {
            fiber_main(own_handle, yielder, input)
        });
        // SAFETY: construction is single-threaded; no worker exists yet.
        unsafe { *self.fiber.get() = Some(coroutine) };
    }

    // --- public surface, callable from inside a task -----------------------

    /// The group of the task currently bound to this fiber.
    pub fn current_group(&self) -> TaskGroup {
        self.current_group.get()
    }

    /// Parks the calling task until `group` next drains to zero in-progress
    /// tasks, without blocking the worker thread underneath.
    ///
    /// Refused without yielding when `group` is the calling task's own group
    /// (waiting on it could never complete) or when `group` is out of range.
    pub fn wait_group_and_yield(&self, group: TaskGroup) {
        let thread_context = self.thread_context.load(Ordering::Acquire);
        assert!(
            !thread_context.is_null(),
            "wait_group_and_yield called outside a running task"
        );

        if group == self.current_group.get() {
            tracing::error!("refusing to wait on the task's own group");
            return;
        }
        if !group.is_valid() {
            tracing::error!("refusing to wait on an invalid group");
            return;
        }

        // SAFETY: a non-null binding means the worker behind it is the
        // thread executing us, and the scheduler outlives its workers.
        let scheduler = unsafe { (*thread_context).scheduler() };
        self.awaited_group.set(group);
        self.awaited_epoch.set(scheduler.drain_epoch(group));
        self.set_status(FiberTaskStatus::AwaitingGroup);
        self.thread_context
            .store(std::ptr::null_mut(), Ordering::Release);
        self.suspend();
    }

    /// Submits `buckets` to `group` as children of the calling task and
    /// parks it until every child has finished. On resume, all memory
    /// effects of the children are visible.
    pub fn run_subtasks_and_yield(&self, group: TaskGroup, buckets: &[&[TaskDesc]]) {
        let thread_context = self.thread_context.load(Ordering::Acquire);
        assert!(
            !thread_context.is_null(),
            "run_subtasks_and_yield called outside a running task"
        );
        assert!(group.is_valid(), "invalid task group");

        // SAFETY: as in wait_group_and_yield.
        let scheduler = unsafe { (*thread_context).scheduler() };
        let own_handle = FiberHandle(self as *const FiberContext as *mut FiberContext);
        scheduler.run_tasks_impl(group, buckets, own_handle);

        self.set_status(FiberTaskStatus::AwaitingChild);
        self.thread_context
            .store(std::ptr::null_mut(), Ordering::Release);
        self.suspend();
    }

    // --- scheduler-side plumbing -------------------------------------------

    pub(crate) fn bind_task(&self, task: GroupedTask) {
        debug_assert!(task.desc.is_valid());
        self.current_task.set(task.desc);
        self.current_group.set(task.group);
        self.parent_fiber.set(task.parent_fiber);
    }

    /// Clears the slot for the free list. The children counter must have
    /// drained first.
    pub(crate) fn reset(&self) {
        assert_eq!(
            self.children_count.load(Ordering::SeqCst),
            0,
            "cannot release a fiber with live children"
        );
        self.current_task.set(TaskDesc::default());
        self.current_group.set(TaskGroup::UNDEFINED);
        self.awaited_group.set(TaskGroup::UNDEFINED);
        self.awaited_epoch.set(0);
        self.parent_fiber.set(FiberHandle::null());
        self.thread_context
            .store(std::ptr::null_mut(), Ordering::Relaxed);
        self.set_status(FiberTaskStatus::Unknown);
    }

    pub(crate) fn status(&self) -> FiberTaskStatus {
        FiberTaskStatus::from_u32(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: FiberTaskStatus) {
        self.status.store(status as u32, Ordering::SeqCst);
    }

    pub(crate) fn parent_fiber(&self) -> FiberHandle {
        self.parent_fiber.get()
    }

    pub(crate) fn awaited_group(&self) -> TaskGroup {
        self.awaited_group.get()
    }

    pub(crate) fn awaited_epoch(&self) -> u64 {
        self.awaited_epoch.get()
    }

    /// Adds `count` to the children counter, returning the new value.
    pub(crate) fn add_children(&self, count: i32) -> i32 {
        self.children_count.fetch_add(count, Ordering::SeqCst) + count
    }

    /// Decrements the children counter, returning the new value.
    pub(crate) fn dec_children(&self) -> i32 {
        let remaining = self.children_count.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(remaining >= 0, "children counter went negative");
        remaining
    }

    /// Binds this fiber to the worker about to drive it.
    pub(crate) fn bind_worker(&self, thread_context: &ThreadContext) {
        debug_assert!(
            self.thread_context.load(Ordering::Acquire).is_null(),
            "fiber already bound to a worker"
        );
        self.thread_context.store(
            thread_context as *const ThreadContext as *mut ThreadContext,
            Ordering::Release,
        );
        self.set_status(FiberTaskStatus::Running);
    }

    /// Switches the current worker thread onto this fiber. Returns when the
    /// fiber suspends; the fiber stack is quiescent from then on.
    pub(crate) fn resume_on_worker(&self, input: FiberInput) {
        // SAFETY: exactly one worker holds this context at a time.
        let slot = unsafe { &mut *self.fiber.get() };
        let coroutine = slot.as_mut().expect("fiber context has no stack");
        match coroutine.resume(input) {
            CoroutineResult::Yield(()) => {}
            CoroutineResult::Return(()) => unreachable!("fiber main returned"),
        }
    }

    /// Switches from the running task back to the worker's scheduler fiber.
    fn suspend(&self) {
        let yielder = self.yielder.get();
        debug_assert!(!yielder.is_null(), "suspend outside a running fiber");
        // SAFETY: the yielder lives for as long as the coroutine does, and
        // we are on its stack right now.
        let input = unsafe { (*yielder).suspend(()) };
        debug_assert!(matches!(input, FiberInput::Resume));
    }
}

/// Entry point of every pooled fiber.
///
/// Loops forever: run the task currently bound to the context, mark it
/// finished, switch back to the scheduler fiber, and wait to be handed the
/// next binding.
fn fiber_main(handle: FiberHandle, yielder: &Yielder<FiberInput, ()>, mut input: FiberInput) {
    loop {
        debug_assert!(matches!(input, FiberInput::Run));
        // SAFETY: the arena outlives every fiber, and the driving worker
        // guarantees exclusive access while we run.
        let context = unsafe { &*handle.0 };
        let task = context.current_task.get();
        debug_assert!(context.current_group.get().is_valid());
        let Some(func) = task.func else {
            unreachable!("fiber bound to an invalid task");
        };

        context
            .yielder
            .set(yielder as *const Yielder<FiberInput, ()>);
        func(context, task.user_data);

        context.set_status(FiberTaskStatus::Finished);
        input = yielder.suspend(());
    }
}
