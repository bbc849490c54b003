//! Task descriptors and grouping.
//!
//! A task is a plain function pointer plus a user-data handle. Descriptors
//! are small copyable values; batches of them are submitted together and
//! stamped with their group and parent fiber on the way into the scheduler.

use crate::config::GROUP_COUNT;
use crate::fiber::{FiberContext, FiberHandle};

/// Signature of a task body.
///
/// Receives the fiber context driving the task (for the yield operations)
/// and the user-data handle from the descriptor.
pub type TaskFunc = fn(&FiberContext, *mut ());

/// A user-chosen label tying related tasks together for collective waiting.
///
/// Valid groups are `0..GROUP_COUNT`; groups have no ordering relative to
/// each other.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskGroup(u32);

impl TaskGroup {
    /// The "no group" marker carried by idle fiber contexts.
    pub const UNDEFINED: TaskGroup = TaskGroup(u32::MAX);

    pub const fn new(index: u32) -> Self {
        TaskGroup(index)
    }

    pub fn is_valid(self) -> bool {
        (self.0 as usize) < GROUP_COUNT
    }

    pub(crate) fn index(self) -> usize {
        debug_assert!(self.is_valid());
        self.0 as usize
    }
}

/// An opaque unit of work: a function pointer plus a user-data handle.
///
/// The handle travels to whichever worker thread ends up running the task;
/// the submitter guarantees that whatever it points at is safe to touch from
/// there and outlives the task.
#[derive(Clone, Copy)]
pub struct TaskDesc {
    pub(crate) func: Option<TaskFunc>,
    pub(crate) user_data: *mut (),
}

impl TaskDesc {
    pub fn new(func: TaskFunc, user_data: *mut ()) -> Self {
        TaskDesc {
            func: Some(func),
            user_data,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.func.is_some()
    }
}

impl Default for TaskDesc {
    fn default() -> Self {
        TaskDesc {
            func: None,
            user_data: std::ptr::null_mut(),
        }
    }
}

unsafe impl Send for TaskDesc {}

/// A task descriptor stamped with its target group and, when submitted from
/// inside a running task, a back-reference to the parent fiber.
#[derive(Clone, Copy)]
pub(crate) struct GroupedTask {
    pub(crate) desc: TaskDesc,
    pub(crate) group: TaskGroup,
    pub(crate) parent_fiber: FiberHandle,
}

/// One entry in a worker's runnable queue.
pub(crate) enum WorkItem {
    /// A freshly submitted task, not yet bound to a fiber.
    Task(GroupedTask),
    /// A parked fiber whose awaited group drained; resume it.
    Resume(FiberHandle),
}

/// Raw pointer wrapper that may cross thread boundaries.
#[derive(Clone, Copy)]
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

unsafe impl<T> Send for SendPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &FiberContext, _: *mut ()) {}

    #[test]
    fn test_task_desc_validity() {
        let desc = TaskDesc::new(noop, std::ptr::null_mut());
        assert!(desc.is_valid());
        assert!(!TaskDesc::default().is_valid());
    }

    #[test]
    fn test_task_group_bounds() {
        assert!(TaskGroup::new(0).is_valid());
        assert!(TaskGroup::new((GROUP_COUNT - 1) as u32).is_valid());
        assert!(!TaskGroup::new(GROUP_COUNT as u32).is_valid());
        assert!(!TaskGroup::UNDEFINED.is_valid());
    }
}
