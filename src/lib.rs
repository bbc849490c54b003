//! # Taskloom - Fiber-Based Task Scheduler
//!
//! A task scheduler for fine-grained parallelism: batches of short tasks,
//! grouped under user-chosen labels, run on a fixed pool of worker threads
//! multiplexing a fixed pool of user-space stacks (fibers). Tasks can spawn
//! sub-tasks and suspend until they complete, or park until another group
//! drains, without ever blocking the OS thread underneath.
//!
//! ## Architecture
//!
//! - **Fibers**: preallocated coroutine stacks, bound to tasks on demand and
//!   recycled through a free list
//! - **Groups**: labels tying related tasks together for collective waiting
//! - **Workers**: OS threads, each with its own runnable queue, driving
//!   fibers cooperatively; a suspended task may resume on a different worker
//! - **Parent/child fibers**: a task that spawns sub-tasks parks until the
//!   last child finishes, then continues on whichever worker ran that child
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//! use taskloom::{FiberContext, TaskDesc, TaskGroup, TaskScheduler};
//!
//! static DONE: AtomicUsize = AtomicUsize::new(0);
//!
//! fn count_up(_context: &FiberContext, _user_data: *mut ()) {
//!     DONE.fetch_add(1, Ordering::SeqCst);
//! }
//!
//! let scheduler = TaskScheduler::new();
//! let tasks = [TaskDesc::new(count_up, std::ptr::null_mut()); 64];
//! let group = TaskGroup::new(0);
//! scheduler.run_tasks(group, &[&tasks]);
//! assert!(scheduler.wait_group(group, Duration::from_secs(5)));
//! assert_eq!(DONE.load(Ordering::SeqCst), 64);
//! ```

pub mod config;
mod error;
mod event;
mod fiber;
mod queue;
mod scheduler;
mod task;
mod worker;

pub use error::ShutdownError;
pub use fiber::FiberContext;
pub use scheduler::TaskScheduler;
pub use task::{TaskDesc, TaskFunc, TaskGroup};

#[cfg(test)]
mod tests;
