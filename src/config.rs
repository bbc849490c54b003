//! Compile-time tuning knobs.
//!
//! The scheduler has no runtime configuration; everything an embedder can
//! tune is a constant here.

/// Upper bound on the number of worker threads.
pub const MAX_WORKER_COUNT: usize = 32;

/// Number of preallocated fiber contexts shared by all workers.
///
/// This is a hard ceiling: requesting a fiber from an exhausted pool is a
/// fault, not a wait condition.
pub const MAX_FIBER_COUNT: usize = 128;

/// Stack size of each task fiber, in bytes.
pub const FIBER_STACK_SIZE: usize = 128 * 1024;

/// Stack size of each worker OS thread, in bytes.
pub const SCHEDULER_STACK_SIZE: usize = 1024 * 1024;

/// Number of distinct task groups.
pub const GROUP_COUNT: usize = 16;

/// Capacity of each worker's runnable queue.
pub const TASK_BUFFER_CAPACITY: usize = 4096;
