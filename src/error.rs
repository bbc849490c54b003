//! Error types.

use thiserror::Error;

/// Returned by [`TaskScheduler::shutdown`](crate::TaskScheduler::shutdown)
/// when worker threads died to panicking tasks instead of exiting cleanly.
#[derive(Debug, Error)]
#[error("{panicked} worker thread(s) panicked")]
pub struct ShutdownError {
    /// Number of workers that did not shut down cleanly.
    pub panicked: usize,
}
