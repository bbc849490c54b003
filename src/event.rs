//! Blocking events with auto- and manual-reset semantics.
//!
//! Workers sleep on an auto-reset event between task pops; group completion
//! is published through manual-reset events. Signals on an auto-reset event
//! coalesce, which is fine here: each one has a single waiter.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub(crate) struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
    auto_reset: bool,
}

impl Event {
    /// Manual-reset event: stays signaled until `reset` is called.
    pub(crate) fn manual(initially_signaled: bool) -> Self {
        Event {
            signaled: Mutex::new(initially_signaled),
            cond: Condvar::new(),
            auto_reset: false,
        }
    }

    /// Auto-reset event: a successful wait consumes the signal.
    pub(crate) fn auto(initially_signaled: bool) -> Self {
        Event {
            signaled: Mutex::new(initially_signaled),
            cond: Condvar::new(),
            auto_reset: true,
        }
    }

    pub(crate) fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        if self.auto_reset {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    pub(crate) fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Blocks until the event is signaled or the timeout expires. Returns
    /// `true` when signaled. A `Duration` too large to form a deadline is
    /// treated as an unbounded wait.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut signaled = self.signaled.lock();
        loop {
            if *signaled {
                if self.auto_reset {
                    *signaled = false;
                }
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        // one final check: the signal may have landed exactly
                        // at the deadline
                        if *signaled {
                            if self.auto_reset {
                                *signaled = false;
                            }
                            return true;
                        }
                        return false;
                    }
                }
                None => self.cond.wait(&mut signaled),
            }
        }
    }
}
