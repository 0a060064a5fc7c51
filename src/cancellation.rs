//! Session teardown signal.
//!
//! One token is created per reading session. The fetch coordinator hands a
//! clone to every worker thread, the controller consults it before
//! dispatching, and the terminal driver trips it from the Ctrl-C handler.
//! Cancellation is one-way: a token never resets.

use anyhow::{Result, anyhow};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually closed the session.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Gate a side effect, e.g. `check_cancelled("persist")` before a worker
    /// writes to the store.
    pub fn check_cancelled(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(anyhow!("session closed before stage={stage}"));
        }
        Ok(())
    }
}
