//! Run cancellation: explicit aborts and the global run deadline.

use crate::error::{HarnessError, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cloneable handle that aborts a run from another thread.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    reason: Arc<Mutex<Option<String>>>,
}

impl AbortHandle {
    /// Creates a handle that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an abort. The first reason wins.
    pub fn abort(&self, reason: impl Into<String>) {
        if let Ok(mut guard) = self.reason.lock() {
            if guard.is_none() {
                *guard = Some(reason.into());
            }
        }
    }

    /// The abort reason, if an abort was requested.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|guard| guard.clone())
    }

    /// True once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        self.reason().is_some()
    }
}

/// Combination of an optional run deadline and an abort handle.
///
/// Every bounded wait in the harness checks this between polls.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Option<Instant>,
    abort: AbortHandle,
}

impl Deadline {
    /// A deadline `timeout` from now (or none), tied to `abort`.
    pub fn new(timeout: Option<Duration>, abort: AbortHandle) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
            abort,
        }
    }

    /// No deadline and no abort handle anyone else can trigger.
    pub fn none() -> Self {
        Self::new(None, AbortHandle::new())
    }

    /// Fails with `Aborted` if the run was aborted or the deadline passed.
    pub fn check(&self) -> Result<()> {
        if let Some(reason) = self.abort.reason() {
            return Err(HarnessError::Aborted(reason));
        }
        if let Some(at) = self.at {
            if Instant::now() >= at {
                return Err(HarnessError::Aborted("run timeout elapsed".into()));
            }
        }
        Ok(())
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Sleeps for `interval`, cut short by the deadline.
    pub fn sleep(&self, interval: Duration) {
        let interval = match self.remaining() {
            Some(left) => interval.min(left),
            None => interval,
        };
        std::thread::sleep(interval);
    }
}
