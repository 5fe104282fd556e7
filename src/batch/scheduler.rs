//! Flush scheduler
//!
//! Arms at most one flush trigger per encoding context. With a zero delay
//! the trigger fires on the next scheduler turn. On a current-thread
//! runtime that turn only comes once the submitting task yields, so every
//! mutation issued synchronously from the same call stack lands in one
//! batch; `WriteContext::new` refuses a zero delay on any other flavor.
//! With a positive delay it fires after a timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;

/// Debounced flush trigger owned by one encoding context
#[derive(Debug)]
pub struct FlushScheduler {
    delay: Duration,
    armed: AtomicBool,
}

impl FlushScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: AtomicBool::new(false),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a trigger is pending
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Arm a trigger that runs `fire` later. No-op if one is armed.
    ///
    /// Returns whether this call armed it. `fire` must call
    /// [`disarm`](Self::disarm) before flushing.
    pub fn schedule<F>(&self, runtime: &Handle, fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.armed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let delay = self.delay;
        runtime.spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            fire();
        });
        true
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}
