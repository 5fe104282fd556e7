//! Two-word status cell shared between the coordinator and one worker
//!
//! Word 0 is the apply signal, set by the coordinator before handoff.
//! Word 1 is the completion code, set once by the worker. Waiting on the
//! completion word suspends the waiting task instead of spinning.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::Notify;

/// Word 0: nothing requested
pub const SIGNAL_IDLE: u32 = 0;
/// Word 0: apply the attached batch
pub const SIGNAL_APPLY: u32 = 1;

/// Word 1: not finished
pub const COMPLETION_PENDING: u32 = 0;
/// Word 1: storage core returned (result or core error)
pub const COMPLETION_DONE: u32 = 1;
/// Word 1: worker thread died while applying
pub const COMPLETION_WORKER_DIED: u32 = 2;

/// Shared status cell
#[derive(Debug, Default)]
pub struct StatusCell {
    words: [AtomicU32; 2],
    wake: Notify,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an apply
    pub fn signal(&self) {
        self.words[0].store(SIGNAL_APPLY, Ordering::Release);
    }

    pub fn signal_word(&self) -> u32 {
        self.words[0].load(Ordering::Acquire)
    }

    /// Set the completion code and wake the waiter
    pub fn complete(&self, code: u32) {
        debug_assert_ne!(code, COMPLETION_PENDING);
        self.words[1].store(code, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn completion(&self) -> u32 {
        self.words[1].load(Ordering::Acquire)
    }

    /// Wait until the completion word is set; returns it.
    pub async fn wait_complete(&self) -> u32 {
        loop {
            let notified = self.wake.notified();
            let code = self.completion();
            if code != COMPLETION_PENDING {
                return code;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_signal_and_complete_words() {
        let cell = StatusCell::new();
        assert_eq!(cell.signal_word(), SIGNAL_IDLE);
        cell.signal();
        assert_eq!(cell.signal_word(), SIGNAL_APPLY);
        assert_eq!(cell.completion(), COMPLETION_PENDING);
        cell.complete(COMPLETION_DONE);
        assert_eq!(cell.completion(), COMPLETION_DONE);
    }

    #[tokio::test]
    async fn test_wait_complete_across_threads() {
        let cell = Arc::new(StatusCell::new());
        let remote = cell.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.complete(COMPLETION_WORKER_DIED);
        });
        assert_eq!(cell.wait_complete().await, COMPLETION_WORKER_DIED);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_wait_after_complete_returns_immediately() {
        let cell = StatusCell::new();
        cell.complete(COMPLETION_DONE);
        assert_eq!(cell.wait_complete().await, COMPLETION_DONE);
    }
}
