//! Pending mutation handles
//!
//! A `PendingMutation` stands for a mutation whose identifier the storage
//! core has not assigned yet. Other mutations may reference it before then:
//! inside the same batch it is encoded as a temp id (its index), from any
//! other batch the referrer is parked until this handle resolves.
//!
//! Phase transitions:
//!
//! ```text
//! Open ──flush──▶ Queued ──result table──▶ Resolved
//!   ▲                                         │
//!   └── re-encode ── Blocked ◀── blocker ─────┘ (wakes dependents)
//! ```

use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::field::{Cursor, EncodeInterrupt};
use crate::errors::{WriteError, WriteResult};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of a pending mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPhase {
    /// Appended to the active batch; its index is a usable temp id
    Open,
    /// Waiting for a referenced mutation to resolve before encoding
    Blocked,
    /// Batch sealed and dispatched, awaiting the result table
    Queued,
    /// Identifier or error delivered
    Resolved,
}

#[derive(Debug)]
struct PendingState {
    phase: PendingPhase,
    batch_id: Option<u64>,
    index: Option<u32>,
    blocker: Option<PendingMutation>,
}

struct PendingInner {
    handle_id: u64,
    state: Mutex<PendingState>,
    outcome: watch::Sender<Option<WriteResult<u32>>>,
}

/// Future-like handle for a mutation that has not committed yet.
///
/// Cheap to clone; all clones observe the same outcome. Await it (or call
/// [`wait`](Self::wait)) to get the assigned identifier.
#[derive(Clone)]
pub struct PendingMutation {
    inner: Arc<PendingInner>,
}

impl PendingMutation {
    pub(crate) fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(PendingInner {
                handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(PendingState {
                    phase: PendingPhase::Open,
                    batch_id: None,
                    index: None,
                    blocker: None,
                }),
                outcome,
            }),
        }
    }

    /// Process-unique handle id, for logs
    pub fn handle_id(&self) -> u64 {
        self.inner.handle_id
    }

    /// Current phase
    pub fn phase(&self) -> PendingPhase {
        self.inner.state.lock().phase
    }

    /// Batch this mutation was last appended to
    pub fn batch_id(&self) -> Option<u64> {
        self.inner.state.lock().batch_id
    }

    /// Position in its batch, which doubles as its temp id
    pub fn temp_id(&self) -> Option<u32> {
        self.inner.state.lock().index
    }

    /// Mutation this one is parked behind, if blocked
    pub fn blocker(&self) -> Option<PendingMutation> {
        self.inner.state.lock().blocker.clone()
    }

    /// Outcome if already resolved
    pub fn result(&self) -> Option<WriteResult<u32>> {
        self.inner.outcome.borrow().clone()
    }

    /// Resolved identifier, if resolved successfully
    pub fn id(&self) -> Option<u32> {
        match self.result() {
            Some(Ok(id)) => Some(id),
            _ => None,
        }
    }

    /// Wait for the storage core to assign an identifier.
    ///
    /// Dropping this future does not cancel the mutation.
    pub async fn wait(&self) -> WriteResult<u32> {
        let mut rx = self.inner.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(WriteError::CoordinatorClosed))
    }

    /// Cursor to use for a reference to this mutation from `batch_id`.
    ///
    /// Fails with `Blocked(self)` while the identifier is unknown and no
    /// temp id is valid in that batch.
    pub(crate) fn cursor_in(&self, batch_id: u64) -> Result<Cursor, EncodeInterrupt> {
        let state = self.inner.state.lock();
        match state.phase {
            PendingPhase::Resolved => match self.result() {
                Some(Ok(id)) => Ok(Cursor::Id(id)),
                Some(Err(e)) => Err(EncodeInterrupt::Rejected(WriteError::DependencyFailed(
                    e.to_string(),
                ))),
                None => Err(EncodeInterrupt::Blocked(self.clone())),
            },
            PendingPhase::Open if state.batch_id == Some(batch_id) => match state.index {
                Some(index) => Ok(Cursor::Temp(index)),
                None => Err(EncodeInterrupt::Blocked(self.clone())),
            },
            _ => Err(EncodeInterrupt::Blocked(self.clone())),
        }
    }

    /// Walk the blocker chain to the mutation everything waits on.
    pub(crate) fn root(&self) -> PendingMutation {
        let mut current = self.clone();
        loop {
            let next = {
                let state = current.inner.state.lock();
                match (&state.phase, &state.blocker) {
                    (PendingPhase::Blocked, Some(blocker)) => blocker.clone(),
                    _ => break,
                }
            };
            current = next;
        }
        current
    }

    pub(crate) fn mark_open(&self, batch_id: u64, index: u32) {
        let mut state = self.inner.state.lock();
        state.phase = PendingPhase::Open;
        state.batch_id = Some(batch_id);
        state.index = Some(index);
        state.blocker = None;
    }

    pub(crate) fn mark_blocked(&self, blocker: PendingMutation) {
        let mut state = self.inner.state.lock();
        state.phase = PendingPhase::Blocked;
        state.batch_id = None;
        state.index = None;
        state.blocker = Some(blocker);
    }

    pub(crate) fn mark_queued(&self) {
        let mut state = self.inner.state.lock();
        debug_assert_eq!(state.phase, PendingPhase::Open);
        state.phase = PendingPhase::Queued;
    }

    /// Deliver the outcome. A second resolution is ignored.
    pub(crate) fn resolve(&self, outcome: WriteResult<u32>) {
        let mut state = self.inner.state.lock();
        if state.phase == PendingPhase::Resolved {
            return;
        }
        state.phase = PendingPhase::Resolved;
        state.blocker = None;
        self.inner.outcome.send_replace(Some(outcome));
    }
}

impl PartialEq for PendingMutation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PendingMutation {}

impl fmt::Debug for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PendingMutation")
            .field("handle_id", &self.inner.handle_id)
            .field("phase", &state.phase)
            .field("batch_id", &state.batch_id)
            .field("index", &state.index)
            .finish()
    }
}

impl IntoFuture for PendingMutation {
    type Output = WriteResult<u32>;
    type IntoFuture = BoxFuture<'static, WriteResult<u32>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
