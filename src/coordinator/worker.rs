//! Worker threads
//!
//! Each worker is an OS thread that applies one batch at a time through
//! the `StorageCore`. It reads its batch from the shared arena (or from a
//! private buffer if the region was detached), writes the result into its
//! ticket and sets the ticket's completion word.
//!
//! A panic inside the storage core kills the worker: the ticket is
//! completed with `COMPLETION_WORKER_DIED` and the thread exits.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;

use super::arena::SharedArena;
use super::status::{StatusCell, COMPLETION_DONE, COMPLETION_WORKER_DIED};
use crate::errors::{WriteError, WriteResult};
use crate::observability::{log_event, Event, Severity};

/// Error reported by the storage core for a whole batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CoreError {
    pub message: String,
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CoreError> for WriteError {
    fn from(e: CoreError) -> Self {
        WriteError::Core(e.message)
    }
}

/// The native storage core that interprets instruction streams.
///
/// `apply_batch` receives one sealed batch and returns its result table:
/// `5 * count` bytes, one `[id:4 LE][code:1]` entry per mutation.
/// It runs on a worker thread and may block.
pub trait StorageCore: Send + Sync + 'static {
    fn apply_batch(&self, batch: &[u8]) -> Result<Vec<u8>, CoreError>;
}

/// Where a worker finds the batch bytes
#[derive(Debug, Clone)]
pub(crate) enum WorkerPayload {
    Shared {
        arena: Arc<SharedArena>,
        offset: usize,
        len: usize,
    },
    Private(Arc<[u8]>),
}

impl WorkerPayload {
    fn to_vec(&self) -> Vec<u8> {
        match self {
            WorkerPayload::Shared { arena, offset, len } => arena.read(*offset, *len),
            WorkerPayload::Private(bytes) => bytes.to_vec(),
        }
    }
}

/// Status cell plus the slot the worker leaves its result in
#[derive(Debug, Default)]
pub(crate) struct WorkerTicket {
    pub status: StatusCell,
    result: Mutex<Option<Result<Vec<u8>, CoreError>>>,
}

impl WorkerTicket {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, result: Result<Vec<u8>, CoreError>) {
        *self.result.lock() = Some(result);
    }

    /// Take the result left by a completed worker
    pub fn take_result(&self) -> WriteResult<Vec<u8>> {
        match self.result.lock().take() {
            Some(Ok(table)) => Ok(table),
            Some(Err(e)) => Err(e.into()),
            None => Err(WriteError::Core("worker completed without a result".into())),
        }
    }
}

/// One apply request
pub(crate) struct WorkerMessage {
    pub payload: WorkerPayload,
    pub ticket: Arc<WorkerTicket>,
}

/// Coordinator-side handle of a worker thread
pub(crate) struct WorkerHandle {
    sender: Option<mpsc::Sender<WorkerMessage>>,
}

impl WorkerHandle {
    /// Spawn the worker thread
    pub fn spawn(index: usize, core: Arc<dyn StorageCore>) -> WriteResult<Self> {
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name(format!("aerodb-write-worker-{}", index))
            .spawn(move || run_worker(core, receiver))
            .map_err(|e| WriteError::InvalidConfig(format!("cannot spawn worker {}: {}", index, e)))?;
        log_event(Severity::Info, Event::WorkerStarted, &[("worker", &index.to_string())]);
        Ok(Self {
            sender: Some(sender),
        })
    }

    /// Signal the ticket and wake the worker.
    ///
    /// Hands the message back if the worker is gone.
    pub fn send(&self, message: WorkerMessage) -> Result<(), WorkerMessage> {
        match &self.sender {
            Some(sender) => {
                message.ticket.status.signal();
                sender.send(message).map_err(|e| e.0)
            }
            None => Err(message),
        }
    }

    /// Drop the channel; the thread exits after its current batch
    pub fn close(&mut self) {
        self.sender = None;
    }
}

fn run_worker(core: Arc<dyn StorageCore>, receiver: mpsc::Receiver<WorkerMessage>) {
    while let Ok(message) = receiver.recv() {
        let bytes = message.payload.to_vec();
        match panic::catch_unwind(AssertUnwindSafe(|| core.apply_batch(&bytes))) {
            Ok(result) => {
                message.ticket.store(result);
                message.ticket.status.complete(COMPLETION_DONE);
            }
            Err(_) => {
                message.ticket.status.complete(COMPLETION_WORKER_DIED);
                return;
            }
        }
    }
}
