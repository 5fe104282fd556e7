//! aerodb-write - Mutation encoding and batched commit pipeline
//!
//! Turns create/update/delete calls into a binary instruction stream,
//! batches them, and hands sealed batches to worker threads that apply
//! them through the storage core.
//!
//! Data flow:
//!
//! ```text
//! WriteContext::create ─▶ Batch buffer ─▶ FlushScheduler ─▶ Coordinator
//!        │                                                     │
//!  PendingMutation ◀── ResultReader ◀── result table ◀── worker thread
//! ```

pub mod batch;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod mutation;
pub mod observability;
pub mod result;
pub mod schema;

pub use batch::{Batch, FlushScheduler, SealedBatch, WriteContext};
pub use buffer::{BufferOverflow, ByteBuffer};
pub use config::WriterConfig;
pub use coordinator::{Coordinator, CoordinatorSnapshot, CoreError, StorageCore};
pub use errors::{WriteError, WriteResult};
pub use mutation::{
    Cursor, FieldValue, InstructionStream, MutationRequest, OpKind, PendingMutation, PendingPhase,
    Reference,
};
pub use result::{MutationOutcome, ResultTable, RESULT_STRIDE};
pub use schema::{FieldDef, FieldKind, Schema, TypeDef};
