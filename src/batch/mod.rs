//! Batches and flushing
//!
//! - `Batch`: one encoded buffer plus the pending mutations in it
//! - `FlushScheduler`: debounced flush trigger per context
//! - `WriteContext`: the active batch, its in-flight predecessors and the
//!   mutation-call entry points
//!
//! Mutations appended before a flush are never split across two result
//! tables.

mod context;
mod scheduler;
mod state;

pub use context::WriteContext;
pub use scheduler::FlushScheduler;
pub use state::{Batch, SealedBatch};

pub(crate) use state::Dependent;
