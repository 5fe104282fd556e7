//! Result tables
//!
//! Decodes the storage core's per-mutation outcomes and resolves the
//! pending mutations of a completed batch.

mod reader;
mod table;

pub(crate) use reader::ResultReader;
pub use table::{MutationOutcome, ResultTable, RESULT_STRIDE};
