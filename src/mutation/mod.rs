//! Mutation encoding
//!
//! Turns create/update/delete calls into instruction-stream records and
//! hands out `PendingMutation` handles for their future identifiers.
//!
//! # Forward references
//!
//! A field may reference a mutation that has not committed yet. If that
//! mutation is open in the same batch, the reference is written as a temp
//! id (high bit set, low bits = index in the batch) and the storage core
//! resolves it while applying the batch. Otherwise the encode stops with
//! `Blocked`, and the referring mutation is parked until the root of the
//! blocker chain resolves.

mod builder;
mod field;
mod pending;
mod stream;

pub use builder::{
    write_count, write_header, MutationRequest, OpKind, BATCH_OP_ID, BATCH_OP_TYPE, COUNT_OFFSET,
    HEADER_SIZE, SCHEMA_HASH_OFFSET,
};
pub use field::{Cursor, FieldValue, Reference, MAX_REAL_ID, TEMP_ID_FLAG};
pub use pending::{PendingMutation, PendingPhase};
pub use stream::{BatchHeader, DecodedField, DecodedMutation, InstructionStream};

pub(crate) use builder::encode_mutation;
pub(crate) use field::EncodeInterrupt;
