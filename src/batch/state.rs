//! Batch state
//!
//! A batch owns one encoded buffer and the pending mutations appended to
//! it. Once sealed its count and bytes never change; only resolution state
//! (result table, dependents) moves afterwards.
//!
//! A batch never drops a mutation silently: anything still unresolved when
//! the batch goes away fails with `ContextClosed`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::ByteBuffer;
use crate::errors::{WriteError, WriteResult};
use crate::mutation::{write_count, write_header, MutationRequest, PendingMutation, HEADER_SIZE};

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A mutation parked behind an unresolved forward reference into this batch
#[derive(Debug, Clone)]
pub(crate) struct Dependent {
    pub pending: PendingMutation,
    pub request: MutationRequest,
}

/// What the coordinator receives for a sealed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBatch {
    /// Process-unique batch id
    pub batch_id: u64,
    /// Complete instruction stream, header included
    pub payload: Vec<u8>,
    /// Record types touched by the batch
    pub types: BTreeSet<u16>,
    /// Number of mutations
    pub count: u32,
}

/// A group of mutations sharing one encoded buffer
#[derive(Debug)]
pub struct Batch {
    id: u64,
    schema_hash: u64,
    buffer: ByteBuffer,
    count: u32,
    promises: Vec<PendingMutation>,
    dependents: Vec<Dependent>,
    result_table: Option<Vec<u8>>,
    flushed: bool,
    types: BTreeSet<u16>,
}

impl Batch {
    /// Create an empty batch with its header written
    pub fn new(schema_hash: u64, initial_bytes: usize, max_bytes: usize) -> WriteResult<Self> {
        let mut buffer = ByteBuffer::new(initial_bytes.max(HEADER_SIZE), max_bytes);
        write_header(&mut buffer, schema_hash)?;
        Ok(Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            schema_hash,
            buffer,
            count: 0,
            promises: Vec::new(),
            dependents: Vec::new(),
            result_table: None,
            flushed: false,
            types: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn schema_hash(&self) -> u64 {
        self.schema_hash
    }

    /// Number of mutations appended
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Encoded length, header included
    pub fn encoded_len(&self) -> usize {
        self.buffer.len()
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Record types touched so far
    pub fn types(&self) -> &BTreeSet<u16> {
        &self.types
    }

    /// Pending mutations in append order
    pub fn promises(&self) -> &[PendingMutation] {
        &self.promises
    }

    /// Number of parked dependents
    pub fn dependent_count(&self) -> usize {
        self.dependents.len()
    }

    /// Result table, once the batch completed
    pub fn result_table(&self) -> Option<&[u8]> {
        self.result_table.as_deref()
    }

    /// Buffer to encode into; `None` once sealed
    pub(crate) fn buffer_mut(&mut self) -> Option<&mut ByteBuffer> {
        if self.flushed {
            None
        } else {
            Some(&mut self.buffer)
        }
    }

    /// Register a mutation whose record was just encoded; returns its index
    pub(crate) fn append(&mut self, pending: &PendingMutation, type_id: u16) -> u32 {
        debug_assert!(!self.flushed, "append after seal");
        let index = self.count;
        self.count += 1;
        self.types.insert(type_id);
        self.promises.push(pending.clone());
        pending.mark_open(self.id, index);
        index
    }

    pub(crate) fn park(&mut self, dependent: Dependent) {
        self.dependents.push(dependent);
    }

    pub(crate) fn take_dependents(&mut self) -> Vec<Dependent> {
        std::mem::take(&mut self.dependents)
    }

    pub(crate) fn set_result_table(&mut self, table: Vec<u8>) {
        self.result_table = Some(table);
    }

    /// Seal the batch: backfill the count, mark it flushed and queue its
    /// promises. Returns `None` if already sealed or empty.
    pub fn seal(&mut self) -> Option<SealedBatch> {
        if self.flushed || self.count == 0 {
            return None;
        }
        write_count(&mut self.buffer, self.count);
        self.flushed = true;
        for pending in &self.promises {
            pending.mark_queued();
        }
        Some(SealedBatch {
            batch_id: self.id,
            payload: self.buffer.as_slice().to_vec(),
            types: self.types.clone(),
            count: self.count,
        })
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        // resolve() ignores mutations that already have an outcome
        for pending in &self.promises {
            pending.resolve(Err(WriteError::ContextClosed));
        }
        for dependent in &self.dependents {
            dependent.pending.resolve(Err(WriteError::ContextClosed));
        }
    }
}
