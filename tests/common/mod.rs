//! Shared helpers for integration tests
//!
//! `MockCore` stands in for the native storage core: it decodes each
//! batch, assigns ids to creates, resolves temp-id cursors against the
//! ids it assigned earlier in the same batch, and records what it saw.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use aerodb_write::coordinator::{Coordinator, CoreError, StorageCore};
use aerodb_write::mutation::{Cursor, DecodedMutation, InstructionStream, OpKind};
use aerodb_write::result::{MutationOutcome, ResultTable};
use aerodb_write::schema::{FieldDef, FieldKind, Schema, TypeDef};
use aerodb_write::{WriteContext, WriterConfig};

pub const USER: u16 = 1;
pub const POST: u16 = 2;
pub const COMMENT: u16 = 3;
pub const TAG: u16 = 4;

pub const SCHEMA_HASH: u64 = 0xB10C_0001;

/// User, Post, Comment and Tag
pub fn blog_schema() -> Schema {
    blog_schema_with_hash(SCHEMA_HASH)
}

pub fn blog_schema_with_hash(hash: u64) -> Schema {
    Schema::new(hash)
        .with_type(
            TypeDef::new(USER, "User")
                .field(FieldDef::new(0, "name", FieldKind::String).required().max_len(64))
                .field(FieldDef::new(1, "age", FieldKind::Int)),
        )
        .with_type(
            TypeDef::new(POST, "Post")
                .field(FieldDef::new(0, "author", FieldKind::Reference { target: "User".into() }))
                .field(FieldDef::new(1, "title", FieldKind::String)),
        )
        .with_type(
            TypeDef::new(COMMENT, "Comment")
                .field(FieldDef::new(0, "post", FieldKind::Reference { target: "Post".into() }))
                .field(FieldDef::new(1, "body", FieldKind::String)),
        )
        .with_type(
            TypeDef::new(TAG, "Tag")
                .field(FieldDef::new(0, "label", FieldKind::String))
                .field(FieldDef::new(1, "posts", FieldKind::References { target: "Post".into() })),
        )
}

/// A batch as the mock core applied it
#[derive(Debug, Clone)]
pub struct AppliedBatch {
    pub stream: InstructionStream,
    /// Id per mutation index (0 for rejected mutations)
    pub ids: Vec<u32>,
    pub thread: Option<String>,
}

impl AppliedBatch {
    /// Resolve a cursor the way the storage core does
    pub fn resolve(&self, cursor: Cursor) -> Option<u32> {
        match cursor {
            Cursor::None => None,
            Cursor::Id(id) => Some(id),
            Cursor::Temp(index) => self.ids.get(index as usize).copied(),
        }
    }
}

/// Test storage core
pub struct MockCore {
    next_id: AtomicU32,
    applied: Mutex<Vec<AppliedBatch>>,
    rejected_types: Mutex<HashSet<u16>>,
    panic_type: Mutex<Option<u16>>,
    truncate: AtomicBool,
    fail_batches: AtomicBool,
    delay: Mutex<Duration>,
}

impl MockCore {
    pub fn new() -> Arc<Self> {
        Self::starting_at(1)
    }

    /// First create gets `first_id`
    pub fn starting_at(first_id: u32) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(first_id),
            applied: Mutex::new(Vec::new()),
            rejected_types: Mutex::new(HashSet::new()),
            panic_type: Mutex::new(None),
            truncate: AtomicBool::new(false),
            fail_batches: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Reject every mutation of `type_id` with a modify error
    pub fn reject_type(&self, type_id: u16) {
        self.rejected_types.lock().insert(type_id);
    }

    /// Panic once a batch touching `type_id` arrives
    pub fn panic_on_type(&self, type_id: u16) {
        *self.panic_type.lock() = Some(type_id);
    }

    /// Return result tables one entry short
    pub fn truncate_results(&self) {
        self.truncate.store(true, Ordering::SeqCst);
    }

    /// Fail whole batches with a core error
    pub fn fail_batches(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }

    /// Sleep this long inside every apply
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn applied(&self) -> Vec<AppliedBatch> {
        self.applied.lock().clone()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }

    fn apply_one(&self, mutation: &DecodedMutation, ids: &[u32]) -> MutationOutcome {
        if self.rejected_types.lock().contains(&mutation.type_id) {
            return MutationOutcome::Modify(4);
        }
        match mutation.op {
            OpKind::Create => MutationOutcome::Success(self.next_id.fetch_add(1, Ordering::SeqCst)),
            OpKind::Update | OpKind::Delete => match mutation.target {
                Cursor::Id(id) => MutationOutcome::Success(id),
                Cursor::Temp(index) => match ids.get(index as usize) {
                    Some(id) if *id != 0 => MutationOutcome::Success(*id),
                    _ => MutationOutcome::Validation(9),
                },
                Cursor::None => MutationOutcome::Validation(1),
            },
        }
    }
}

impl StorageCore for MockCore {
    fn apply_batch(&self, batch: &[u8]) -> Result<Vec<u8>, CoreError> {
        let stream = InstructionStream::parse(batch).map_err(|e| CoreError::new(e.to_string()))?;

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let panic_type = *self.panic_type.lock();
        if let Some(type_id) = panic_type {
            if stream.touched_types().contains(&type_id) {
                *self.panic_type.lock() = None;
                panic!("storage core crashed on type {}", type_id);
            }
        }

        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(CoreError::new("disk full"));
        }

        let mut ids = Vec::with_capacity(stream.mutations.len());
        let mut outcomes = Vec::with_capacity(stream.mutations.len());
        for mutation in &stream.mutations {
            let outcome = self.apply_one(mutation, &ids);
            ids.push(match outcome {
                MutationOutcome::Success(id) => id,
                _ => 0,
            });
            outcomes.push(outcome);
        }

        let mut table = ResultTable::encode(&outcomes);
        if self.truncate.load(Ordering::SeqCst) {
            table.truncate(table.len().saturating_sub(5));
        }

        self.applied.lock().push(AppliedBatch {
            stream,
            ids,
            thread: std::thread::current().name().map(str::to_string),
        });
        Ok(table)
    }
}

/// Small test configuration: 64 KiB arena, two workers
pub fn test_config() -> WriterConfig {
    WriterConfig::default().with_arena_bytes(64 * 1024)
}

/// Coordinator and context over a fresh mock core
pub fn setup(config: WriterConfig, core: Arc<MockCore>) -> (Coordinator, WriteContext) {
    let coordinator = Coordinator::start(&config, core).unwrap();
    let context = WriteContext::new(config, blog_schema(), coordinator.clone()).unwrap();
    (coordinator, context)
}
