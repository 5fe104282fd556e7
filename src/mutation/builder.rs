//! Mutation builder
//!
//! Serializes one create/update/delete call into a batch buffer.
//!
//! Batch header: `[opId:1][opType:1][schemaHash:8][count:4]`
//! Mutation record: `[opcode:1][cursor:4][typeId:2][bodyLen:4][fieldUnits...]`
//!
//! The target cursor sits directly after the opcode; the type id and body
//! length follow it.
//!
//! Field units are written in field-id order. A failed encode leaves the
//! buffer exactly as long as it was before the call.

use std::collections::HashSet;

use super::field::{encode_field, reference_cursor, validate_field, Cursor, EncodeInterrupt, FieldValue, Reference};
use crate::buffer::{BufferResult, ByteBuffer};
use crate::errors::WriteError;
use crate::schema::{FieldDef, Schema, TypeDef};

/// Operation id of a modify batch
pub const BATCH_OP_ID: u8 = 0x0A;

/// Operation type of a modify batch
pub const BATCH_OP_TYPE: u8 = 0;

/// Size of the batch header
pub const HEADER_SIZE: usize = 14;

/// Offset of the schema hash in the header
pub const SCHEMA_HASH_OFFSET: usize = 2;

/// Offset of the mutation count in the header
pub const COUNT_OFFSET: usize = 10;

/// Mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    /// Wire opcode
    pub fn opcode(self) -> u8 {
        match self {
            OpKind::Create => 1,
            OpKind::Update => 2,
            OpKind::Delete => 3,
        }
    }

    /// Decode a wire opcode
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            1 => Some(OpKind::Create),
            2 => Some(OpKind::Update),
            3 => Some(OpKind::Delete),
            _ => None,
        }
    }
}

/// A logical mutation call, kept so a blocked mutation can be re-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub op: OpKind,
    pub type_name: String,
    pub target: Option<Reference>,
    pub fields: Vec<(String, FieldValue)>,
}

impl MutationRequest {
    /// Create a row
    pub fn create<I, K>(type_name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        Self {
            op: OpKind::Create,
            type_name: type_name.into(),
            target: None,
            fields: collect_fields(fields),
        }
    }

    /// Update fields of an existing or pending row
    pub fn update<I, K>(type_name: impl Into<String>, target: impl Into<Reference>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        Self {
            op: OpKind::Update,
            type_name: type_name.into(),
            target: Some(target.into()),
            fields: collect_fields(fields),
        }
    }

    /// Delete an existing or pending row
    pub fn delete(type_name: impl Into<String>, target: impl Into<Reference>) -> Self {
        Self {
            op: OpKind::Delete,
            type_name: type_name.into(),
            target: Some(target.into()),
            fields: Vec::new(),
        }
    }
}

fn collect_fields<I, K>(fields: I) -> Vec<(String, FieldValue)>
where
    I: IntoIterator<Item = (K, FieldValue)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// What a successful encode appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Encoded {
    pub type_id: u16,
}

/// Write a batch header with a zero count.
pub fn write_header(buf: &mut ByteBuffer, schema_hash: u64) -> BufferResult<()> {
    buf.push_u8(BATCH_OP_ID)?;
    buf.push_u8(BATCH_OP_TYPE)?;
    buf.push_u64(schema_hash)?;
    buf.push_u32(0)
}

/// Backfill the mutation count of a sealed batch.
pub fn write_count(buf: &mut ByteBuffer, count: u32) {
    buf.write_u32_at(COUNT_OFFSET, count);
}

/// Validate a request and resolve its field definitions, in field-id order.
fn plan<'a>(
    schema: &'a Schema,
    request: &'a MutationRequest,
) -> Result<(&'a TypeDef, Vec<(&'a FieldDef, &'a FieldValue)>), WriteError> {
    let def = schema.type_by_name(&request.type_name)?;
    let type_name = def.name.as_str();

    match (request.op, &request.target) {
        (OpKind::Create, Some(_)) => {
            return Err(WriteError::validation(type_name, "create takes no target"));
        }
        (OpKind::Update | OpKind::Delete, None) => {
            return Err(WriteError::validation(type_name, "update and delete need a target"));
        }
        (OpKind::Delete, Some(_)) if !request.fields.is_empty() => {
            return Err(WriteError::validation(type_name, "delete takes no fields"));
        }
        _ => {}
    }

    let mut seen = HashSet::new();
    let mut planned = Vec::with_capacity(request.fields.len());
    for (name, value) in &request.fields {
        let field = def.field_by_name(name).ok_or_else(|| {
            WriteError::validation(type_name, format!("unknown field '{}'", name))
        })?;
        if !seen.insert(field.id) {
            return Err(WriteError::validation(type_name, format!("field '{}' set twice", name)));
        }
        validate_field(type_name, field, value)?;
        planned.push((field, value));
    }

    if request.op == OpKind::Create {
        if let Some(missing) = def.fields.iter().find(|f| f.required && !seen.contains(&f.id)) {
            return Err(WriteError::validation(
                type_name,
                format!("required field '{}' missing", missing.name),
            ));
        }
    }

    planned.sort_by_key(|(field, _)| field.id);
    Ok((def, planned))
}

/// Append one mutation record to `buf`, the buffer of batch `batch_id`.
///
/// On any interrupt the buffer is rolled back to its length on entry.
pub(crate) fn encode_mutation(
    buf: &mut ByteBuffer,
    schema: &Schema,
    request: &MutationRequest,
    batch_id: u64,
) -> Result<Encoded, EncodeInterrupt> {
    let (def, planned) = plan(schema, request).map_err(EncodeInterrupt::Rejected)?;

    let mark = buf.len();
    let written = write_record(buf, def, request, &planned, batch_id);
    match written {
        Ok(()) => Ok(Encoded { type_id: def.id }),
        Err(interrupt) => {
            buf.truncate(mark);
            Err(interrupt)
        }
    }
}

fn write_record(
    buf: &mut ByteBuffer,
    def: &TypeDef,
    request: &MutationRequest,
    planned: &[(&FieldDef, &FieldValue)],
    batch_id: u64,
) -> Result<(), EncodeInterrupt> {
    let cursor = match &request.target {
        Some(target) => reference_cursor(target, batch_id)?,
        None => Cursor::None,
    };

    buf.push_u8(request.op.opcode())?;
    buf.push_u32(cursor.to_wire())?;
    buf.push_u16(def.id)?;
    let body_at = buf.reserve_u32()?;
    let body_start = buf.len();

    for (field, value) in planned {
        encode_field(buf, field, value, batch_id)?;
    }

    let body_len = (buf.len() - body_start) as u32;
    buf.write_u32_at(body_at, body_len);
    Ok(())
}
