//! Field values and field-unit serializers
//!
//! Every field unit is `[fieldId:1][kind:1][len:4][payload]`. The length
//! is reserved first and backfilled once the payload is written.
//!
//! Reference-valued fields may hold a `PendingMutation` instead of a real
//! id. Serializing such a reference either yields a cursor or interrupts
//! the encode with `EncodeInterrupt::Blocked`, which the mutation builder
//! turns into a parked dependent instead of an error.

use super::pending::PendingMutation;
use crate::buffer::{BufferOverflow, ByteBuffer};
use crate::errors::WriteError;
use crate::schema::{FieldDef, FieldKind};

/// High bit of a wire cursor marks a temp id
pub const TEMP_ID_FLAG: u32 = 0x8000_0000;

/// Largest identifier the storage core may assign
pub const MAX_REAL_ID: u32 = 0x7FFF_FFFF;

/// Target or reference cursor as written on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// No target (creates)
    None,
    /// Real identifier
    Id(u32),
    /// Index of a mutation in the same batch
    Temp(u32),
}

impl Cursor {
    /// Encode as a little-endian wire word
    pub fn to_wire(self) -> u32 {
        match self {
            Cursor::None => 0,
            Cursor::Id(id) => id,
            Cursor::Temp(index) => TEMP_ID_FLAG | index,
        }
    }

    /// Decode a wire word
    pub fn from_wire(word: u32) -> Self {
        if word == 0 {
            Cursor::None
        } else if word & TEMP_ID_FLAG != 0 {
            Cursor::Temp(word & !TEMP_ID_FLAG)
        } else {
            Cursor::Id(word)
        }
    }
}

/// A reference to a row: known, or the future result of a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Committed row id
    Id(u32),
    /// Row that a pending mutation will create
    Pending(PendingMutation),
}

impl From<u32> for Reference {
    fn from(id: u32) -> Self {
        Reference::Id(id)
    }
}

impl From<PendingMutation> for Reference {
    fn from(pending: PendingMutation) -> Self {
        Reference::Pending(pending)
    }
}

impl From<&PendingMutation> for Reference {
    fn from(pending: &PendingMutation) -> Self {
        Reference::Pending(pending.clone())
    }
}

/// A field value supplied by a mutation call
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Uint32(u32),
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Binary(Vec<u8>),
    Reference(Reference),
    References(Vec<Reference>),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Uint32(_) => "uint32",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
            FieldValue::String(_) => "string",
            FieldValue::Binary(_) => "binary",
            FieldValue::Reference(_) => "reference",
            FieldValue::References(_) => "references",
        }
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Uint32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Binary(v)
    }
}

impl From<Reference> for FieldValue {
    fn from(v: Reference) -> Self {
        FieldValue::Reference(v)
    }
}

impl From<&PendingMutation> for FieldValue {
    fn from(v: &PendingMutation) -> Self {
        FieldValue::Reference(Reference::from(v))
    }
}

impl From<Vec<Reference>> for FieldValue {
    fn from(v: Vec<Reference>) -> Self {
        FieldValue::References(v)
    }
}

/// Why encoding one mutation stopped early.
///
/// `Blocked` is control flow, not an error: it carries the unresolved
/// mutation the encode depends on.
#[derive(Debug)]
pub(crate) enum EncodeInterrupt {
    Overflow(BufferOverflow),
    Blocked(PendingMutation),
    Rejected(WriteError),
}

impl From<BufferOverflow> for EncodeInterrupt {
    fn from(e: BufferOverflow) -> Self {
        EncodeInterrupt::Overflow(e)
    }
}

/// Resolve a reference to a cursor valid in `batch_id`.
pub(crate) fn reference_cursor(
    reference: &Reference,
    batch_id: u64,
) -> Result<Cursor, EncodeInterrupt> {
    match reference {
        Reference::Id(id) if (1..=MAX_REAL_ID).contains(id) => Ok(Cursor::Id(*id)),
        Reference::Id(id) => Err(EncodeInterrupt::Rejected(WriteError::validation(
            "reference",
            format!("id {} out of range", id),
        ))),
        Reference::Pending(pending) => pending.cursor_in(batch_id),
    }
}

/// Check a value against its field definition without writing anything.
pub(crate) fn validate_field(
    type_name: &str,
    def: &FieldDef,
    value: &FieldValue,
) -> Result<(), WriteError> {
    let matches = matches!(
        (&def.kind, value),
        (FieldKind::Uint32, FieldValue::Uint32(_))
            | (FieldKind::Int, FieldValue::Int(_))
            | (FieldKind::Float, FieldValue::Float(_))
            | (FieldKind::Bool, FieldValue::Bool(_))
            | (FieldKind::String, FieldValue::String(_))
            | (FieldKind::Binary, FieldValue::Binary(_))
            | (FieldKind::Reference { .. }, FieldValue::Reference(_))
            | (FieldKind::References { .. }, FieldValue::References(_))
    );
    if !matches {
        return Err(WriteError::validation(
            type_name,
            format!(
                "field '{}' expects {}, got {}",
                def.name,
                def.kind.kind_name(),
                value.kind_name()
            ),
        ));
    }

    let len = match value {
        FieldValue::String(s) => Some(s.len()),
        FieldValue::Binary(b) => Some(b.len()),
        FieldValue::References(refs) => Some(refs.len()),
        _ => None,
    };
    if let (Some(max), Some(len)) = (def.max_len, len) {
        if len > max {
            return Err(WriteError::validation(
                type_name,
                format!("field '{}' length {} exceeds {}", def.name, len, max),
            ));
        }
    }
    Ok(())
}

/// Append one field unit.
///
/// The caller rolls the buffer back on any interrupt.
pub(crate) fn encode_field(
    buf: &mut ByteBuffer,
    def: &FieldDef,
    value: &FieldValue,
    batch_id: u64,
) -> Result<(), EncodeInterrupt> {
    buf.push_u8(def.id)?;
    buf.push_u8(def.kind.tag())?;
    let len_at = buf.reserve_u32()?;
    let start = buf.len();

    match value {
        FieldValue::Uint32(v) => buf.push_u32(*v)?,
        FieldValue::Int(v) => buf.push_i64(*v)?,
        FieldValue::Float(v) => buf.push_f64(*v)?,
        FieldValue::Bool(v) => buf.push_u8(u8::from(*v))?,
        FieldValue::String(s) => buf.push_bytes(s.as_bytes())?,
        FieldValue::Binary(b) => buf.push_bytes(b)?,
        FieldValue::Reference(r) => {
            let cursor = reference_cursor(r, batch_id)?;
            buf.push_u32(cursor.to_wire())?;
        }
        FieldValue::References(refs) => {
            buf.push_u32(refs.len() as u32)?;
            for r in refs {
                let cursor = reference_cursor(r, batch_id)?;
                buf.push_u32(cursor.to_wire())?;
            }
        }
    }

    let payload_len = (buf.len() - start) as u32;
    buf.write_u32_at(len_at, payload_len);
    Ok(())
}
