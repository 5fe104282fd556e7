//! Instruction stream decoder
//!
//! Reads a sealed batch back into its header and mutation records. Used
//! by storage-core implementations that consume the stream and by tests
//! asserting on what the builder produced.

use std::collections::BTreeSet;

use super::builder::{OpKind, BATCH_OP_ID, HEADER_SIZE};
use super::field::Cursor;
use crate::errors::{WriteError, WriteResult};

/// Decoded batch header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub op_id: u8,
    pub op_type: u8,
    pub schema_hash: u64,
    pub count: u32,
}

/// One decoded field unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedField {
    pub field_id: u8,
    pub kind_tag: u8,
    pub payload: Vec<u8>,
}

impl DecodedField {
    /// Payload as a single cursor (reference fields)
    pub fn cursor(&self) -> Option<Cursor> {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(Cursor::from_wire(u32::from_le_bytes(bytes)))
    }

    /// Payload as a cursor list (reference-list fields)
    pub fn cursors(&self) -> Option<Vec<Cursor>> {
        let (count, rest) = self.payload.split_first_chunk::<4>()?;
        let count = u32::from_le_bytes(*count) as usize;
        if rest.len() != count * 4 {
            return None;
        }
        Some(
            rest.chunks_exact(4)
                .map(|c| Cursor::from_wire(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
        )
    }

    /// Payload as UTF-8 (string fields)
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Payload as a little-endian i64 (int fields)
    pub fn as_i64(&self) -> Option<i64> {
        let bytes: [u8; 8] = self.payload.as_slice().try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }
}

/// One decoded mutation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMutation {
    pub op: OpKind,
    pub type_id: u16,
    pub target: Cursor,
    pub fields: Vec<DecodedField>,
}

impl DecodedMutation {
    /// Field unit by id
    pub fn field(&self, field_id: u8) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }
}

/// A decoded batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionStream {
    pub header: BatchHeader,
    pub mutations: Vec<DecodedMutation>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> WriteResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| WriteError::malformed(self.pos, format!("truncated {}", what)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> WriteResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> WriteResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> WriteResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> WriteResult<u64> {
        let b = self.take(8, what)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }
}

impl InstructionStream {
    /// Decode a sealed batch
    pub fn parse(bytes: &[u8]) -> WriteResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(WriteError::malformed(bytes.len(), "truncated header"));
        }
        let mut reader = Reader { bytes, pos: 0 };
        let header = BatchHeader {
            op_id: reader.u8("op id")?,
            op_type: reader.u8("op type")?,
            schema_hash: reader.u64("schema hash")?,
            count: reader.u32("count")?,
        };
        if header.op_id != BATCH_OP_ID {
            return Err(WriteError::malformed(0, format!("unexpected op id {:#x}", header.op_id)));
        }

        let mut mutations = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            let at = reader.pos;
            let opcode = reader.u8("opcode")?;
            let op = OpKind::from_opcode(opcode)
                .ok_or_else(|| WriteError::malformed(at, format!("unknown opcode {}", opcode)))?;
            let target = Cursor::from_wire(reader.u32("cursor")?);
            let type_id = reader.u16("type id")?;
            let body_len = reader.u32("body length")? as usize;
            let body = reader.take(body_len, "mutation body")?;

            let mut fields = Vec::new();
            let mut body_reader = Reader { bytes: body, pos: 0 };
            while body_reader.pos < body.len() {
                let field_id = body_reader.u8("field id")?;
                let kind_tag = body_reader.u8("field kind")?;
                let len = body_reader.u32("field length")? as usize;
                let payload = body_reader.take(len, "field payload")?.to_vec();
                fields.push(DecodedField {
                    field_id,
                    kind_tag,
                    payload,
                });
            }

            mutations.push(DecodedMutation {
                op,
                type_id,
                target,
                fields,
            });
        }

        if reader.pos != bytes.len() {
            return Err(WriteError::malformed(reader.pos, "trailing bytes after last mutation"));
        }

        Ok(Self { header, mutations })
    }

    /// Record types the batch touches
    pub fn touched_types(&self) -> BTreeSet<u16> {
        self.mutations.iter().map(|m| m.type_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteBuffer;
    use crate::mutation::builder::{encode_mutation, write_count, write_header, MutationRequest};
    use crate::mutation::field::FieldValue;
    use crate::schema::{FieldDef, FieldKind, Schema, TypeDef};

    fn schema() -> Schema {
        Schema::new(5).with_type(
            TypeDef::new(3, "Note")
                .field(FieldDef::new(0, "body", FieldKind::String))
                .field(FieldDef::new(1, "rank", FieldKind::Int)),
        )
    }

    #[test]
    fn test_parse_preserves_append_order() {
        let schema = schema();
        let mut buf = ByteBuffer::new(64, 4096);
        write_header(&mut buf, schema.hash).unwrap();
        for i in 0..5i64 {
            let req = MutationRequest::create("Note", vec![("rank", FieldValue::Int(i))]);
            encode_mutation(&mut buf, &schema, &req, 1).unwrap();
        }
        write_count(&mut buf, 5);

        let stream = InstructionStream::parse(buf.as_slice()).unwrap();
        assert_eq!(stream.header.count, 5);
        assert_eq!(stream.header.schema_hash, 5);
        let ranks: Vec<i64> = stream
            .mutations
            .iter()
            .map(|m| m.field(1).and_then(DecodedField::as_i64).unwrap())
            .collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
        assert_eq!(stream.touched_types().into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let schema = schema();
        let mut buf = ByteBuffer::new(64, 4096);
        write_header(&mut buf, schema.hash).unwrap();
        let req = MutationRequest::create("Note", vec![("body", FieldValue::from("hello"))]);
        encode_mutation(&mut buf, &schema, &req, 1).unwrap();
        write_count(&mut buf, 1);

        let bytes = buf.as_slice();
        let err = InstructionStream::parse(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(err.code(), "AERO_WRITE_MALFORMED_STREAM");
    }

    #[test]
    fn test_target_cursor_follows_opcode() {
        let schema = schema();
        let mut buf = ByteBuffer::new(64, 4096);
        write_header(&mut buf, schema.hash).unwrap();
        let req = MutationRequest::delete("Note", 0x0102_0304u32);
        encode_mutation(&mut buf, &schema, &req, 1).unwrap();
        write_count(&mut buf, 1);

        let record = &buf.as_slice()[HEADER_SIZE..];
        assert_eq!(&record[1..5], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&record[5..7], &3u16.to_le_bytes());

        let stream = InstructionStream::parse(buf.as_slice()).unwrap();
        let mutation = &stream.mutations[0];
        assert_eq!(mutation.op, OpKind::Delete);
        assert_eq!(mutation.target, Cursor::Id(0x0102_0304));
        assert_eq!(mutation.type_id, 3);
        assert!(mutation.fields.is_empty());
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(InstructionStream::parse(&[BATCH_OP_ID, 0, 1]).is_err());
    }
}
