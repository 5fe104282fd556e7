//! Fixed-stride result table
//!
//! One 5-byte entry per mutation index: `[id:4 LE][code:1]`.
//!
//! | code | meaning |
//! |---|---|
//! | `0` | success, `id` is the assigned identifier |
//! | `0x01..=0x7F` | validation error raised by the storage core |
//! | `0x80..=0xFF` | modify error, code in the low 7 bits |

use crate::errors::{WriteError, WriteResult};

/// Bytes per result entry
pub const RESULT_STRIDE: usize = 5;

const MODIFY_FLAG: u8 = 0x80;

/// Outcome of one mutation as reported by the storage core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Success(u32),
    Validation(u8),
    Modify(u8),
}

impl MutationOutcome {
    pub fn from_entry(id: u32, code: u8) -> Self {
        match code {
            0 => MutationOutcome::Success(id),
            c if c & MODIFY_FLAG != 0 => MutationOutcome::Modify(c & !MODIFY_FLAG),
            c => MutationOutcome::Validation(c),
        }
    }

    /// Wire code byte for this outcome
    pub fn code(&self) -> u8 {
        match self {
            MutationOutcome::Success(_) => 0,
            MutationOutcome::Validation(code) => *code & !MODIFY_FLAG,
            MutationOutcome::Modify(code) => MODIFY_FLAG | (*code & !MODIFY_FLAG),
        }
    }

    pub fn into_result(self) -> WriteResult<u32> {
        match self {
            MutationOutcome::Success(id) => Ok(id),
            MutationOutcome::Validation(code) => Err(WriteError::CoreValidation(code)),
            MutationOutcome::Modify(code) => Err(WriteError::Modify(code)),
        }
    }
}

/// Borrowed view over a result table
#[derive(Debug, Clone, Copy)]
pub struct ResultTable<'a> {
    bytes: &'a [u8],
}

impl<'a> ResultTable<'a> {
    /// Wrap a table expected to hold `count` entries.
    ///
    /// Fails with `ResultTableTruncated` if it is too short. Extra
    /// trailing bytes are ignored.
    pub fn new(bytes: &'a [u8], count: u32) -> WriteResult<Self> {
        let expected = count as usize * RESULT_STRIDE;
        if bytes.len() < expected {
            return Err(WriteError::ResultTableTruncated {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    /// Entry for a mutation index
    pub fn entry(&self, index: u32) -> Option<MutationOutcome> {
        let start = index as usize * RESULT_STRIDE;
        let entry = self.bytes.get(start..start + RESULT_STRIDE)?;
        let id = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        Some(MutationOutcome::from_entry(id, entry[4]))
    }

    /// Encode outcomes into a table, in index order
    pub fn encode(outcomes: &[MutationOutcome]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(outcomes.len() * RESULT_STRIDE);
        for outcome in outcomes {
            let id = match outcome {
                MutationOutcome::Success(id) => *id,
                _ => 0,
            };
            bytes.extend_from_slice(&id.to_le_bytes());
            bytes.push(outcome.code());
        }
        bytes
    }
}
