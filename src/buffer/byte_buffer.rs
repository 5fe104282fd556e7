//! Growable byte buffer with a hard capacity ceiling
//!
//! Growth is geometric (doubling) and capped at `max_capacity`. A write
//! that would pass the ceiling fails with `BufferOverflow` before any byte
//! of it is written, so the buffer never holds a partial value.

use thiserror::Error;

use crate::errors::WriteError;

/// Raised when a write would grow the buffer past its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer overflow: {requested} bytes requested, ceiling is {max}")]
pub struct BufferOverflow {
    /// Total length the write needed
    pub requested: usize,
    /// Hard ceiling of the buffer
    pub max: usize,
}

impl From<BufferOverflow> for WriteError {
    fn from(e: BufferOverflow) -> Self {
        WriteError::Overflow {
            requested: e.requested,
            max: e.max,
        }
    }
}

/// Result type for buffer writes
pub type BufferResult<T> = Result<T, BufferOverflow>;

/// A contiguous, owned byte region.
///
/// Invariant: `len() <= capacity() <= max_capacity()`.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    capacity: usize,
    max_capacity: usize,
}

impl ByteBuffer {
    /// Create a buffer with an initial capacity and a hard ceiling.
    ///
    /// The initial capacity is clamped to the ceiling.
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        let capacity = initial_capacity.min(max_capacity);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            max_capacity,
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current logical capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hard ceiling
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Bytes still writable before hitting the ceiling
    pub fn remaining(&self) -> usize {
        self.max_capacity - self.data.len()
    }

    /// Ensure at least `n` more bytes are writable.
    pub fn reserve(&mut self, n: usize) -> BufferResult<()> {
        let needed = self.data.len().checked_add(n).ok_or(BufferOverflow {
            requested: usize::MAX,
            max: self.max_capacity,
        })?;
        if needed <= self.capacity {
            return Ok(());
        }
        if needed > self.max_capacity {
            return Err(BufferOverflow {
                requested: needed,
                max: self.max_capacity,
            });
        }

        let mut next = self.capacity.max(1);
        while next < needed {
            next = next.saturating_mul(2);
        }
        let next = next.min(self.max_capacity);
        self.data.reserve_exact(next - self.data.len());
        self.capacity = next;
        Ok(())
    }

    /// Append one byte
    pub fn push_u8(&mut self, value: u8) -> BufferResult<()> {
        self.reserve(1)?;
        self.data.push(value);
        Ok(())
    }

    /// Append a little-endian u16
    pub fn push_u16(&mut self, value: u16) -> BufferResult<()> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian u32
    pub fn push_u32(&mut self, value: u32) -> BufferResult<()> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian u64
    pub fn push_u64(&mut self, value: u64) -> BufferResult<()> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian i64
    pub fn push_i64(&mut self, value: i64) -> BufferResult<()> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian f64
    pub fn push_f64(&mut self, value: f64) -> BufferResult<()> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Append raw bytes
    pub fn push_bytes(&mut self, bytes: &[u8]) -> BufferResult<()> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a u32 length prefix followed by the bytes
    pub fn push_prefixed(&mut self, bytes: &[u8]) -> BufferResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| BufferOverflow {
            requested: bytes.len(),
            max: self.max_capacity,
        })?;
        self.reserve(4 + bytes.len())?;
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string
    pub fn push_str(&mut self, value: &str) -> BufferResult<()> {
        self.push_prefixed(value.as_bytes())
    }

    /// Reserve a u32 slot to backfill later; returns its offset.
    pub fn reserve_u32(&mut self) -> BufferResult<usize> {
        let offset = self.data.len();
        self.push_u32(0)?;
        Ok(offset)
    }

    /// Overwrite a u32 at an already-written offset.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` is past `len()`; callers only pass offsets
    /// returned by `reserve_u32`.
    pub fn write_u32_at(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Overwrite a u64 at an already-written offset.
    pub fn write_u64_at(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Roll back to a previous length mark
    pub fn truncate(&mut self, mark: usize) {
        self.data.truncate(mark);
    }

    /// Written bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop all written bytes, keeping the allocation for reuse
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
