//! Byte buffer subsystem
//!
//! Every batch encodes into one `ByteBuffer`. The buffer never grows past
//! its ceiling: overflow is the write path's only backpressure signal and
//! forces an eager flush of the active batch.

mod byte_buffer;

pub use byte_buffer::{BufferOverflow, BufferResult, ByteBuffer};
