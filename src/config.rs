//! Write-path configuration
//!
//! Buffer sizing, flush scheduling, arena size and worker count.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{WriteError, WriteResult};
use crate::mutation::HEADER_SIZE;

/// Configuration shared by the encoding context and the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Flush delay in milliseconds (default: 0, flush on next scheduler turn)
    #[serde(default)]
    pub flush_delay_ms: u64,

    /// Initial byte buffer capacity (default: 4 KiB)
    #[serde(default = "default_initial_buffer_bytes")]
    pub initial_buffer_bytes: usize,

    /// Hard ceiling on a batch's encoded size (default: 1 MiB)
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Shared arena size (default: 16 MiB)
    #[serde(default = "default_arena_bytes")]
    pub arena_bytes: usize,

    /// Number of worker threads (default: 2)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Region offset alignment in the arena (default: 8)
    #[serde(default = "default_region_alignment")]
    pub region_alignment: usize,
}

fn default_initial_buffer_bytes() -> usize {
    4 * 1024
}

fn default_max_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_arena_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_worker_count() -> usize {
    2
}

fn default_region_alignment() -> usize {
    8
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 0,
            initial_buffer_bytes: default_initial_buffer_bytes(),
            max_buffer_bytes: default_max_buffer_bytes(),
            arena_bytes: default_arena_bytes(),
            worker_count: default_worker_count(),
            region_alignment: default_region_alignment(),
        }
    }
}

impl WriterConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> WriteResult<Self> {
        let config: WriterConfig = serde_json::from_str(json)
            .map_err(|e| WriteError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the flush delay
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the buffer ceiling
    pub fn with_max_buffer_bytes(mut self, max: usize) -> Self {
        self.max_buffer_bytes = max;
        self.initial_buffer_bytes = self.initial_buffer_bytes.min(max);
        self
    }

    /// Set the arena size
    pub fn with_arena_bytes(mut self, bytes: usize) -> Self {
        self.arena_bytes = bytes;
        self
    }

    /// Set the worker count
    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Flush delay as a duration
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> WriteResult<()> {
        if self.worker_count == 0 {
            return Err(WriteError::InvalidConfig("worker_count must be at least 1".into()));
        }
        if self.region_alignment == 0 || !self.region_alignment.is_power_of_two() {
            return Err(WriteError::InvalidConfig(
                "region_alignment must be a power of two".into(),
            ));
        }
        if self.max_buffer_bytes <= HEADER_SIZE {
            return Err(WriteError::InvalidConfig(format!(
                "max_buffer_bytes must exceed the {} byte batch header",
                HEADER_SIZE
            )));
        }
        // length prefixes on the wire are u32
        if self.max_buffer_bytes > u32::MAX as usize {
            return Err(WriteError::InvalidConfig(format!(
                "max_buffer_bytes must not exceed {} bytes",
                u32::MAX
            )));
        }
        if self.initial_buffer_bytes > self.max_buffer_bytes {
            return Err(WriteError::InvalidConfig(
                "initial_buffer_bytes exceeds max_buffer_bytes".into(),
            ));
        }
        Ok(())
    }
}
