//! Worker coordination
//!
//! - Shared arena with a conflict-free region table
//! - Worker threads applying batches through the `StorageCore`
//! - Two-word status cells for handoff and completion
//! - Type-affinity routing
//!
//! Exactly one task (the coordinator event loop) makes allocation and
//! routing decisions. Workers only read their assigned region and write
//! their own status word.

mod arena;
mod dispatch;
mod service;
mod status;
mod worker;

pub use arena::{ArenaRegion, Gap, RegionTable, SharedArena};
pub use service::{Coordinator, CoordinatorSnapshot};
pub use status::{
    StatusCell, COMPLETION_DONE, COMPLETION_PENDING, COMPLETION_WORKER_DIED, SIGNAL_APPLY,
    SIGNAL_IDLE,
};
pub use worker::{CoreError, StorageCore};
