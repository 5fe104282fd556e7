//! Type affinity routing
//!
//! Batches that touch the same entity type are kept on the same worker so
//! the storage core applies them in submission order. A worker owns a type
//! while it has queued or running work that touches it.

use std::collections::{BTreeSet, HashMap, VecDeque};

/// Coordinator bookkeeping for one worker
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub index: usize,
    pub alive: bool,
    /// Bytes queued or running on this worker
    pub remaining: usize,
    /// type id -> number of queued or running batches touching it
    pub affinity: HashMap<u16, usize>,
    /// Jobs waiting for the worker, in order
    pub queue: VecDeque<u64>,
    /// Job currently applied by the worker
    pub current: Option<u64>,
}

impl WorkerSlot {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            alive: true,
            remaining: 0,
            affinity: HashMap::new(),
            queue: VecDeque::new(),
            current: None,
        }
    }

    pub fn owns_any(&self, types: &BTreeSet<u16>) -> bool {
        types.iter().any(|t| self.affinity.contains_key(t))
    }

    pub fn add_work(&mut self, types: &BTreeSet<u16>, len: usize) {
        self.remaining += len;
        for t in types {
            *self.affinity.entry(*t).or_insert(0) += 1;
        }
    }

    pub fn finish_work(&mut self, types: &BTreeSet<u16>, len: usize) {
        self.remaining = self.remaining.saturating_sub(len);
        for t in types {
            if let Some(count) = self.affinity.get_mut(t) {
                *count -= 1;
                if *count == 0 {
                    self.affinity.remove(t);
                }
            }
        }
    }
}

/// Routing decision for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Worker(usize),
    /// Types are split across workers; wait for them to drain
    Hold,
    NoWorkers,
}

/// Pick a worker for a batch touching `types`.
///
/// A single live owner of any of the types gets the batch. With no owner
/// the least loaded live worker wins, lowest index on ties.
pub(crate) fn route(slots: &[WorkerSlot], types: &BTreeSet<u16>) -> Route {
    let mut owners = slots.iter().filter(|s| s.alive && s.owns_any(types));
    if let Some(first) = owners.next() {
        if owners.next().is_some() {
            return Route::Hold;
        }
        return Route::Worker(first.index);
    }
    slots
        .iter()
        .filter(|s| s.alive)
        .min_by_key(|s| (s.remaining, s.index))
        .map(|s| Route::Worker(s.index))
        .unwrap_or(Route::NoWorkers)
}
