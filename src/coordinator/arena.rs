//! Shared arena and region table
//!
//! The arena is one fixed-size byte region shared by the coordinator and
//! every worker. The coordinator writes a batch into a free region and
//! workers read their assigned region; the region table guarantees that
//! no two live regions overlap, so the two sides never touch the same
//! bytes at the same time.
//!
//! Bytes are stored as `AtomicU8` so the sharing needs neither locks nor
//! `unsafe`; the handoff message to a worker orders the coordinator's
//! writes before the worker's reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

/// Fixed-size byte arena shared across threads
#[derive(Debug)]
pub struct SharedArena {
    bytes: Box<[AtomicU8]>,
}

impl SharedArena {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy `data` into the arena at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds; regions come from the table.
    pub fn write(&self, offset: usize, data: &[u8]) {
        for (cell, byte) in self.bytes[offset..offset + data.len()].iter().zip(data) {
            cell.store(*byte, Ordering::Relaxed);
        }
    }

    /// Copy `len` bytes out of the arena starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        self.bytes[offset..offset + len]
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }
}

/// Byte range of the arena owned by one in-flight batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRegion {
    /// Start offset in the arena
    pub offset: usize,
    /// Reserved length (aligned)
    pub size: usize,
    /// Bytes actually written
    pub claimed_bytes: usize,
    /// Copied out to a private buffer; no longer occupies the arena
    pub detached: bool,
    /// Handed to a worker; may no longer be detached
    pub dispatched: bool,
}

impl ArenaRegion {
    /// One past the last reserved byte
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Whether two regions' reserved ranges intersect
    pub fn overlaps(&self, other: &ArenaRegion) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// A free range of the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub offset: usize,
    pub len: usize,
}

/// Allocation table for the shared arena.
///
/// Only the coordinator mutates it.
#[derive(Debug)]
pub struct RegionTable {
    arena_size: usize,
    alignment: usize,
    regions: HashMap<u64, ArenaRegion>,
}

impl RegionTable {
    pub fn new(arena_size: usize, alignment: usize) -> Self {
        Self {
            arena_size,
            alignment: alignment.max(1),
            regions: HashMap::new(),
        }
    }

    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    fn align(&self, len: usize) -> usize {
        len.div_ceil(self.alignment) * self.alignment
    }

    /// Regions occupying the arena, sorted by offset
    pub fn live_regions(&self) -> Vec<ArenaRegion> {
        let mut live: Vec<ArenaRegion> = self.regions.values().filter(|r| !r.detached).copied().collect();
        live.sort_by_key(|r| r.offset);
        live
    }

    pub fn get(&self, key: u64) -> Option<&ArenaRegion> {
        self.regions.get(&key)
    }

    /// Largest free range between live regions, including the tail.
    pub fn largest_gap(&self) -> Gap {
        let mut best = Gap { offset: 0, len: 0 };
        let mut cursor = 0;
        for region in self.live_regions() {
            if region.offset > cursor && region.offset - cursor > best.len {
                best = Gap {
                    offset: cursor,
                    len: region.offset - cursor,
                };
            }
            cursor = cursor.max(region.end());
        }
        if self.arena_size > cursor && self.arena_size - cursor > best.len {
            best = Gap {
                offset: cursor,
                len: self.arena_size - cursor,
            };
        }
        best
    }

    /// Claim a region for `len` bytes at the start of the largest gap.
    ///
    /// Returns `None` when the largest gap is too small.
    pub fn try_claim(&mut self, key: u64, len: usize) -> Option<ArenaRegion> {
        let size = self.align(len.max(1));
        if size > self.arena_size {
            return None;
        }
        let gap = self.largest_gap();
        if gap.len < size {
            return None;
        }
        let region = ArenaRegion {
            offset: gap.offset,
            size,
            claimed_bytes: len,
            detached: false,
            dispatched: false,
        };
        self.regions.insert(key, region);
        Some(region)
    }

    /// Live, not yet dispatched region to detach: the largest, then the
    /// lowest key.
    pub fn detach_candidate(&self) -> Option<u64> {
        self.regions
            .iter()
            .filter(|(_, r)| !r.detached && !r.dispatched)
            .max_by(|(ka, a), (kb, b)| a.size.cmp(&b.size).then(kb.cmp(ka)))
            .map(|(key, _)| *key)
    }

    /// Mark a region detached, freeing its arena range.
    ///
    /// Returns the region as it was, or `None` if it is unknown,
    /// dispatched or already detached.
    pub fn detach(&mut self, key: u64) -> Option<ArenaRegion> {
        let region = self.regions.get_mut(&key)?;
        if region.detached || region.dispatched {
            return None;
        }
        let before = *region;
        region.detached = true;
        Some(before)
    }

    pub fn mark_dispatched(&mut self, key: u64) {
        if let Some(region) = self.regions.get_mut(&key) {
            region.dispatched = true;
        }
    }

    /// Forget a region once its batch completed
    pub fn release(&mut self, key: u64) -> Option<ArenaRegion> {
        self.regions.remove(&key)
    }

    /// Whether any two live regions overlap
    pub fn has_overlap(&self) -> bool {
        self.live_regions().windows(2).any(|w| w[0].overlaps(&w[1]))
    }
}
