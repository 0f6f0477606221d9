//! Per-file block map on top of a [`super::block_pool::FileBlockPool`]
//! (spec.md §4.G "FileMap"), ported from `CFCore/include/CF/FileSource.h`'s
//! `FileMap` / `AllocateBufferMap`.
//!
//! Deliberately holds no disk-I/O logic of its own and never locks the pool
//! for longer than a metadata lookup — [`super::source::FileSource::read`]
//! is the one place that owns the pread-then-install sequence, so the pool
//! mutex is never held across a blocking disk read (spec §5 "they must not
//! acquire the pool mutex across the read").
//!
//! The original clears a reclaimed buffer's *previous* owning slot the
//! instant the pool reclaims it. This port sidesteps needing a
//! reverse map-to-owner index by exploiting spec §8's own round-trip
//! invariant instead: a slot whose buffer's `block_index` no longer equals
//! the slot number has necessarily been reclaimed by someone else since,
//! and is therefore treated as empty on the next lookup — the conservation
//! invariant (`pool.current == Σ non-empty slots`) only ever counts slots
//! that still pass that check.

use super::block_pool::BufferHandle;

/// Dense array indexed by block number; `None` means "must fetch from
/// disk" (spec §3 "a slot value of 'empty' means 'must fetch from disk'").
pub struct FileMap {
    slots: Vec<Option<BufferHandle>>,
}

impl FileMap {
    /// `initial_blocks == 0` sizes nothing up front; the vector grows
    /// on demand as blocks beyond its current length are touched, matching
    /// `AllocateFileCache`'s `inNumBuffSizeUnits` default-zero convention.
    pub fn new(initial_blocks: usize) -> Self {
        FileMap {
            slots: (0..initial_blocks).map(|_| None).collect(),
        }
    }

    /// The handle currently occupying `block`'s slot, if any — caller is
    /// responsible for checking it's still round-trip valid.
    pub fn slot(&self, block: usize) -> Option<BufferHandle> {
        self.slots.get(block).copied().flatten()
    }

    /// Installs (or clears) the handle for `block`, growing the slot
    /// array lazily if needed.
    pub fn set_slot(&mut self, block: usize, handle: Option<BufferHandle>) {
        if block >= self.slots.len() {
            self.slots.resize(block + 1, None);
        }
        self.slots[block] = handle;
    }

    /// Number of slots that currently hold a live (round-trip-consistent)
    /// buffer reference — the per-map contribution to spec §8's cache
    /// conservation invariant.
    pub fn live_slot_count(&self, pool: &super::block_pool::FileBlockPool) -> usize {
        self.slots
            .iter()
            .enumerate()
            .filter(|(block, slot)| match slot {
                Some(handle) => pool.block_index(*handle) == *block as i64,
                None => false,
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::block_pool::FileBlockPool;

    #[test]
    fn grows_slots_lazily() {
        let mut map = FileMap::new(0);
        assert_eq!(map.slot(3), None);
        map.set_slot(3, None);
        assert_eq!(map.slot(3), None);
    }

    #[test]
    fn round_trips_an_installed_handle() {
        let mut pool = FileBlockPool::new(8, 4, 1);
        let mut map = FileMap::new(0);
        let handle = pool.get_buffer_element(8);
        pool.set_block_index(handle, 2);
        map.set_slot(2, Some(handle));
        assert_eq!(map.slot(2), Some(handle));
        assert_eq!(map.live_slot_count(&pool), 1);
    }
}
