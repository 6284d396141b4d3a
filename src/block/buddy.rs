//! Binary-buddy index allocator
//!
//! Classical binary buddy system over a power-of-two address space. This is
//! pure offset arithmetic: no memory is owned here, only intervals are
//! reserved. Free blocks at each level are kept in an ordered set so that
//! the block with the smallest offset is always chosen first, which keeps
//! allocation patterns reproducible across runs.

use std::collections::BTreeSet;

/// A reserved interval produced by [`BuddyIndexAllocator::allocate`]
///
/// `offset` is relative to the start of the buddy address space; the block
/// spans `block_size << level_of_min_block` bytes. The level must be handed
/// back verbatim on deallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyBlock {
    /// Byte offset within the buddy space
    pub offset: u64,
    /// Buddy level: 0 is `min_block_size`, each level doubles
    pub level: u8,
}

/// Binary-buddy bookkeeping over a `max_size`-byte space
///
/// Blocks are always powers of two between `min_block_size` and `max_size`,
/// and every block's offset is a multiple of its size, so any power-of-two
/// alignment up to the block size is satisfied for free.
#[derive(Debug)]
pub struct BuddyIndexAllocator {
    max_size: u64,
    min_block_size: u64,
    /// One ordered free set per level, index 0 = `min_block_size`
    free_sets: Vec<BTreeSet<u64>>,
    used_bytes: u64,
}

impl BuddyIndexAllocator {
    /// Create an allocator over `max_size` bytes with the given minimum
    /// block size. Both must be powers of two with `min_block_size <=
    /// max_size`.
    pub fn new(max_size: u64, min_block_size: u64) -> Self {
        assert!(max_size.is_power_of_two(), "buddy space must be a power of two");
        assert!(min_block_size.is_power_of_two(), "min block size must be a power of two");
        assert!(min_block_size <= max_size);

        let levels = (max_size / min_block_size).trailing_zeros() as usize + 1;
        let mut free_sets = vec![BTreeSet::new(); levels];
        // The whole space starts as one free top-level block.
        free_sets[levels - 1].insert(0);

        BuddyIndexAllocator {
            max_size,
            min_block_size,
            free_sets,
            used_bytes: 0,
        }
    }

    /// Size of the whole buddy space
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Smallest block this allocator hands out
    pub fn min_block_size(&self) -> u64 {
        self.min_block_size
    }

    /// Bytes currently reserved
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Block size at `level`
    pub fn block_size(&self, level: u8) -> u64 {
        self.min_block_size << level
    }

    /// Level whose block size is `size` (`size` must be a power-of-two
    /// multiple of the minimum block size)
    fn level_for(&self, size: u64) -> u8 {
        (size / self.min_block_size).trailing_zeros() as u8
    }

    /// Reserve a block of at least `size` bytes aligned to `alignment`
    ///
    /// The size is rounded up to the next power of two that is at least
    /// `min_block_size` and `alignment`. Returns `None` when the rounded
    /// size exceeds the space or no free block can be split to fit.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<BuddyBlock> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }
        let rounded = size
            .max(alignment)
            .max(self.min_block_size)
            .checked_next_power_of_two()?;
        if rounded > self.max_size {
            return None;
        }

        let target = self.level_for(rounded);
        // Lowest level with a free block at or above the target; the ordered
        // set gives us the smallest offset at that level.
        let source = (target as usize..self.free_sets.len())
            .find(|&level| !self.free_sets[level].is_empty())?;
        let offset = *self.free_sets[source].iter().next().unwrap();
        self.free_sets[source].remove(&offset);

        // Split down to the target level, keeping the lower half and
        // returning the upper halves to their free sets.
        for level in (target as usize..source).rev() {
            let half = self.block_size(level as u8);
            self.free_sets[level].insert(offset + half);
        }

        self.used_bytes += rounded;
        Some(BuddyBlock { offset, level: target })
    }

    /// Return a block and greedily coalesce with its buddy
    ///
    /// The buddy of a block at `offset` is at `offset ^ block_size`; merging
    /// continues upward while the buddy is free at the same level.
    pub fn deallocate(&mut self, block: BuddyBlock) {
        let mut offset = block.offset;
        let mut level = block.level as usize;
        debug_assert!(level < self.free_sets.len());
        debug_assert!(!self.free_sets[level].contains(&offset), "buddy block double free");

        self.used_bytes -= self.block_size(block.level);

        while level + 1 < self.free_sets.len() {
            let buddy = offset ^ self.block_size(level as u8);
            if !self.free_sets[level].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            level += 1;
        }
        self.free_sets[level].insert(offset);
    }

    /// Number of free blocks across all levels (test observability)
    pub fn free_block_count(&self) -> usize {
        self.free_sets.iter().map(|set| set.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_allocation() {
        let mut buddy = BuddyIndexAllocator::new(1024, 64);
        let block = buddy.allocate(64, 1).unwrap();
        assert_eq!(block.offset, 0);
        assert_eq!(block.level, 0);
        assert_eq!(buddy.used_bytes(), 64);
    }

    #[test]
    fn test_size_rounds_to_power_of_two() {
        let mut buddy = BuddyIndexAllocator::new(1024, 64);
        let block = buddy.allocate(100, 1).unwrap();
        assert_eq!(buddy.block_size(block.level), 128);
        assert_eq!(buddy.used_bytes(), 128);
    }

    #[test]
    fn test_alignment_raises_block_size() {
        let mut buddy = BuddyIndexAllocator::new(1024, 64);
        let block = buddy.allocate(64, 256).unwrap();
        assert_eq!(buddy.block_size(block.level), 256);
        assert_eq!(block.offset % 256, 0);
    }

    #[test]
    fn test_offsets_are_size_aligned() {
        let mut buddy = BuddyIndexAllocator::new(4096, 64);
        for _ in 0..8 {
            let block = buddy.allocate(512, 1).unwrap();
            assert_eq!(block.offset % 512, 0);
        }
    }

    #[test]
    fn test_smallest_offset_chosen_first() {
        let mut buddy = BuddyIndexAllocator::new(1024, 64);
        let a = buddy.allocate(64, 1).unwrap();
        let b = buddy.allocate(64, 1).unwrap();
        let c = buddy.allocate(64, 1).unwrap();
        assert_eq!((a.offset, b.offset, c.offset), (0, 64, 128));

        // Freeing the first block makes offset 0 the next choice again.
        buddy.deallocate(a);
        let again = buddy.allocate(64, 1).unwrap();
        assert_eq!(again.offset, 0);
        drop((b, c));
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut buddy = BuddyIndexAllocator::new(256, 64);
        for _ in 0..4 {
            assert!(buddy.allocate(64, 1).is_some());
        }
        assert!(buddy.allocate(64, 1).is_none());
    }

    #[test]
    fn test_oversized_returns_none() {
        let mut buddy = BuddyIndexAllocator::new(1024, 64);
        assert!(buddy.allocate(2048, 1).is_none());
        assert!(buddy.allocate(0, 1).is_none());
    }

    #[test]
    fn test_coalesce_restores_top_block() {
        let mut buddy = BuddyIndexAllocator::new(1024, 64);
        let blocks: Vec<_> = (0..16).map(|_| buddy.allocate(64, 1).unwrap()).collect();
        assert_eq!(buddy.free_block_count(), 0);
        for block in blocks {
            buddy.deallocate(block);
        }
        // Fully coalesced back into one top-level block.
        assert_eq!(buddy.free_block_count(), 1);
        assert_eq!(buddy.used_bytes(), 0);
        let whole = buddy.allocate(1024, 1).unwrap();
        assert_eq!(whole.offset, 0);
    }

    #[test]
    fn test_no_coalesce_across_used_buddy() {
        let mut buddy = BuddyIndexAllocator::new(256, 64);
        let a = buddy.allocate(64, 1).unwrap();
        let b = buddy.allocate(64, 1).unwrap();
        buddy.deallocate(a);
        // b still holds a's buddy; the freed block stays at level 0.
        assert_eq!(buddy.free_block_count(), 2); // the freed 64 + the free 128 half
        buddy.deallocate(b);
        assert_eq!(buddy.free_block_count(), 1);
    }

    #[test]
    fn test_mixed_sizes_stay_disjoint() {
        let mut buddy = BuddyIndexAllocator::new(4096, 64);
        let mut live: Vec<BuddyBlock> = Vec::new();
        for &size in &[64u64, 128, 512, 64, 1024, 256] {
            live.push(buddy.allocate(size, 1).unwrap());
        }
        for (i, a) in live.iter().enumerate() {
            for b in live.iter().skip(i + 1) {
                let (a_start, a_end) = (a.offset, a.offset + buddy.block_size(a.level));
                let (b_start, b_end) = (b.offset, b.offset + buddy.block_size(b.level));
                assert!(a_end <= b_start || b_end <= a_start, "blocks overlap");
            }
        }
    }
}
