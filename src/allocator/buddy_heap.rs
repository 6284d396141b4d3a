//! Buddy sub-allocation over a grid of heaps
//!
//! Overlays a [`BuddyIndexAllocator`] on a virtual space partitioned into
//! equal tiles of `heap_size` bytes. Offsets handed out by the buddy are
//! mapped to backing heaps by tile index: the first allocation inside a tile
//! acquires a heap from the child allocator, subsequent allocations in the
//! same tile share it through a refcount, and the last release returns it.
//!
//! The child must hand out heaps that are all compatible with each other,
//! and it must outlive every allocation issued here.

use crate::allocator::{
    Allocation, AllocationMethod, AllocationRequest, AllocatorInfo, BlockRef, MemoryAllocator,
};
use crate::block::{BuddyBlock, BuddyIndexAllocator};

#[derive(Debug, Default)]
struct TrackedTile {
    refcount: u32,
    backing: Option<Allocation>,
}

/// Buddy allocator whose leaves map to heaps obtained from the child
#[derive(Debug)]
pub struct BuddyHeapAllocator {
    heap_size: u64,
    heap_alignment: u64,
    buddy: BuddyIndexAllocator,
    tiles: Vec<TrackedTile>,
    child: Box<dyn MemoryAllocator>,
    used_block_bytes: u64,
    used_memory_bytes: u64,
    used_memory_count: u64,
}

impl BuddyHeapAllocator {
    /// Create a buddy sub-allocator over `max_system_size` bytes of virtual
    /// space tiled into `heap_size`-byte heaps
    ///
    /// `max_system_size` and `heap_size` must be powers of two;
    /// `min_block_size` bounds the smallest buddy block.
    pub fn new(
        max_system_size: u64,
        heap_size: u64,
        heap_alignment: u64,
        min_block_size: u64,
        child: Box<dyn MemoryAllocator>,
    ) -> Self {
        assert!(heap_size.is_power_of_two(), "heap size must be a power of two");
        assert!(heap_size <= max_system_size);
        assert!(min_block_size <= heap_size);

        let tile_count = (max_system_size / heap_size) as usize;
        let mut tiles = Vec::with_capacity(tile_count);
        tiles.resize_with(tile_count, TrackedTile::default);

        BuddyHeapAllocator {
            heap_size,
            heap_alignment,
            buddy: BuddyIndexAllocator::new(max_system_size, min_block_size),
            tiles,
            child,
            used_block_bytes: 0,
            used_memory_bytes: 0,
            used_memory_count: 0,
        }
    }

    /// Number of tiles currently backed by a heap (test observability)
    pub fn backed_tile_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.refcount > 0).count()
    }

    fn tile_index(&self, virtual_offset: u64) -> usize {
        (virtual_offset / self.heap_size) as usize
    }
}

impl MemoryAllocator for BuddyHeapAllocator {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        if request.size == 0 || !request.alignment.is_power_of_two() {
            return None;
        }
        // Blocks never span heaps: the rounded size must fit in one tile.
        let rounded = request
            .size
            .max(request.alignment)
            .max(self.buddy.min_block_size())
            .checked_next_power_of_two()?;
        if rounded > self.heap_size {
            return None;
        }

        let block = self.buddy.allocate(rounded, request.alignment)?;
        debug_assert_eq!(self.buddy.block_size(block.level), rounded);

        let index = self.tile_index(block.offset);
        if self.tiles[index].refcount == 0 {
            let heap_request = request.rescoped(self.heap_size, self.heap_alignment);
            match self.child.try_allocate(&heap_request) {
                Some(backing) => {
                    self.used_memory_bytes += backing.heap().size();
                    self.used_memory_count += 1;
                    self.tiles[index].backing = Some(backing);
                }
                None => {
                    self.buddy.deallocate(block);
                    return None;
                }
            }
        }
        self.tiles[index].refcount += 1;

        let tile = &self.tiles[index];
        let backing = tile.backing.as_ref().unwrap();
        let heap_offset = block.offset % self.heap_size;
        self.used_block_bytes += rounded;

        Some(Allocation::new(
            backing.heap().clone(),
            heap_offset,
            rounded,
            request.size,
            AllocationMethod::SubAllocated,
            BlockRef::Buddy {
                virtual_offset: block.offset,
                level: block.level,
            },
        ))
    }

    fn deallocate(&mut self, allocation: Allocation) {
        let (virtual_offset, level) = match allocation.block() {
            BlockRef::Buddy { virtual_offset, level } => (virtual_offset, level),
            other => {
                debug_assert!(false, "buddy heap allocator received foreign block {:?}", other);
                tracing::error!("leaking allocation with foreign block {:?}", other);
                return;
            }
        };

        let index = self.tile_index(virtual_offset);
        let tile = &mut self.tiles[index];
        debug_assert!(tile.refcount > 0, "deallocate on an empty tile");
        if tile.refcount == 0 {
            tracing::error!("leaking buddy block at {:#x}: tile has no live allocations", virtual_offset);
            return;
        }

        self.used_block_bytes -= self.buddy.block_size(level);
        self.buddy.deallocate(BuddyBlock { offset: virtual_offset, level });
        drop(allocation);

        tile.refcount -= 1;
        if tile.refcount == 0 {
            let backing = tile.backing.take().unwrap();
            self.used_memory_bytes -= backing.heap().size();
            self.used_memory_count -= 1;
            self.child.deallocate(backing);
        }
    }

    fn release_memory(&mut self) {
        // Backed tiles always carry live allocations; only the child holds
        // idle memory.
        self.child.release_memory();
    }

    fn memory_size(&self) -> u64 {
        self.heap_size
    }

    fn memory_alignment(&self) -> u64 {
        self.heap_alignment
    }

    fn query_info(&self) -> AllocatorInfo {
        let mut info = self.child.query_info();
        info.used_block_bytes += self.used_block_bytes;
        info.used_memory_bytes += self.used_memory_bytes;
        info.used_memory_count += self.used_memory_count;
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{ResourceHeapLeaf, SegmentedPool};
    use crate::backend::VirtualDevice;
    use crate::heap::HeapKind;
    use std::sync::Arc;

    const HEAP: u64 = 1 << 20; // 1 MiB tiles
    const SPACE: u64 = 1 << 24; // 16 MiB virtual space

    fn buddy_over_pool(device: &Arc<VirtualDevice>) -> BuddyHeapAllocator {
        let leaf = ResourceHeapLeaf::new(device.clone(), None, HeapKind::DeviceLocal, 65536, false);
        let pool = SegmentedPool::new(Box::new(leaf), 65536);
        BuddyHeapAllocator::new(SPACE, HEAP, 65536, 65536, Box::new(pool))
    }

    #[test]
    fn test_first_allocation_acquires_heap() {
        let device = VirtualDevice::new();
        let mut buddy = buddy_over_pool(&device);

        let a = buddy.try_allocate(&AllocationRequest::new(65536, 65536)).unwrap();
        assert_eq!(device.heaps_created(), 1);
        assert_eq!(a.heap().size(), HEAP);
        assert_eq!(a.method(), AllocationMethod::SubAllocated);
        assert_eq!(buddy.backed_tile_count(), 1);

        // Second allocation lands in the same tile and shares the heap.
        let b = buddy.try_allocate(&AllocationRequest::new(65536, 65536)).unwrap();
        assert_eq!(device.heaps_created(), 1);
        assert_eq!(a.heap().id(), b.heap().id());
        assert_eq!(b.offset(), 65536);

        buddy.deallocate(a);
        assert_eq!(buddy.backed_tile_count(), 1);
        buddy.deallocate(b);
        // Last release returns the heap to the pool below.
        assert_eq!(buddy.backed_tile_count(), 0);
        assert_eq!(buddy.query_info().free_memory_bytes, HEAP);
    }

    #[test]
    fn test_request_larger_than_heap_refused() {
        let device = VirtualDevice::new();
        let mut buddy = buddy_over_pool(&device);
        assert!(buddy.try_allocate(&AllocationRequest::new(HEAP + 1, 1)).is_none());
        assert_eq!(device.heaps_created(), 0);
    }

    #[test]
    fn test_offsets_aligned_within_heap() {
        let device = VirtualDevice::new();
        let mut buddy = buddy_over_pool(&device);
        for _ in 0..4 {
            let allocation = buddy.try_allocate(&AllocationRequest::new(100_000, 65536)).unwrap();
            assert_eq!(allocation.offset() % 65536, 0);
            assert!(allocation.offset() + allocation.size() <= allocation.heap().size());
        }
    }

    #[test]
    fn test_tile_heap_released_once_empty() {
        let device = VirtualDevice::new();
        let mut buddy = buddy_over_pool(&device);

        // Fill two tiles.
        let first: Vec<_> = (0..16)
            .map(|_| buddy.try_allocate(&AllocationRequest::new(65536, 65536)).unwrap())
            .collect();
        let overflow = buddy.try_allocate(&AllocationRequest::new(65536, 65536)).unwrap();
        assert_eq!(device.heaps_created(), 2);
        assert_eq!(buddy.backed_tile_count(), 2);

        for allocation in first {
            buddy.deallocate(allocation);
        }
        assert_eq!(buddy.backed_tile_count(), 1);
        buddy.deallocate(overflow);
        assert_eq!(buddy.backed_tile_count(), 0);
        assert_eq!(buddy.query_info().used_memory_bytes, 0);
        assert_eq!(buddy.query_info().used_block_bytes, 0);
    }

    #[test]
    fn test_never_allocate_fails_without_backed_tile() {
        let device = VirtualDevice::new();
        let mut buddy = buddy_over_pool(&device);
        let mut request = AllocationRequest::new(65536, 65536);
        request.never_allocate = true;
        assert!(buddy.try_allocate(&request).is_none());
        assert_eq!(device.heaps_created(), 0);

        // With a live tile the same request is served from it.
        let warm = buddy.try_allocate(&AllocationRequest::new(65536, 65536)).unwrap();
        assert!(buddy.try_allocate(&request).is_some());
        drop(warm);
    }

    #[test]
    fn test_query_info_round_trip() {
        let device = VirtualDevice::new();
        let mut buddy = buddy_over_pool(&device);
        let before = buddy.query_info();
        let allocation = buddy.try_allocate(&AllocationRequest::new(131072, 65536)).unwrap();
        let during = buddy.query_info();
        assert_eq!(during.used_block_bytes, 131072);
        assert_eq!(during.used_memory_bytes, HEAP);
        assert!(during.used_block_bytes <= during.used_memory_bytes);
        buddy.deallocate(allocation);
        buddy.release_memory();
        assert_eq!(buddy.query_info(), before);
    }
}
