//! One-block-per-heap decorator
//!
//! Forces a 1:1 mapping between allocations and heaps over any inner
//! allocator: the whole heap is the block. Used to disable sub-allocation
//! without changing the shape of the stack, and as the dedicated strategy
//! for requests that deserve their own heap.

use crate::allocator::{
    Allocation, AllocationMethod, AllocationRequest, AllocatorInfo, BlockRef, MemoryAllocator,
};

/// Wraps an inner allocator and hands out whole heaps only
#[derive(Debug)]
pub struct StandaloneAllocator {
    child: Box<dyn MemoryAllocator>,
    used_block_bytes: u64,
    used_memory_bytes: u64,
    used_memory_count: u64,
}

impl StandaloneAllocator {
    /// Create the decorator over `child`
    pub fn new(child: Box<dyn MemoryAllocator>) -> Self {
        StandaloneAllocator {
            child,
            used_block_bytes: 0,
            used_memory_bytes: 0,
            used_memory_count: 0,
        }
    }
}

impl MemoryAllocator for StandaloneAllocator {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        if request.size == 0 || !request.alignment.is_power_of_two() {
            return None;
        }

        let inner = self.child.try_allocate(request)?;
        let heap = inner.into_heap();
        let size = heap.size();
        self.used_block_bytes += size;
        self.used_memory_bytes += size;
        self.used_memory_count += 1;

        Some(Allocation::new(
            heap,
            0,
            size,
            request.size,
            AllocationMethod::Standalone,
            BlockRef::Whole,
        ))
    }

    fn deallocate(&mut self, allocation: Allocation) {
        debug_assert_eq!(allocation.block(), BlockRef::Whole, "standalone allocation has one whole block");
        let size = allocation.heap().size();
        self.used_block_bytes -= size;
        self.used_memory_bytes -= size;
        self.used_memory_count -= 1;
        self.child.deallocate(allocation);
    }

    fn release_memory(&mut self) {
        self.child.release_memory();
    }

    fn memory_size(&self) -> u64 {
        self.child.memory_size()
    }

    fn memory_alignment(&self) -> u64 {
        self.child.memory_alignment()
    }

    fn query_info(&self) -> AllocatorInfo {
        let mut info = self.child.query_info();
        info.used_block_bytes += self.used_block_bytes;
        info.used_memory_bytes += self.used_memory_bytes;
        info.used_memory_count += self.used_memory_count;
        info
    }
}
