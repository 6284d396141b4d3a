//! Size-routed allocator pair
//!
//! Routes each request between two children by comparing the requested size
//! against a fixed threshold. Deallocation routes the same way, using the
//! request size recorded in the allocation, so both paths stay symmetric.

use crate::allocator::{Allocation, AllocationRequest, AllocatorInfo, MemoryAllocator, INVALID_SIZE};

/// Routes requests at or below the threshold to `first`, the rest to
/// `second`
#[derive(Debug)]
pub struct ConditionalAllocator {
    first: Box<dyn MemoryAllocator>,
    second: Box<dyn MemoryAllocator>,
    threshold: u64,
}

impl ConditionalAllocator {
    /// Create a conditional pair split at `threshold` bytes
    pub fn new(first: Box<dyn MemoryAllocator>, second: Box<dyn MemoryAllocator>, threshold: u64) -> Self {
        ConditionalAllocator { first, second, threshold }
    }

    fn route(&mut self, size: u64) -> &mut Box<dyn MemoryAllocator> {
        if size <= self.threshold {
            &mut self.first
        } else {
            &mut self.second
        }
    }
}

impl MemoryAllocator for ConditionalAllocator {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        let size = request.size;
        self.route(size).try_allocate(request)
    }

    fn deallocate(&mut self, allocation: Allocation) {
        let size = allocation.requested_size();
        self.route(size).deallocate(allocation);
    }

    fn release_memory(&mut self) {
        self.first.release_memory();
        self.second.release_memory();
    }

    fn memory_size(&self) -> u64 {
        INVALID_SIZE
    }

    fn memory_alignment(&self) -> u64 {
        self.first.memory_alignment().max(self.second.memory_alignment())
    }

    fn query_info(&self) -> AllocatorInfo {
        self.first.query_info() + self.second.query_info()
    }
}
