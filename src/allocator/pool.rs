//! Segmented heap pool
//!
//! Sits between a sub-allocator and a leaf and recycles whole idle heaps,
//! bucketed by exact byte size. Reuse is LIFO so the most recently idle heap
//! (still warm in the driver's page tables) goes out first; when a bucket
//! cap is configured, the oldest heap is evicted.

use std::collections::BTreeMap;

use crate::allocator::{
    Allocation, AllocationMethod, AllocationRequest, AllocatorInfo, BlockRef, MemoryAllocator,
};
use crate::block::FreeList;
use crate::heap::HeapRef;
use crate::trace;

/// Size-bucketed free list of idle heaps over a leaf allocator
#[derive(Debug)]
pub struct SegmentedPool {
    child: Box<dyn MemoryAllocator>,
    heap_alignment: u64,
    buckets: BTreeMap<u64, FreeList<HeapRef>>,
    bucket_capacity: Option<usize>,
    free_bytes: u64,
}

impl SegmentedPool {
    /// Create a pool over `child` with unbounded buckets
    pub fn new(child: Box<dyn MemoryAllocator>, heap_alignment: u64) -> Self {
        Self::with_bucket_capacity(child, heap_alignment, None)
    }

    /// Create a pool whose buckets hold at most `capacity` idle heaps each
    pub fn with_bucket_capacity(
        child: Box<dyn MemoryAllocator>,
        heap_alignment: u64,
        capacity: Option<usize>,
    ) -> Self {
        SegmentedPool {
            child,
            heap_alignment,
            buckets: BTreeMap::new(),
            bucket_capacity: capacity,
            free_bytes: 0,
        }
    }

    /// Number of idle heaps across all buckets
    pub fn pooled_heap_count(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.len()).sum()
    }
}

impl MemoryAllocator for SegmentedPool {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        if request.size == 0 {
            return None;
        }

        if let Some(bucket) = self.buckets.get_mut(&request.size) {
            if let Some(heap) = bucket.pop() {
                self.free_bytes -= heap.size();
                trace::counter("pool_heap_reuses", 1);
                let size = heap.size();
                return Some(Allocation::new(
                    heap,
                    0,
                    size,
                    request.size,
                    AllocationMethod::Standalone,
                    BlockRef::Whole,
                ));
            }
        }

        // Cache miss; only grow through the leaf when allowed.
        if request.never_allocate {
            return None;
        }
        self.child.try_allocate(request)
    }

    fn deallocate(&mut self, allocation: Allocation) {
        debug_assert_eq!(allocation.block(), BlockRef::Whole, "pool received a sub-allocated block");
        let heap = allocation.into_heap();
        let size = heap.size();
        let bucket = self.buckets.entry(size).or_default();
        bucket.push(heap);
        self.free_bytes += size;

        if let Some(capacity) = self.bucket_capacity {
            while bucket.len() > capacity {
                if let Some(evicted) = bucket.evict_oldest() {
                    let evicted_size = evicted.size();
                    self.free_bytes -= evicted_size;
                    let whole = Allocation::new(
                        evicted,
                        0,
                        evicted_size,
                        evicted_size,
                        AllocationMethod::Standalone,
                        BlockRef::Whole,
                    );
                    self.child.deallocate(whole);
                }
            }
        }
    }

    fn release_memory(&mut self) {
        let mut buckets = std::mem::take(&mut self.buckets);
        for (_, bucket) in buckets.iter_mut() {
            for heap in bucket.drain() {
                let size = heap.size();
                self.free_bytes -= size;
                let whole = Allocation::new(heap, 0, size, size, AllocationMethod::Standalone, BlockRef::Whole);
                self.child.deallocate(whole);
            }
        }
        debug_assert_eq!(self.free_bytes, 0);
        self.child.release_memory();
    }

    fn memory_size(&self) -> u64 {
        // A pool of fixed-size heaps is itself fixed-size.
        self.child.memory_size()
    }

    fn memory_alignment(&self) -> u64 {
        self.heap_alignment
    }

    fn query_info(&self) -> AllocatorInfo {
        let mut info = self.child.query_info();
        info.free_memory_bytes += self.free_bytes;
        info
    }
}
