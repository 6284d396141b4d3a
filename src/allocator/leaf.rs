//! Backend-facing leaf allocators
//!
//! Leaves terminate the stack: every successful `try_allocate` maps to one
//! backend creation. Ownership of the created heap transfers upward with the
//! returned allocation, so leaves keep no per-heap state; a heap is
//! destroyed when its last reference drops.

use std::sync::Arc;

use crate::allocator::{
    Allocation, AllocationMethod, AllocationRequest, AllocatorInfo, BlockRef, MemoryAllocator, INVALID_SIZE,
};
use crate::backend::{BackendProvider, BudgetHint, ResidencyManager};
use crate::heap::HeapKind;
use crate::trace;

/// Creates one resource heap per allocation
///
/// When `always_in_budget` is set, the residency manager is asked to evict
/// enough idle memory before each creation.
#[derive(Debug)]
pub struct ResourceHeapLeaf {
    backend: Arc<dyn BackendProvider>,
    residency: Option<Arc<dyn ResidencyManager>>,
    kind: HeapKind,
    heap_alignment: u64,
    always_in_budget: bool,
}

impl ResourceHeapLeaf {
    /// Create a leaf producing heaps of the given kind
    pub fn new(
        backend: Arc<dyn BackendProvider>,
        residency: Option<Arc<dyn ResidencyManager>>,
        kind: HeapKind,
        heap_alignment: u64,
        always_in_budget: bool,
    ) -> Self {
        ResourceHeapLeaf {
            backend,
            residency,
            kind,
            heap_alignment,
            always_in_budget,
        }
    }
}

impl MemoryAllocator for ResourceHeapLeaf {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        if request.size == 0 {
            return None;
        }
        // A leaf can only satisfy a request by growing the backing store.
        if request.never_allocate {
            return None;
        }

        if self.always_in_budget {
            if let Some(residency) = &self.residency {
                if let Err(err) = residency.evict(request.size, self.kind) {
                    tracing::warn!("residency eviction failed before heap create: {}", err);
                    return None;
                }
            }
        }

        let budget = if self.always_in_budget { BudgetHint::InBudget } else { BudgetHint::BestEffort };
        match self.backend.create_heap(request.size, self.kind, budget) {
            Ok(heap) => {
                trace::object_new("Heap", heap.id());
                let size = heap.size();
                Some(Allocation::new(
                    heap,
                    0,
                    size,
                    request.size,
                    AllocationMethod::Standalone,
                    BlockRef::Whole,
                ))
            }
            Err(err) => {
                tracing::warn!("backend refused {} byte {} heap: {}", request.size, self.kind, err);
                trace::counter("backend_heap_create_failures", 1);
                None
            }
        }
    }

    fn deallocate(&mut self, allocation: Allocation) {
        debug_assert_eq!(allocation.block(), BlockRef::Whole, "leaf received a sub-allocated block");
        trace::object_destroy("Heap", allocation.heap().id());
        drop(allocation);
    }

    fn release_memory(&mut self) {
        // Nothing held: heap ownership lives in the allocations above.
    }

    fn memory_size(&self) -> u64 {
        INVALID_SIZE
    }

    fn memory_alignment(&self) -> u64 {
        self.heap_alignment
    }

    fn query_info(&self) -> AllocatorInfo {
        AllocatorInfo::default()
    }
}

/// Creates fixed-size dedicated buffers whose byte range is sub-divided by
/// the slab cache stacked on top
///
/// The fixed size keeps every buffer interchangeable, which is what lets the
/// pool recycle them by exact size.
#[derive(Debug)]
pub struct DedicatedBufferLeaf {
    backend: Arc<dyn BackendProvider>,
    kind: HeapKind,
    buffer_size: u64,
    buffer_alignment: u64,
}

impl DedicatedBufferLeaf {
    /// Create a leaf producing dedicated buffers of `buffer_size` bytes
    pub fn new(backend: Arc<dyn BackendProvider>, kind: HeapKind, buffer_size: u64, buffer_alignment: u64) -> Self {
        DedicatedBufferLeaf {
            backend,
            kind,
            buffer_size,
            buffer_alignment,
        }
    }
}

impl MemoryAllocator for DedicatedBufferLeaf {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        if request.size == 0 || request.size > self.buffer_size {
            return None;
        }
        if request.never_allocate {
            return None;
        }

        match self.backend.create_dedicated_buffer(self.buffer_size, self.kind) {
            Ok(heap) => {
                trace::object_new("BufferHeap", heap.id());
                Some(Allocation::new(
                    heap,
                    0,
                    self.buffer_size,
                    request.size,
                    AllocationMethod::SubAllocatedWithinResource,
                    BlockRef::Whole,
                ))
            }
            Err(err) => {
                tracing::warn!("backend refused dedicated {} byte buffer: {}", self.buffer_size, err);
                None
            }
        }
    }

    fn deallocate(&mut self, allocation: Allocation) {
        debug_assert_eq!(allocation.block(), BlockRef::Whole, "buffer leaf received a sub-allocated block");
        trace::object_destroy("BufferHeap", allocation.heap().id());
        drop(allocation);
    }

    fn release_memory(&mut self) {}

    fn memory_size(&self) -> u64 {
        self.buffer_size
    }

    fn memory_alignment(&self) -> u64 {
        self.buffer_alignment
    }

    fn query_info(&self) -> AllocatorInfo {
        AllocatorInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualDevice;

    #[test]
    fn test_leaf_creates_one_heap_per_request() {
        let device = VirtualDevice::new();
        let mut leaf = ResourceHeapLeaf::new(device.clone(), None, HeapKind::DeviceLocal, 65536, false);

        let a = leaf.try_allocate(&AllocationRequest::new(1 << 20, 65536)).unwrap();
        let b = leaf.try_allocate(&AllocationRequest::new(1 << 20, 65536)).unwrap();
        assert_eq!(device.heaps_created(), 2);
        assert_eq!(a.offset(), 0);
        assert_eq!(a.method(), AllocationMethod::Standalone);
        assert_ne!(a.heap().id(), b.heap().id());

        leaf.deallocate(a);
        leaf.deallocate(b);
        assert_eq!(device.heaps_destroyed(), 2);
    }

    #[test]
    fn test_leaf_never_allocate_makes_no_backend_call() {
        let device = VirtualDevice::new();
        let mut leaf = ResourceHeapLeaf::new(device.clone(), None, HeapKind::DeviceLocal, 65536, false);
        let mut request = AllocationRequest::new(1 << 20, 65536);
        request.never_allocate = true;
        assert!(leaf.try_allocate(&request).is_none());
        assert_eq!(device.heaps_created(), 0);
    }

    #[test]
    fn test_leaf_zero_size_refused() {
        let device = VirtualDevice::new();
        let mut leaf = ResourceHeapLeaf::new(device.clone(), None, HeapKind::HostUpload, 65536, false);
        assert!(leaf.try_allocate(&AllocationRequest::new(0, 1)).is_none());
        assert_eq!(device.heaps_created(), 0);
    }

    #[test]
    fn test_buffer_leaf_fixed_size() {
        let device = VirtualDevice::new();
        let mut leaf = DedicatedBufferLeaf::new(device.clone(), HeapKind::HostUpload, 65536, 65536);
        assert_eq!(leaf.memory_size(), 65536);

        let allocation = leaf.try_allocate(&AllocationRequest::new(300, 256)).unwrap();
        assert_eq!(allocation.size(), 65536);
        assert_eq!(allocation.requested_size(), 300);
        assert_eq!(allocation.method(), AllocationMethod::SubAllocatedWithinResource);
        assert_eq!(device.buffers_created(), 1);

        // A request larger than the fixed buffer cannot be served here.
        assert!(leaf.try_allocate(&AllocationRequest::new(65537, 1)).is_none());
        leaf.deallocate(allocation);
    }

    #[test]
    fn test_backend_refusal_returns_none() {
        let device = VirtualDevice::new();
        device.inject_failure();
        let mut leaf = ResourceHeapLeaf::new(device.clone(), None, HeapKind::DeviceLocal, 65536, false);
        assert!(leaf.try_allocate(&AllocationRequest::new(4096, 1)).is_none());
    }
}
