//! Residency collaboration
//!
//! Residency (whether a heap is materialized on the device) is managed
//! outside the allocation engine. The engine only needs two touch points:
//! locking a heap around backend operations that assume it is resident, and
//! evicting memory before a committed creation when the allocator is
//! configured to always stay in budget.

use crate::backend::BackendError;
use crate::heap::{Heap, HeapKind, HeapRef};

/// External residency manager consumed by the engine
pub trait ResidencyManager: Send + Sync + std::fmt::Debug {
    /// Pin a heap resident. Must be balanced by `unlock_heap`.
    fn lock_heap(&self, heap: &Heap);

    /// Release a residency pin
    fn unlock_heap(&self, heap: &Heap);

    /// Make `bytes` of room in the given memory class by paging out idle
    /// heaps
    fn evict(&self, bytes: u64, kind: HeapKind) -> Result<(), BackendError>;
}

/// RAII guard that keeps a heap resident for its lifetime
///
/// Used around any backend operation that assumes the heap is materialized,
/// such as mapping a sub-allocated range.
pub struct ScopedHeapLock<'a> {
    residency: Option<&'a dyn ResidencyManager>,
    heap: HeapRef,
}

impl<'a> ScopedHeapLock<'a> {
    /// Lock `heap` until the guard drops. A `None` manager produces an
    /// inert guard so call sites do not need to branch.
    pub fn new(residency: Option<&'a dyn ResidencyManager>, heap: HeapRef) -> Self {
        if let Some(manager) = residency {
            manager.lock_heap(&heap);
        }
        ScopedHeapLock { residency, heap }
    }

    /// The heap held by this guard
    pub fn heap(&self) -> &HeapRef {
        &self.heap
    }
}

impl Drop for ScopedHeapLock<'_> {
    fn drop(&mut self) {
        if let Some(manager) = self.residency {
            manager.unlock_heap(&self.heap);
        }
    }
}
