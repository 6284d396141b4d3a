//! Public allocation handle
//!
//! [`ResourceAllocation`] is what `create_resource` hands back to the
//! application: the backing heap, the reserved range and the method used.
//! It must be returned to the allocator that issued it via
//! `destroy_resource`; dropping a live allocation leaks its block (visible
//! in the allocator's counters) rather than corrupting state.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::allocator::{Allocation, AllocationMethod};
use crate::backend::{ResidencyManager, ScopedHeapLock};
use crate::heap::{HeapKind, HeapRef};

static NEXT_ALLOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Which root strategy produced an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllocationStrategy {
    WithinResource,
    SubAllocateInHeap,
    StandaloneHeap,
    Committed,
}

/// A resource placement returned by the root allocator
#[derive(Debug, Default)]
pub struct ResourceAllocation {
    inner: Option<Allocation>,
    kind: Option<HeapKind>,
    strategy: Option<AllocationStrategy>,
    owner: u64,
    id: u64,
}

impl ResourceAllocation {
    pub(crate) fn new(inner: Allocation, kind: HeapKind, strategy: AllocationStrategy, owner: u64) -> Self {
        ResourceAllocation {
            inner: Some(inner),
            kind: Some(kind),
            strategy: Some(strategy),
            owner,
            id: NEXT_ALLOCATION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// An empty allocation; destroying it is a no-op
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this handle carries a live placement
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Process-unique id, 0 for empty allocations
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The backing heap, if live
    pub fn heap(&self) -> Option<&HeapRef> {
        self.inner.as_ref().map(|inner| inner.heap())
    }

    /// Byte offset within the backing heap
    pub fn offset(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.offset())
    }

    /// Reserved size after rounding
    pub fn size(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.size())
    }

    /// Size originally requested
    pub fn requested_size(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.requested_size())
    }

    /// Heap kind the resource was placed in
    pub fn heap_kind(&self) -> Option<HeapKind> {
        self.kind
    }

    /// How the resource was placed
    ///
    /// Placements from the within-resource strategy always report
    /// [`AllocationMethod::SubAllocatedWithinResource`], whichever layer of
    /// that stack served them.
    pub fn method(&self) -> Option<AllocationMethod> {
        match self.strategy? {
            AllocationStrategy::WithinResource => Some(AllocationMethod::SubAllocatedWithinResource),
            _ => self.inner.as_ref().map(|inner| inner.method()),
        }
    }

    /// Keep the backing heap resident for the guard's lifetime
    pub fn lock_residency<'a>(&self, residency: Option<&'a dyn ResidencyManager>) -> Option<ScopedHeapLock<'a>> {
        self.heap().map(|heap| ScopedHeapLock::new(residency, heap.clone()))
    }

    pub(crate) fn strategy(&self) -> Option<AllocationStrategy> {
        self.strategy
    }

    /// Id of the allocator instance that issued this allocation
    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn take_inner(&mut self) -> Option<Allocation> {
        self.inner.take()
    }
}

impl Drop for ResourceAllocation {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            tracing::warn!(
                "resource allocation {} dropped while live; leaking {} bytes at offset {}",
                self.id,
                inner.size(),
                inner.offset()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allocation() {
        let empty = ResourceAllocation::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.offset(), 0);
        assert_eq!(empty.method(), None);
        assert_eq!(empty.heap_kind(), None);
    }
}
