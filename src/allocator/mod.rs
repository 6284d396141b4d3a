//! Composable memory allocator stack
//!
//! Every layer of the stack satisfies the same [`MemoryAllocator`] contract
//! so allocators can be stacked: slab caches over buddy sub-allocators over
//! pools over backend leaves. Requests flow down as
//! [`AllocationRequest`]s; results flow up as [`Allocation`]s carrying the
//! backing heap, the reserved block and the method used.
//!
//! Composition uses owning handles: each wrapper exclusively owns its inner
//! allocator, and an allocation is always returned to the allocator that
//! issued it. Routing on the way back down is driven by the allocation's
//! [`BlockRef`] tag, so no back-pointers are stored.

pub mod buddy_heap;
pub mod conditional;
pub mod leaf;
pub mod pool;
pub mod slab_cache;
pub mod standalone;

pub use buddy_heap::BuddyHeapAllocator;
pub use conditional::ConditionalAllocator;
pub use leaf::{DedicatedBufferLeaf, ResourceHeapLeaf};
pub use pool::SegmentedPool;
pub use slab_cache::SlabCacheAllocator;
pub use standalone::StandaloneAllocator;

use crate::heap::HeapRef;

/// Sentinel for allocators that hand out variable-sized heaps
pub const INVALID_SIZE: u64 = u64::MAX;

/// Sentinel offset for standalone allocations that own their whole heap
pub const INVALID_OFFSET: u64 = u64::MAX;

/// How an allocation was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AllocationMethod {
    /// One allocation occupies one whole heap
    Standalone,
    /// Reserved a block inside a shared resource heap
    SubAllocated,
    /// Reserved a byte range inside a pre-created buffer resource
    SubAllocatedWithinResource,
}

/// Identifies the reserved block within its issuing allocator
///
/// Each allocator interprets only its own variant and forwards the rest to
/// its inner allocator, which makes deallocation routing structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// The block covers the entire heap
    Whole,
    /// A buddy block; `offset` is in the buddy allocator's virtual space
    Buddy {
        /// Offset within the virtual buddy space (not the heap)
        virtual_offset: u64,
        /// Buddy level the block was reserved at
        level: u8,
    },
    /// A slab block within a size class
    Slab {
        /// Block size of the owning size class
        class_size: u64,
        /// Which slab of the class holds the block
        slab_id: u64,
        /// Block index within the slab bitmap
        index: u32,
    },
}

/// Parameters of one allocation attempt
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest {
    /// Bytes requested
    pub size: u64,
    /// Required offset alignment, a power of two
    pub alignment: u64,
    /// Fail rather than grow the backing store
    pub never_allocate: bool,
    /// The result only warms internal free lists; the reserved block and
    /// its backing memory are published as free, pre-allocated
    pub cache_size: bool,
    /// The allocator may speculatively grow the backing store off the
    /// critical path
    pub prefetch: bool,
}

impl AllocationRequest {
    /// Plain request with no flags
    pub fn new(size: u64, alignment: u64) -> Self {
        AllocationRequest {
            size,
            alignment,
            never_allocate: false,
            cache_size: false,
            prefetch: false,
        }
    }

    /// Copy of this request with a different size and alignment, keeping
    /// the flags (used when a wrapper re-targets its inner allocator)
    pub fn rescoped(&self, size: u64, alignment: u64) -> Self {
        AllocationRequest { size, alignment, ..*self }
    }
}

/// The externally observable result of a successful allocation
///
/// While an `Allocation` is live its heap holds one reference on its
/// behalf, its block stays reserved in the issuing allocator, and no other
/// live allocation overlaps its `(heap, byte range)`.
#[derive(Debug)]
pub struct Allocation {
    heap: HeapRef,
    offset: u64,
    size: u64,
    requested_size: u64,
    method: AllocationMethod,
    block: BlockRef,
}

impl Allocation {
    /// Assemble an allocation; used by allocator implementations only
    pub(crate) fn new(
        heap: HeapRef,
        offset: u64,
        size: u64,
        requested_size: u64,
        method: AllocationMethod,
        block: BlockRef,
    ) -> Self {
        Allocation {
            heap,
            offset,
            size,
            requested_size,
            method,
            block,
        }
    }

    /// The backing heap
    pub fn heap(&self) -> &HeapRef {
        &self.heap
    }

    /// Byte offset of the reserved range within the heap
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the reserved block (after rounding)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size the caller asked for, before rounding
    pub fn requested_size(&self) -> u64 {
        self.requested_size
    }

    /// How the allocation was satisfied
    pub fn method(&self) -> AllocationMethod {
        self.method
    }

    /// The reserved block, for deallocation routing
    pub fn block(&self) -> BlockRef {
        self.block
    }

    pub(crate) fn into_heap(self) -> HeapRef {
        self.heap
    }
}

/// Running totals published by each allocator
///
/// Aggregation is by summation; `used_block_bytes <= used_memory_bytes`
/// always holds because reserved blocks live inside held heaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorInfo {
    /// Bytes reserved by live blocks
    pub used_block_bytes: u64,
    /// Bytes of heaps held for live allocations
    pub used_memory_bytes: u64,
    /// Number of heaps held for live allocations
    pub used_memory_count: u64,
    /// Bytes of heaps held idle (pools, cached slabs)
    pub free_memory_bytes: u64,
    /// Allocations that needed a slab while its prefetch was still in
    /// flight
    pub prefetched_memory_misses: u64,
    /// Allocations served from a slab acquired by prefetch
    pub prefetched_memory_hits: u64,
}

impl std::ops::AddAssign for AllocatorInfo {
    fn add_assign(&mut self, other: Self) {
        self.used_block_bytes += other.used_block_bytes;
        self.used_memory_bytes += other.used_memory_bytes;
        self.used_memory_count += other.used_memory_count;
        self.free_memory_bytes += other.free_memory_bytes;
        self.prefetched_memory_misses += other.prefetched_memory_misses;
        self.prefetched_memory_hits += other.prefetched_memory_hits;
    }
}

impl std::ops::Add for AllocatorInfo {
    type Output = AllocatorInfo;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

/// The contract every allocator in the stack satisfies
///
/// Implementations are not individually thread-safe; the root facade holds
/// one mutex for the duration of each call.
pub trait MemoryAllocator: std::fmt::Debug + Send {
    /// Attempt to satisfy `request`. Returns `None` when the size exceeds
    /// [`memory_size`](Self::memory_size), the alignment cannot be
    /// honoured, capacity is exhausted under `never_allocate`, or the
    /// backend refuses.
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation>;

    /// Return an allocation issued by this allocator. Passing an allocation
    /// issued elsewhere is a contract violation: detected by debug
    /// assertions, leaked in release builds.
    fn deallocate(&mut self, allocation: Allocation);

    /// Release every heap currently held idle (pool buckets, empty slabs).
    /// Blocks until pending prefetches quiesce.
    fn release_memory(&mut self);

    /// The fixed heap size this allocator hands out, or
    /// [`INVALID_SIZE`] for variable-sized allocators
    fn memory_size(&self) -> u64 {
        INVALID_SIZE
    }

    /// Heap-level placement alignment (not block alignment)
    fn memory_alignment(&self) -> u64 {
        1
    }

    /// Snapshot of this allocator's counters, children included
    fn query_info(&self) -> AllocatorInfo;
}
