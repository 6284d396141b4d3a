//! vramforge - GPU memory sub-allocation engine
//!
//! Sits between a device driver that only offers coarse, expensive heap
//! creation and an application issuing many fine-grained resource
//! allocations. Minimizes the number of backing heaps by composing slab,
//! buddy and pooling allocators, keeps a per-process budget under control,
//! and records its activity into chrome-tracing compatible event traces
//! that can be replayed offline.

pub mod allocator;
pub mod backend;
pub mod block;
pub mod error;
pub mod heap;
pub mod logging;
pub mod prefetch;
pub mod replay;
pub mod resource;
pub mod trace;

pub use allocator::{AllocationMethod, AllocatorInfo, MemoryAllocator};
pub use backend::{BackendCaps, BackendError, BackendProvider, ResidencyManager, VirtualDevice};
pub use error::{AllocResult, ErrorCategory, GpuAllocError};
pub use heap::{Heap, HeapKind, HeapRef};
pub use resource::{
    AllocationFlags, AllocatorConfig, AllocatorProfile, ResourceAllocation, ResourceAllocator,
    ResourceDescriptor, ResourceDimension,
};
