//! Device backend abstraction
//!
//! The allocation engine never talks to a GPU API directly. Everything the
//! driver side must provide is captured by the [`BackendProvider`] trait:
//! coarse heap creation and destruction, optional dedicated-buffer creation,
//! and a capability report. The optional [`ResidencyManager`] collaborator
//! covers residency locking and budget eviction.
//!
//! [`VirtualDevice`] is a bookkeeping-only implementation used by the
//! playback harness and the test suite.

pub mod residency;
pub mod virtual_device;

pub use residency::{ResidencyManager, ScopedHeapLock};
pub use virtual_device::VirtualDevice;

use thiserror::Error;

use crate::heap::{HeapKind, HeapRef};

/// Backend capability report
///
/// Queried once at allocator creation and used to resolve request sizes and
/// alignments.
#[derive(Debug, Clone, Copy)]
pub struct BackendCaps {
    /// Largest heap the backend will create
    pub max_resource_heap_size: u64,
    /// Default placement alignment for resources (64 KiB)
    pub placement_alignment: u64,
    /// Placement alignment small textures may use instead (4 KiB)
    pub small_placement_alignment: u64,
}

impl Default for BackendCaps {
    fn default() -> Self {
        BackendCaps {
            max_resource_heap_size: 32 * 1024 * 1024 * 1024,
            placement_alignment: 64 * 1024,
            small_placement_alignment: 4 * 1024,
        }
    }
}

/// Hint passed with heap creation about budget enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetHint {
    /// The caller already made room; create even if over budget
    BestEffort,
    /// The backend should fail rather than exceed the process budget
    InBudget,
}

/// Errors surfaced by a backend
///
/// The numeric code travels upward verbatim as
/// [`GpuAllocError::BackendFailure`](crate::error::GpuAllocError::BackendFailure).
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    /// The device has no memory left for a region of the requested size
    #[error("device out of memory creating {0} bytes")]
    OutOfDeviceMemory(u64),
    /// The device was lost or reset
    #[error("device lost")]
    DeviceLost,
    /// Any other driver error, by code
    #[error("driver error {0}")]
    Driver(i32),
}

impl BackendError {
    /// Opaque error code for verbatim passthrough
    pub fn code(&self) -> i32 {
        match self {
            BackendError::OutOfDeviceMemory(_) => -1,
            BackendError::DeviceLost => -2,
            BackendError::Driver(code) => *code,
        }
    }
}

/// The driver-side surface consumed by the allocation engine
///
/// Implementations must be thread-safe: heap creation is invoked from the
/// prefetch worker thread as well as from request threads.
pub trait BackendProvider: Send + Sync + std::fmt::Debug {
    /// Create a backing heap of `size` bytes in the given compatibility
    /// class. Expensive (driver-side, can take milliseconds).
    fn create_heap(&self, size: u64, kind: HeapKind, budget: BudgetHint) -> Result<HeapRef, BackendError>;

    /// Return a heap's region to the device. Called from `Heap::drop`;
    /// total if the handle is owned.
    fn destroy_heap(&self, heap: &crate::heap::Heap);

    /// Create a committed buffer resource whose implicit heap can be
    /// sub-allocated within.
    fn create_dedicated_buffer(&self, size: u64, kind: HeapKind) -> Result<HeapRef, BackendError>;

    /// Capability report
    fn caps(&self) -> BackendCaps;
}
