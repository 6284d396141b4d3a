//! Backing heap handles
//!
//! A [`Heap`] is an opaque handle to one contiguous region of device-visible
//! memory created by the backend. Heaps are shared between the pool, the
//! sub-allocators and live allocations through [`HeapRef`] reference
//! counting; the last reference returns the region to the backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::backend::BackendProvider;

/// Shared handle to a backing heap
///
/// The reference count of the underlying `Arc` is the heap's reference
/// count: live allocations, pool buckets and slab backings each hold one
/// reference. Dropping the last reference destroys the device region.
pub type HeapRef = Arc<Heap>;

/// Compatibility class of a heap
///
/// Two heaps of the same kind are interchangeable for resource placement.
/// The kinds mirror the memory domains a discrete device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HeapKind {
    /// Device-local memory, fastest for GPU access
    DeviceLocal,
    /// Host-visible memory used for CPU-to-GPU uploads
    HostUpload,
    /// Host-visible memory used for GPU-to-CPU readback
    HostReadback,
}

impl HeapKind {
    /// All kinds, in allocator-table order
    pub const ALL: [HeapKind; 3] = [HeapKind::DeviceLocal, HeapKind::HostUpload, HeapKind::HostReadback];

    /// Stable index into per-kind allocator tables
    pub fn index(self) -> usize {
        match self {
            HeapKind::DeviceLocal => 0,
            HeapKind::HostUpload => 1,
            HeapKind::HostReadback => 2,
        }
    }
}

impl std::fmt::Display for HeapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapKind::DeviceLocal => write!(f, "device-local"),
            HeapKind::HostUpload => write!(f, "host-upload"),
            HeapKind::HostReadback => write!(f, "host-readback"),
        }
    }
}

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// One contiguous backing region owned by the backend
///
/// Residency is observable here but managed externally by the
/// [`ResidencyManager`](crate::backend::ResidencyManager).
#[derive(Debug)]
pub struct Heap {
    id: u64,
    size: u64,
    alignment: u64,
    kind: HeapKind,
    resident: AtomicBool,
    backend: Weak<dyn BackendProvider>,
}

impl Heap {
    /// Create a heap handle for a freshly created backend region
    ///
    /// Called by backend implementations only; allocators obtain heaps
    /// through [`BackendProvider::create_heap`].
    pub fn new(size: u64, alignment: u64, kind: HeapKind, backend: Weak<dyn BackendProvider>) -> HeapRef {
        Arc::new(Heap {
            id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
            size,
            alignment,
            kind,
            resident: AtomicBool::new(true),
            backend,
        })
    }

    /// Process-unique heap identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size of the backing region in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Placement alignment of the backing region
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Compatibility class of this heap
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Whether the heap is currently resident on the device
    pub fn is_resident(&self) -> bool {
        self.resident.load(Ordering::Acquire)
    }

    /// Update the residency flag; called by the residency manager
    pub fn set_resident(&self, resident: bool) {
        self.resident.store(resident, Ordering::Release);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.upgrade() {
            backend.destroy_heap(self);
        }
        tracing::trace!("heap {} destroyed ({} bytes, {})", self.id, self.size, self.kind);
    }
}
