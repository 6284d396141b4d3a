//! Bookkeeping-only device backend
//!
//! `VirtualDevice` implements [`BackendProvider`] without touching any real
//! GPU API. It tracks every create/destroy call, enforces an optional
//! capacity limit and can inject failures, which makes allocator behaviour
//! observable in tests and lets the playback harness replay captured traces
//! on machines without a device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::backend::{BackendCaps, BackendError, BackendProvider, BudgetHint};
use crate::heap::{Heap, HeapKind, HeapRef};

#[derive(Debug, Default)]
struct DeviceCounters {
    heaps_created: u64,
    heaps_destroyed: u64,
    buffers_created: u64,
    bytes_allocated: u64,
    peak_bytes: u64,
}

/// Simulated device used by tests and trace playback
#[derive(Debug)]
pub struct VirtualDevice {
    caps: BackendCaps,
    capacity: Option<u64>,
    counters: Mutex<DeviceCounters>,
    fail_next_create: AtomicBool,
    create_latency_us: AtomicU64,
    weak_self: Mutex<Weak<VirtualDevice>>,
}

impl VirtualDevice {
    /// Create a device with default caps and unlimited capacity
    pub fn new() -> Arc<Self> {
        Self::with_capacity(None)
    }

    /// Create a device that refuses heap creation once `capacity` bytes are
    /// outstanding
    pub fn with_capacity(capacity: Option<u64>) -> Arc<Self> {
        let device = Arc::new(VirtualDevice {
            caps: BackendCaps::default(),
            capacity,
            counters: Mutex::new(DeviceCounters::default()),
            fail_next_create: AtomicBool::new(false),
            create_latency_us: AtomicU64::new(0),
            weak_self: Mutex::new(Weak::new()),
        });
        *device.weak_self.lock().unwrap() = Arc::downgrade(&device);
        device
    }

    /// Number of heaps created so far (dedicated buffers included)
    pub fn heaps_created(&self) -> u64 {
        self.counters.lock().unwrap().heaps_created
    }

    /// Number of heaps destroyed so far
    pub fn heaps_destroyed(&self) -> u64 {
        self.counters.lock().unwrap().heaps_destroyed
    }

    /// Number of dedicated buffers created so far
    pub fn buffers_created(&self) -> u64 {
        self.counters.lock().unwrap().buffers_created
    }

    /// Bytes currently outstanding on the device
    pub fn bytes_allocated(&self) -> u64 {
        self.counters.lock().unwrap().bytes_allocated
    }

    /// High-water mark of outstanding bytes
    pub fn peak_bytes(&self) -> u64 {
        self.counters.lock().unwrap().peak_bytes
    }

    /// Make the next create call fail with a driver error
    pub fn inject_failure(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Simulate driver-side creation latency (used to exercise prefetch)
    pub fn set_create_latency_us(&self, micros: u64) {
        self.create_latency_us.store(micros, Ordering::SeqCst);
    }

    /// Test helper: create a bare heap handle outside the allocator stack
    pub fn create_test_heap(self: &Arc<Self>, size: u64, kind: HeapKind) -> HeapRef {
        self.create_heap(size, kind, BudgetHint::BestEffort)
            .expect("virtual device refused test heap")
    }

    fn weak(&self) -> Weak<dyn BackendProvider> {
        let weak: Weak<VirtualDevice> = self.weak_self.lock().unwrap().clone();
        weak
    }

    fn create_region(&self, size: u64, alignment: u64, kind: HeapKind, dedicated: bool) -> Result<HeapRef, BackendError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Driver(-7));
        }
        if size == 0 || size > self.caps.max_resource_heap_size {
            return Err(BackendError::OutOfDeviceMemory(size));
        }

        let latency = self.create_latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(std::time::Duration::from_micros(latency));
        }

        let mut counters = self.counters.lock().unwrap();
        if let Some(capacity) = self.capacity {
            if counters.bytes_allocated + size > capacity {
                return Err(BackendError::OutOfDeviceMemory(size));
            }
        }
        counters.heaps_created += 1;
        if dedicated {
            counters.buffers_created += 1;
        }
        counters.bytes_allocated += size;
        counters.peak_bytes = counters.peak_bytes.max(counters.bytes_allocated);
        drop(counters);

        tracing::debug!("virtual device created {} heap of {} bytes", kind, size);
        Ok(Heap::new(size, alignment, kind, self.weak()))
    }
}

impl BackendProvider for VirtualDevice {
    fn create_heap(&self, size: u64, kind: HeapKind, _budget: BudgetHint) -> Result<HeapRef, BackendError> {
        self.create_region(size, self.caps.placement_alignment, kind, false)
    }

    fn destroy_heap(&self, heap: &Heap) {
        let mut counters = self.counters.lock().unwrap();
        counters.heaps_destroyed += 1;
        counters.bytes_allocated = counters.bytes_allocated.saturating_sub(heap.size());
    }

    fn create_dedicated_buffer(&self, size: u64, kind: HeapKind) -> Result<HeapRef, BackendError> {
        self.create_region(size, self.caps.placement_alignment, kind, true)
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }
}
