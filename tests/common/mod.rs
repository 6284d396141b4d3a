//! Shared helpers for the integration suite

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use vramforge::{
    AllocationFlags, AllocatorConfig, HeapKind, ResourceAllocator, ResourceDescriptor, ResourceDimension,
    VirtualDevice,
};

/// A fresh allocator over a fresh virtual device
pub fn allocator_with(config: AllocatorConfig) -> (Arc<VirtualDevice>, ResourceAllocator) {
    let device = VirtualDevice::new();
    let allocator = ResourceAllocator::new(config, device.clone(), None).expect("allocator construction failed");
    (device, allocator)
}

/// Device-local buffer descriptor with backend-default alignment
pub fn buffer(size: u64) -> ResourceDescriptor {
    ResourceDescriptor {
        size,
        alignment: 0,
        dimension: ResourceDimension::Buffer,
        heap_kind: HeapKind::DeviceLocal,
    }
}

/// Texture descriptor with backend-default alignment
pub fn texture(size: u64) -> ResourceDescriptor {
    ResourceDescriptor {
        size,
        alignment: 0,
        dimension: ResourceDimension::Texture,
        heap_kind: HeapKind::DeviceLocal,
    }
}

/// Flags with a single field set
pub fn flags() -> AllocationFlags {
    AllocationFlags::default()
}
