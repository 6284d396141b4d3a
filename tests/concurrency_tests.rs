//! Thread-safety tests for the root allocator
//!
//! The root serializes the stack behind one mutex; these tests drive it
//! from many threads at once and assert the bookkeeping stays coherent.

mod common;

use common::allocator_with;
use std::sync::Arc;
use vramforge::{
    AllocationFlags, AllocatorConfig, HeapKind, ResourceDescriptor, ResourceDimension,
};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

#[test]
fn test_parallel_allocate_free() {
    let (device, allocator) = allocator_with(AllocatorConfig::default());
    let allocator = Arc::new(allocator);

    let threads: Vec<_> = (0..8u64)
        .map(|thread_index| {
            let allocator = allocator.clone();
            std::thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(thread_index);
                let mut live = Vec::new();
                for _ in 0..200 {
                    if live.is_empty() || rng.gen_bool(0.6) {
                        let size = *[4 * KIB, 64 * KIB, 256 * KIB, MIB].choose(&mut rng).unwrap();
                        let descriptor = ResourceDescriptor {
                            size,
                            alignment: 0,
                            dimension: ResourceDimension::Buffer,
                            heap_kind: HeapKind::DeviceLocal,
                        };
                        let allocation = allocator
                            .create_resource(&descriptor, AllocationFlags::default())
                            .expect("allocation failed under contention");
                        assert!(allocation.offset() + allocation.size() <= allocation.heap().unwrap().size());
                        live.push(allocation);
                    } else {
                        let index = rng.gen_range(0..live.len());
                        let allocation = live.swap_remove(index);
                        allocator.destroy_resource(allocation).unwrap();
                    }
                }
                // Deallocations after allocations on this thread observe
                // program order: everything we still hold frees cleanly.
                for allocation in live {
                    allocator.destroy_resource(allocation).unwrap();
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().expect("worker thread panicked");
    }

    let info = allocator.query_info();
    assert_eq!(info.used_block_bytes, 0);
    assert_eq!(info.used_memory_bytes, 0);

    allocator.trim();
    let info = allocator.query_info();
    assert_eq!(info.free_memory_bytes, 0);
    assert_eq!(device.heaps_created(), device.heaps_destroyed());
}

#[test]
fn test_concurrent_query_info_snapshots_are_sane() {
    let (_device, allocator) = allocator_with(AllocatorConfig::default());
    let allocator = Arc::new(allocator);

    let churn = {
        let allocator = allocator.clone();
        std::thread::spawn(move || {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            for _ in 0..300 {
                let size = *[64 * KIB, 512 * KIB, 2 * MIB].choose(&mut rng).unwrap();
                let descriptor = ResourceDescriptor {
                    size,
                    alignment: 0,
                    dimension: ResourceDimension::Buffer,
                    heap_kind: HeapKind::DeviceLocal,
                };
                let allocation = allocator.create_resource(&descriptor, AllocationFlags::default()).unwrap();
                allocator.destroy_resource(allocation).unwrap();
            }
        })
    };

    // Snapshots taken concurrently are atomic per query: the core
    // invariant holds in every one of them.
    for _ in 0..300 {
        let info = allocator.query_info();
        assert!(info.used_block_bytes <= info.used_memory_bytes);
    }
    churn.join().unwrap();
}

#[test]
fn test_trim_races_with_allocation() {
    let (_device, allocator) = allocator_with(AllocatorConfig::default());
    let allocator = Arc::new(allocator);

    let trimmer = {
        let allocator = allocator.clone();
        std::thread::spawn(move || {
            for _ in 0..50 {
                allocator.trim();
                std::thread::sleep(std::time::Duration::from_micros(50));
            }
        })
    };

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for _ in 0..200 {
        let size = *[64 * KIB, MIB].choose(&mut rng).unwrap();
        let descriptor = ResourceDescriptor {
            size,
            alignment: 0,
            dimension: ResourceDimension::Buffer,
            heap_kind: HeapKind::DeviceLocal,
        };
        let allocation = allocator.create_resource(&descriptor, AllocationFlags::default()).unwrap();
        allocator.destroy_resource(allocation).unwrap();
    }
    trimmer.join().unwrap();

    allocator.trim();
    let info = allocator.query_info();
    assert_eq!(info.used_memory_bytes, 0);
    assert_eq!(info.free_memory_bytes, 0);
}
