//! Allocation throughput benchmarks
//!
//! Measures the hot paths of the allocator stack against the virtual
//! device: slab sub-allocation, pooled standalone heaps, and the committed
//! fallback. Run with `cargo bench --bench allocator_bench`.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use vramforge::{
    AllocationFlags, AllocatorConfig, HeapKind, ResourceAllocator, ResourceDescriptor, ResourceDimension,
    VirtualDevice,
};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

fn descriptor(size: u64) -> ResourceDescriptor {
    ResourceDescriptor {
        size,
        alignment: 0,
        dimension: ResourceDimension::Buffer,
        heap_kind: HeapKind::DeviceLocal,
    }
}

fn bench_suballocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("suballocate");
    for &size in &[4 * KIB, 64 * KIB, 256 * KIB] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let device = VirtualDevice::new();
            let allocator = ResourceAllocator::new(AllocatorConfig::default(), device, None).unwrap();
            b.iter(|| {
                let allocation = allocator
                    .create_resource(black_box(&descriptor(size)), AllocationFlags::default())
                    .unwrap();
                allocator.destroy_resource(allocation).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_pooled_standalone(c: &mut Criterion) {
    c.bench_function("standalone_pooled_8mib", |b| {
        let device = VirtualDevice::new();
        let allocator = ResourceAllocator::new(AllocatorConfig::default(), device, None).unwrap();
        // Prime the pool so steady-state reuse is what gets measured.
        let warm = allocator.create_resource(&descriptor(8 * MIB), AllocationFlags::default()).unwrap();
        allocator.destroy_resource(warm).unwrap();
        b.iter(|| {
            let allocation = allocator
                .create_resource(black_box(&descriptor(8 * MIB)), AllocationFlags::default())
                .unwrap();
            allocator.destroy_resource(allocation).unwrap();
        });
    });
}

fn bench_committed(c: &mut Criterion) {
    c.bench_function("committed_1mib", |b| {
        let device = VirtualDevice::new();
        let config = AllocatorConfig::default().with_always_committed(true).with_disable_size_cache(true);
        let allocator = ResourceAllocator::new(config, device, None).unwrap();
        b.iter(|| {
            let allocation = allocator
                .create_resource(black_box(&descriptor(MIB)), AllocationFlags::default())
                .unwrap();
            allocator.destroy_resource(allocation).unwrap();
        });
    });
}

fn bench_mixed_burst(c: &mut Criterion) {
    c.bench_function("mixed_burst_64", |b| {
        let device = VirtualDevice::new();
        let allocator = ResourceAllocator::new(AllocatorConfig::default(), device, None).unwrap();
        let sizes = [4 * KIB, 64 * KIB, 300 * KIB, MIB];
        b.iter(|| {
            let mut live = Vec::with_capacity(64);
            for index in 0..64 {
                let size = sizes[index % sizes.len()];
                live.push(
                    allocator
                        .create_resource(&descriptor(size), AllocationFlags::default())
                        .unwrap(),
                );
            }
            for allocation in live {
                allocator.destroy_resource(allocation).unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_suballocation,
    bench_pooled_standalone,
    bench_committed,
    bench_mixed_burst
);
criterion_main!(benches);
