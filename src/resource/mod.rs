//! Root resource allocator
//!
//! The facade the application talks to. For each heap kind it owns three
//! allocator stacks and tries them in order of decreasing preference:
//!
//! 1. sub-allocate within a dedicated buffer resource (tiny buffers),
//! 2. sub-allocate inside a shared resource heap (slab cache over buddy
//!    over pool over leaf),
//! 3. standalone heap per resource (pooled below a size threshold),
//! 4. an ad hoc committed heap as the last resort.
//!
//! The root resolves request sizes and alignments against the backend caps,
//! holds the single mutex that serializes the whole stack, records one
//! observability event per attempted strategy, and aggregates `query_info`
//! across every layer.

pub mod allocation;
pub mod config;

pub use allocation::ResourceAllocation;
pub use config::{AllocatorConfig, AllocatorProfile, DEFAULT_FRAGMENTATION_LIMIT, DEFAULT_PREFERRED_HEAP_SIZE};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::allocator::{
    Allocation, AllocationMethod, AllocationRequest, AllocatorInfo, BlockRef, BuddyHeapAllocator,
    ConditionalAllocator, DedicatedBufferLeaf, MemoryAllocator, ResourceHeapLeaf, SegmentedPool,
    SlabCacheAllocator, StandaloneAllocator,
};
use crate::allocator::slab_cache::PrefetchContext;
use crate::backend::{BackendCaps, BackendProvider, BudgetHint, ResidencyManager};
use crate::block::{align_up, prev_power_of_two};
use crate::error::{AllocResult, GpuAllocError};
use crate::heap::HeapKind;
use crate::prefetch::PrefetchWorker;
use crate::resource::allocation::AllocationStrategy;
use crate::trace;
use crate::trace::RecordLevel;

static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(1);

/// Standalone heaps larger than this multiple of the preferred heap size
/// bypass the pool: oversized heaps idling in buckets cost more than the
/// create they save.
const MAX_POOLED_HEAP_FACTOR: u64 = 4;

/// What kind of resource a request describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ResourceDimension {
    /// Linear buffer; 64 KiB placement granularity
    Buffer,
    /// Texture; small ones may use 4 KiB placement granularity
    Texture,
}

/// One resource allocation request
#[derive(Debug, Clone, Copy)]
pub struct ResourceDescriptor {
    /// Bytes needed
    pub size: u64,
    /// Required alignment; 0 means the backend default for the dimension
    pub alignment: u64,
    /// Buffer or texture
    pub dimension: ResourceDimension,
    /// Memory domain to place the resource in
    pub heap_kind: HeapKind,
}

/// Per-request placement flags
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationFlags {
    /// Fail rather than create new device memory
    pub never_allocate: bool,
    /// Skip the sub-allocating strategies; one heap per resource
    pub never_sub_allocate: bool,
    /// Let the slab cache prefetch follow-up slabs in the background
    pub always_prefetch: bool,
    /// Permit placement inside a shared dedicated buffer
    pub sub_allocate_within_resource: bool,
}

#[derive(Debug)]
struct KindAllocators {
    /// Strategy 1: slab cache over pooled dedicated buffers
    buffer: Box<dyn MemoryAllocator>,
    /// Strategy 2: slab cache over buddy over pooled resource heaps
    sub: Box<dyn MemoryAllocator>,
    /// Strategy 3: standalone heap per resource
    heap: Box<dyn MemoryAllocator>,
}

#[derive(Debug)]
struct AllocatorTable {
    kinds: Vec<KindAllocators>,
    /// Heaps created directly by the committed path
    committed_info: AllocatorInfo,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedRequest {
    size: u64,
    alignment: u64,
}

/// Thread-safe root allocator over a backend provider
#[derive(Debug)]
pub struct ResourceAllocator {
    id: u64,
    backend: Arc<dyn BackendProvider>,
    residency: Option<Arc<dyn ResidencyManager>>,
    caps: BackendCaps,
    preferred_heap_size: u64,
    max_heap_size: u64,
    always_committed: bool,
    always_in_budget: bool,
    disable_prefetch: bool,
    state: Mutex<AllocatorTable>,
}

impl ResourceAllocator {
    /// Build the allocator stacks for every heap kind
    ///
    /// Fails with `InvalidArgument` when the configuration is inconsistent
    /// (preferred size above the maximum, fragmentation limit outside
    /// [0, 1]).
    pub fn new(
        config: AllocatorConfig,
        backend: Arc<dyn BackendProvider>,
        residency: Option<Arc<dyn ResidencyManager>>,
    ) -> AllocResult<Self> {
        let caps = backend.caps();

        let max_heap_size = if config.max_heap_size == 0 {
            caps.max_resource_heap_size
        } else {
            config.max_heap_size.min(caps.max_resource_heap_size)
        };
        let preferred_heap_size = if config.preferred_heap_size == 0 {
            DEFAULT_PREFERRED_HEAP_SIZE
        } else {
            config.preferred_heap_size.next_power_of_two()
        };
        if preferred_heap_size > max_heap_size {
            return Err(GpuAllocError::InvalidArgument(format!(
                "preferred heap size {} exceeds maximum {}",
                preferred_heap_size, max_heap_size
            )));
        }
        if !(0.0..=1.0).contains(&config.fragmentation_limit) {
            return Err(GpuAllocError::InvalidArgument(format!(
                "fragmentation limit {} outside [0, 1]",
                config.fragmentation_limit
            )));
        }

        if let Some(record_options) = config.record_options.clone() {
            trace::startup_event_trace(record_options);
        }

        let prefetch_worker = if config.disable_prefetch { None } else { Some(PrefetchWorker::spawn()) };

        let heap_alignment = caps.placement_alignment;
        let buddy_space = prev_power_of_two(max_heap_size);
        let buffer_size = caps.placement_alignment;

        let mut kinds = Vec::with_capacity(HeapKind::ALL.len());
        for kind in HeapKind::ALL {
            // Strategy 2: slab cache -> buddy -> pool -> resource heap leaf.
            let sub: Box<dyn MemoryAllocator> = {
                let leaf = ResourceHeapLeaf::new(
                    backend.clone(),
                    residency.clone(),
                    kind,
                    heap_alignment,
                    config.always_in_budget,
                );
                let pooled: Box<dyn MemoryAllocator> = if config.always_on_demand {
                    Box::new(leaf)
                } else {
                    Box::new(SegmentedPool::with_bucket_capacity(
                        Box::new(leaf),
                        heap_alignment,
                        config.pool_bucket_capacity,
                    ))
                };
                // Small textures place at 4 KiB granularity, so the buddy
                // must be able to hand out blocks that small.
                let buddy = BuddyHeapAllocator::new(
                    buddy_space,
                    preferred_heap_size,
                    heap_alignment,
                    caps.small_placement_alignment,
                    pooled,
                );
                let prefetch = prefetch_worker.as_ref().map(|worker| PrefetchContext {
                    worker: worker.clone(),
                    backend: backend.clone(),
                    kind,
                });
                Box::new(SlabCacheAllocator::new(
                    heap_alignment,
                    buddy_space,
                    preferred_heap_size,
                    heap_alignment,
                    config.fragmentation_limit,
                    prefetch,
                    Box::new(buddy),
                ))
            };

            // Strategy 3: standalone heaps, pooled below a size threshold.
            let heap: Box<dyn MemoryAllocator> = {
                let make_leaf = || {
                    ResourceHeapLeaf::new(
                        backend.clone(),
                        residency.clone(),
                        kind,
                        heap_alignment,
                        config.always_in_budget,
                    )
                };
                let inner: Box<dyn MemoryAllocator> = if config.always_on_demand {
                    Box::new(make_leaf())
                } else {
                    let pooled = SegmentedPool::with_bucket_capacity(
                        Box::new(make_leaf()),
                        heap_alignment,
                        config.pool_bucket_capacity,
                    );
                    Box::new(ConditionalAllocator::new(
                        Box::new(pooled),
                        Box::new(make_leaf()),
                        preferred_heap_size * MAX_POOLED_HEAP_FACTOR,
                    ))
                };
                Box::new(StandaloneAllocator::new(inner))
            };

            // Strategy 1: byte-granular slab cache over pooled dedicated
            // buffers. Buffers are byte-addressable when sub-allocated
            // within, so every class is admitted.
            let buffer: Box<dyn MemoryAllocator> = {
                let leaf = DedicatedBufferLeaf::new(backend.clone(), kind, buffer_size, buffer_size);
                let pooled: Box<dyn MemoryAllocator> = if config.always_on_demand {
                    Box::new(leaf)
                } else {
                    Box::new(SegmentedPool::with_bucket_capacity(
                        Box::new(leaf),
                        buffer_size,
                        config.pool_bucket_capacity,
                    ))
                };
                Box::new(SlabCacheAllocator::new(
                    1,
                    buffer_size,
                    buffer_size,
                    buffer_size,
                    1.0,
                    None,
                    pooled,
                ))
            };

            kinds.push(KindAllocators { buffer, sub, heap });
        }

        let allocator = ResourceAllocator {
            id: NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            residency,
            caps,
            preferred_heap_size,
            max_heap_size,
            always_committed: config.always_committed,
            always_in_budget: config.always_in_budget,
            disable_prefetch: config.disable_prefetch,
            state: Mutex::new(AllocatorTable {
                kinds,
                committed_info: AllocatorInfo::default(),
            }),
        };

        trace::object_new("ResourceAllocator", allocator.id);
        trace::object_snapshot(
            "ResourceAllocator",
            allocator.id,
            serde_json::json!({
                "preferred_heap_size": preferred_heap_size,
                "max_heap_size": max_heap_size,
                "fragmentation_limit": config.fragmentation_limit,
                "always_committed": config.always_committed,
                "always_on_demand": config.always_on_demand,
                "always_in_budget": config.always_in_budget,
                "disable_prefetch": config.disable_prefetch,
                "disable_size_cache": config.disable_size_cache,
            }),
        );

        if !config.disable_size_cache {
            allocator.warm_size_cache();
        }

        tracing::info!(
            "resource allocator ready: preferred heap {} MiB, max heap {} MiB",
            preferred_heap_size >> 20,
            max_heap_size >> 20
        );
        Ok(allocator)
    }

    /// Eagerly create the size-class entries commonly requested so the
    /// first real request of each size skips class setup. Probes never
    /// allocate backing memory.
    fn warm_size_cache(&self) {
        let mut state = self.state.lock().unwrap();
        let mut size = self.caps.placement_alignment;
        while size <= self.preferred_heap_size {
            for kind in HeapKind::ALL {
                let request = AllocationRequest {
                    size,
                    alignment: self.caps.placement_alignment,
                    never_allocate: true,
                    cache_size: true,
                    prefetch: false,
                };
                let _ = state.kinds[kind.index()].sub.try_allocate(&request);
            }
            size *= 2;
        }
    }

    /// Resolve the request against backend placement rules
    fn resolve(&self, descriptor: &ResourceDescriptor) -> AllocResult<ResolvedRequest> {
        if descriptor.size == 0 {
            trace::message(RecordLevel::Warn, "ResourceAllocator.CreateResource", "zero-size request");
            return Err(GpuAllocError::InvalidArgument("resource size is zero".into()));
        }
        if descriptor.alignment != 0 && !descriptor.alignment.is_power_of_two() {
            trace::message(
                RecordLevel::Warn,
                "ResourceAllocator.CreateResource",
                "alignment is not a power of two",
            );
            return Err(GpuAllocError::InvalidArgument(format!(
                "alignment {} is not a power of two",
                descriptor.alignment
            )));
        }

        let mut alignment = match descriptor.dimension {
            ResourceDimension::Buffer => self.caps.placement_alignment,
            // Small textures can take advantage of smaller alignments.
            ResourceDimension::Texture if descriptor.size <= self.caps.placement_alignment => {
                self.caps.small_placement_alignment
            }
            ResourceDimension::Texture => self.caps.placement_alignment,
        };
        if descriptor.alignment > alignment {
            alignment = descriptor.alignment;
        }
        let size = align_up(descriptor.size, alignment);

        if size > self.max_heap_size {
            return Err(GpuAllocError::OutOfMemory);
        }
        Ok(ResolvedRequest { size, alignment })
    }

    /// Place a resource according to the descriptor and flags
    ///
    /// Strategies are tried most-effective first; each attempt emits one
    /// trace event. Counters change only on success.
    pub fn create_resource(
        &self,
        descriptor: &ResourceDescriptor,
        flags: AllocationFlags,
    ) -> AllocResult<ResourceAllocation> {
        trace::duration_begin("ResourceAllocator.CreateResource");
        let result = self.create_resource_internal(descriptor, flags);
        trace::duration_end("ResourceAllocator.CreateResource");

        match &result {
            Ok(allocation) => {
                trace::object_snapshot(
                    "ResourceAllocation",
                    allocation.id(),
                    serde_json::json!({
                        "heap": allocation.heap().map(|heap| heap.id()),
                        "offset": allocation.offset(),
                        "size": allocation.size(),
                        "method": format!("{:?}", allocation.method()),
                    }),
                );
                if trace::is_enabled() {
                    let info = self.query_info();
                    trace::counter("gpu_memory_used_bytes", info.used_memory_bytes as i64);
                    trace::counter("gpu_memory_reserved_bytes", info.free_memory_bytes as i64);
                    trace::counter(
                        "gpu_memory_unused_bytes",
                        (info.used_memory_bytes - info.used_block_bytes) as i64,
                    );
                }
            }
            Err(err) => {
                tracing::debug!("create_resource failed: {}", err);
            }
        }
        result
    }

    fn create_resource_internal(
        &self,
        descriptor: &ResourceDescriptor,
        flags: AllocationFlags,
    ) -> AllocResult<ResourceAllocation> {
        let resolved = self.resolve(descriptor)?;
        let kind = descriptor.heap_kind;

        trace::call(
            "ResourceAllocator.CreateResource",
            serde_json::json!({
                "size": descriptor.size,
                "alignment": descriptor.alignment,
                "dimension": descriptor.dimension,
                "kind": kind,
                "never_allocate": flags.never_allocate,
                "never_sub_allocate": flags.never_sub_allocate,
                "always_prefetch": flags.always_prefetch,
                "sub_allocate_within_resource": flags.sub_allocate_within_resource,
            }),
        );

        let mut state = self.state.lock().unwrap();

        // Strategy 1: place inside a shared dedicated buffer. Same
        // performance as sub-allocating heaps without the 64 KiB size
        // rounding, but only viable for requests smaller than the
        // placement granularity.
        if flags.sub_allocate_within_resource
            && !flags.never_sub_allocate
            && !self.always_committed
            && descriptor.dimension == ResourceDimension::Buffer
            && resolved.alignment > descriptor.size
            && descriptor.alignment <= self.caps.placement_alignment
        {
            let request = AllocationRequest {
                size: descriptor.size,
                alignment: descriptor.alignment.max(1),
                never_allocate: flags.never_allocate,
                cache_size: false,
                prefetch: false,
            };
            let attempt = state.kinds[kind.index()].buffer.try_allocate(&request);
            trace::call(
                "ResourceAllocator.TryAllocate",
                serde_json::json!({ "strategy": "within-resource", "succeeded": attempt.is_some() }),
            );
            if let Some(inner) = attempt {
                return Ok(ResourceAllocation::new(inner, kind, AllocationStrategy::WithinResource, self.id));
            }
            if flags.never_allocate {
                return Err(GpuAllocError::OutOfMemory);
            }
        }

        // Strategy 2: sub-allocate inside a shared resource heap.
        if !self.always_committed && !flags.never_sub_allocate {
            let sub = &mut state.kinds[kind.index()].sub;
            if resolved.size <= sub.memory_size() {
                let request = AllocationRequest {
                    size: resolved.size,
                    alignment: resolved.alignment,
                    never_allocate: flags.never_allocate,
                    cache_size: false,
                    prefetch: flags.always_prefetch && !self.disable_prefetch,
                };
                let attempt = sub.try_allocate(&request);
                trace::call(
                    "ResourceAllocator.TryAllocate",
                    serde_json::json!({ "strategy": "sub-allocate-in-heap", "succeeded": attempt.is_some() }),
                );
                if let Some(inner) = attempt {
                    return Ok(ResourceAllocation::new(
                        inner,
                        kind,
                        AllocationStrategy::SubAllocateInHeap,
                        self.id,
                    ));
                }
                if flags.never_allocate {
                    return Err(GpuAllocError::OutOfMemory);
                }
            }
        }

        // Strategy 3: a whole heap of its own, pooled when reasonable.
        if !self.always_committed {
            let request = AllocationRequest {
                size: resolved.size,
                alignment: self.caps.placement_alignment.max(resolved.alignment),
                never_allocate: flags.never_allocate,
                cache_size: false,
                prefetch: false,
            };
            let attempt = state.kinds[kind.index()].heap.try_allocate(&request);
            trace::call(
                "ResourceAllocator.TryAllocate",
                serde_json::json!({ "strategy": "standalone-heap", "succeeded": attempt.is_some() }),
            );
            if let Some(inner) = attempt {
                return Ok(ResourceAllocation::new(inner, kind, AllocationStrategy::StandaloneHeap, self.id));
            }
            if flags.never_allocate {
                return Err(GpuAllocError::OutOfMemory);
            }
        }

        // Strategy 4: an ad hoc committed heap. Safest and most expensive;
        // last resort.
        if flags.never_allocate {
            return Err(GpuAllocError::OutOfMemory);
        }
        if !self.always_committed {
            trace::message(
                RecordLevel::Info,
                "ResourceAllocator.CreateResource",
                "resource allocation could not be pooled",
            );
        }

        if self.always_in_budget {
            if let Some(residency) = &self.residency {
                residency.evict(resolved.size, kind).map_err(|err| {
                    GpuAllocError::BackendFailure(err.code())
                })?;
            }
        }
        let budget = if self.always_in_budget { BudgetHint::InBudget } else { BudgetHint::BestEffort };
        let created = self.backend.create_heap(resolved.size, kind, budget);
        trace::call(
            "ResourceAllocator.TryAllocate",
            serde_json::json!({ "strategy": "committed", "succeeded": created.is_ok() }),
        );
        let heap = created.map_err(|err| GpuAllocError::BackendFailure(err.code()))?;
        trace::object_new("Heap", heap.id());

        state.committed_info.used_memory_bytes += heap.size();
        state.committed_info.used_memory_count += 1;
        state.committed_info.used_block_bytes += heap.size();

        let size = heap.size();
        let inner = Allocation::new(heap, 0, size, descriptor.size, AllocationMethod::Standalone, BlockRef::Whole);
        Ok(ResourceAllocation::new(inner, kind, AllocationStrategy::Committed, self.id))
    }

    /// Return a resource's memory to the allocator that placed it
    ///
    /// Destroying an empty allocation is a no-op. Destroying an allocation
    /// issued by another allocator instance is a contract violation.
    pub fn destroy_resource(&self, mut resource: ResourceAllocation) -> AllocResult<()> {
        if resource.is_empty() {
            return Ok(());
        }
        if resource.owner() != self.id {
            // Leak rather than corrupt: the foreign allocator keeps its
            // block reserved and the residual shows up in its counters.
            debug_assert!(false, "allocation destroyed through the wrong allocator");
            std::mem::forget(resource);
            return Err(GpuAllocError::ContractViolation(
                "allocation was issued by a different allocator".into(),
            ));
        }
        let (Some(kind), Some(strategy)) = (resource.heap_kind(), resource.strategy()) else {
            return Err(GpuAllocError::ContractViolation("allocation carries no placement record".into()));
        };
        let Some(inner) = resource.take_inner() else {
            return Ok(());
        };

        trace::call(
            "ResourceAllocator.DestroyResource",
            serde_json::json!({ "id": resource.id() }),
        );
        trace::object_destroy("ResourceAllocation", resource.id());

        let mut state = self.state.lock().unwrap();
        match strategy {
            AllocationStrategy::WithinResource => state.kinds[kind.index()].buffer.deallocate(inner),
            AllocationStrategy::SubAllocateInHeap => state.kinds[kind.index()].sub.deallocate(inner),
            AllocationStrategy::StandaloneHeap => state.kinds[kind.index()].heap.deallocate(inner),
            AllocationStrategy::Committed => {
                state.committed_info.used_memory_bytes -= inner.heap().size();
                state.committed_info.used_memory_count -= 1;
                state.committed_info.used_block_bytes -= inner.heap().size();
                trace::object_destroy("Heap", inner.heap().id());
                drop(inner);
            }
        }
        Ok(())
    }

    /// Release every idle heap held anywhere in the stack and cancel
    /// outstanding prefetches
    pub fn trim(&self) {
        trace::call("ResourceAllocator.Trim", serde_json::json!({}));
        let mut state = self.state.lock().unwrap();
        for kind in state.kinds.iter_mut() {
            kind.buffer.release_memory();
            kind.sub.release_memory();
            kind.heap.release_memory();
        }
        trace::flush_event_trace();
    }

    /// Aggregate counters across every strategy and heap kind
    ///
    /// The snapshot is atomic for the whole allocator because it is taken
    /// under the root mutex.
    pub fn query_info(&self) -> AllocatorInfo {
        let state = self.state.lock().unwrap();
        let mut info = state.committed_info;
        for kind in &state.kinds {
            info += kind.buffer.query_info();
            info += kind.sub.query_info();
            info += kind.heap.query_info();
        }
        debug_assert!(info.used_block_bytes <= info.used_memory_bytes);
        info
    }

    /// The residency manager, when one was supplied
    pub fn residency(&self) -> Option<&Arc<dyn ResidencyManager>> {
        self.residency.as_ref()
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        trace::object_destroy("ResourceAllocator", self.id);
        trace::flush_event_trace();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualDevice;

    fn buffer_descriptor(size: u64) -> ResourceDescriptor {
        ResourceDescriptor {
            size,
            alignment: 0,
            dimension: ResourceDimension::Buffer,
            heap_kind: HeapKind::DeviceLocal,
        }
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let device = VirtualDevice::new();
        let allocator = ResourceAllocator::new(AllocatorConfig::default(), device.clone(), None).unwrap();

        let zero = allocator.create_resource(&buffer_descriptor(0), AllocationFlags::default());
        assert!(matches!(zero, Err(GpuAllocError::InvalidArgument(_))));

        let mut descriptor = buffer_descriptor(1024);
        descriptor.alignment = 100;
        let misaligned = allocator.create_resource(&descriptor, AllocationFlags::default());
        assert!(matches!(misaligned, Err(GpuAllocError::InvalidArgument(_))));
        assert_eq!(device.heaps_created(), 0);
    }

    #[test]
    fn test_config_validation() {
        let device = VirtualDevice::new();
        let bad = AllocatorConfig::default()
            .with_preferred_heap_size(64 << 30)
            .with_max_heap_size(4 << 20);
        assert!(matches!(
            ResourceAllocator::new(bad, device.clone(), None),
            Err(GpuAllocError::InvalidArgument(_))
        ));

        let bad_limit = AllocatorConfig::default().with_fragmentation_limit(1.5);
        assert!(matches!(
            ResourceAllocator::new(bad_limit, device, None),
            Err(GpuAllocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_oversized_request_is_oom_without_backend_call() {
        let device = VirtualDevice::new();
        let config = AllocatorConfig::default().with_max_heap_size(64 << 20);
        let allocator = ResourceAllocator::new(config, device.clone(), None).unwrap();

        let result = allocator.create_resource(&buffer_descriptor((64 << 20) + 1), AllocationFlags::default());
        assert!(matches!(result, Err(GpuAllocError::OutOfMemory)));
        assert_eq!(device.heaps_created(), 0);
    }

    #[test]
    fn test_backend_failure_propagates_verbatim() {
        let device = VirtualDevice::new();
        let config = AllocatorConfig::default().with_always_committed(true).with_disable_size_cache(true);
        let allocator = ResourceAllocator::new(config, device.clone(), None).unwrap();

        device.inject_failure();
        let result = allocator.create_resource(&buffer_descriptor(1 << 20), AllocationFlags::default());
        assert!(matches!(result, Err(GpuAllocError::BackendFailure(-7))));
    }

    #[test]
    fn test_destroy_empty_is_noop() {
        let device = VirtualDevice::new();
        let allocator = ResourceAllocator::new(AllocatorConfig::default(), device, None).unwrap();
        assert!(allocator.destroy_resource(ResourceAllocation::empty()).is_ok());
    }

    #[test]
    fn test_wrong_allocator_detected() {
        let device = VirtualDevice::new();
        let first = ResourceAllocator::new(AllocatorConfig::default(), device.clone(), None).unwrap();
        let second = ResourceAllocator::new(AllocatorConfig::default(), device, None).unwrap();

        let allocation = first
            .create_resource(&buffer_descriptor(65536), AllocationFlags::default())
            .unwrap();
        if !cfg!(debug_assertions) {
            assert!(matches!(
                second.destroy_resource(allocation),
                Err(GpuAllocError::ContractViolation(_))
            ));
        } else {
            first.destroy_resource(allocation).unwrap();
        }
    }
}
