//! Multi-size-class slab allocator with size cache and prefetch
//!
//! Most buffer workloads cluster around a handful of sizes, so requests are
//! bucketed into power-of-two size classes. Each class owns a list of slabs;
//! a slab is one heap obtained from the child allocator, subdivided into
//! fixed-size blocks tracked by a bitmap.
//!
//! A request is admitted into the smallest class that satisfies its size and
//! alignment, provided the internal fragmentation stays within the
//! configured limit; anything else falls through to the child allocator
//! untouched, so the coarser buddy path below still sees it.
//!
//! The class table doubles as the size cache: warm-up probes create class
//! entries up front so the first real request of a common size skips the
//! setup cost. When prefetch is enabled, crossing 50% utilization of a slab
//! kicks the acquisition of the next one onto the worker thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::allocator::{
    Allocation, AllocationMethod, AllocationRequest, AllocatorInfo, BlockRef, MemoryAllocator,
};
use crate::backend::BackendProvider;
use crate::block::SlabBlockTracker;
use crate::heap::{HeapKind, HeapRef};
use crate::prefetch::{PrefetchJob, PrefetchWorker};
use crate::trace;

static NEXT_SLAB_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the worker needs to acquire slabs for this allocator
#[derive(Debug, Clone)]
pub struct PrefetchContext {
    /// Shared worker thread
    pub worker: Arc<PrefetchWorker>,
    /// Backend the worker creates heaps with
    pub backend: Arc<dyn BackendProvider>,
    /// Compatibility class of the created heaps
    pub kind: HeapKind,
}

#[derive(Debug)]
enum SlabBacking {
    /// Acquired through the child allocator (buddy/pool path)
    Child(Allocation),
    /// Acquired directly by the prefetch worker
    Prefetched(HeapRef),
}

impl SlabBacking {
    fn heap(&self) -> &HeapRef {
        match self {
            SlabBacking::Child(allocation) => allocation.heap(),
            SlabBacking::Prefetched(heap) => heap,
        }
    }

    fn heap_offset(&self) -> u64 {
        match self {
            SlabBacking::Child(allocation) => allocation.offset(),
            SlabBacking::Prefetched(_) => 0,
        }
    }
}

#[derive(Debug)]
struct Slab {
    id: u64,
    backing: SlabBacking,
    tracker: SlabBlockTracker,
    /// Slabs acquired speculatively or by cache warming survive becoming
    /// empty; normal slabs retire immediately
    retain_when_empty: bool,
    from_prefetch: bool,
    /// Whether this allocator accounts the backing heap: true when the
    /// child handed over a whole heap nothing below keeps counting
    counts_memory: bool,
}

#[derive(Debug)]
struct SlabClass {
    block_size: u64,
    slab_bytes: u64,
    slabs: Vec<Slab>,
    pinned: bool,
    prefetch_in_flight: bool,
}

/// Size-class slab cache over an inner allocator
#[derive(Debug)]
pub struct SlabCacheAllocator {
    id: u64,
    min_block_size: u64,
    max_slab_size: u64,
    slab_size: u64,
    slab_alignment: u64,
    fragmentation_limit: f64,
    prefetch: Option<PrefetchContext>,
    child: Box<dyn MemoryAllocator>,
    classes: BTreeMap<u64, SlabClass>,
    next_slab_id: u64,
    // Own counters; child counters are aggregated on query.
    used_block_bytes: u64,
    /// Child-reported block bytes consumed by slab backings; internal
    /// plumbing, excluded from the aggregate
    backing_block_bytes: u64,
    prefetched_used_bytes: u64,
    prefetched_used_count: u64,
    prefetched_free_bytes: u64,
    /// Whole-heap slab backings accounted here because no layer below
    /// tracks them (pool and leaf children transfer ownership)
    standalone_backed_bytes: u64,
    standalone_backed_count: u64,
    prefetched_hits: u64,
    prefetched_misses: u64,
    size_cache_hits: u64,
}

impl SlabCacheAllocator {
    /// Create a slab cache
    ///
    /// `fragmentation_limit` is the admitted fraction of wasted bytes per
    /// block in [0, 1]; pass `None` for `prefetch` to disable speculative
    /// slab acquisition.
    pub fn new(
        min_block_size: u64,
        max_slab_size: u64,
        slab_size: u64,
        slab_alignment: u64,
        fragmentation_limit: f64,
        prefetch: Option<PrefetchContext>,
        child: Box<dyn MemoryAllocator>,
    ) -> Self {
        assert!(min_block_size.is_power_of_two());
        assert!(max_slab_size.is_power_of_two());
        assert!((0.0..=1.0).contains(&fragmentation_limit));

        SlabCacheAllocator {
            id: NEXT_SLAB_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            min_block_size,
            max_slab_size,
            slab_size,
            slab_alignment,
            fragmentation_limit,
            prefetch,
            child,
            classes: BTreeMap::new(),
            next_slab_id: 0,
            used_block_bytes: 0,
            backing_block_bytes: 0,
            prefetched_used_bytes: 0,
            prefetched_used_count: 0,
            prefetched_free_bytes: 0,
            standalone_backed_bytes: 0,
            standalone_backed_count: 0,
            prefetched_hits: 0,
            prefetched_misses: 0,
            size_cache_hits: 0,
        }
    }

    /// Size-cache hits observed so far (warmed classes found on lookup)
    pub fn size_cache_hits(&self) -> u64 {
        self.size_cache_hits
    }

    /// Smallest admissible class size for `(size, alignment)`, or `None`
    /// when the request must fall through to the child
    fn admit(&self, size: u64, alignment: u64) -> Option<u64> {
        let class_size = size
            .max(alignment)
            .max(self.min_block_size)
            .checked_next_power_of_two()?;
        if class_size > self.max_slab_size {
            return None;
        }
        let wasted = (class_size - size) as f64 / class_size as f64;
        if wasted <= self.fragmentation_limit {
            Some(class_size)
        } else {
            None
        }
    }

    /// Move finished prefetches into their size classes; called under the
    /// root lock at the start of every allocation
    fn splice_completed_prefetches(&mut self) {
        let Some(context) = &self.prefetch else { return };
        let completed = context.worker.drain_completed(self.id);
        for finished in completed {
            let Some(class) = self.classes.get_mut(&finished.class_size) else {
                continue;
            };
            class.prefetch_in_flight = false;
            let block_count = (class.slab_bytes / class.block_size) as u32;
            let heap_size = finished.heap.size();
            self.next_slab_id += 1;
            class.slabs.push(Slab {
                id: self.next_slab_id,
                backing: SlabBacking::Prefetched(finished.heap),
                tracker: SlabBlockTracker::new(block_count),
                retain_when_empty: true,
                from_prefetch: true,
                counts_memory: false,
            });
            self.prefetched_free_bytes += heap_size;
            trace::counter("slab_prefetch_spliced", 1);
        }
    }

    fn maybe_prefetch_next_slab(&mut self, class_size: u64) {
        let Some(context) = &self.prefetch else { return };
        let Some(class) = self.classes.get_mut(&class_size) else { return };
        if class.prefetch_in_flight {
            return;
        }
        // Trigger once the busiest slab crosses half full and no slab has
        // room to spare.
        let crossed = class
            .slabs
            .iter()
            .map(|slab| slab.tracker.utilization())
            .fold(0.0f64, f64::max)
            >= 0.5;
        let any_room = class.slabs.iter().any(|slab| !slab.tracker.is_full());
        if !crossed && any_room {
            return;
        }

        let submitted = context.worker.submit(PrefetchJob {
            owner: self.id,
            class_size,
            heap_size: class.slab_bytes,
            kind: context.kind,
            backend: context.backend.clone(),
        });
        if submitted {
            class.prefetch_in_flight = true;
            trace::counter("slab_prefetch_submitted", 1);
        }
    }

    fn retire_slab(&mut self, class_size: u64, slab_index: usize) {
        let class = self.classes.get_mut(&class_size).unwrap();
        let slab = class.slabs.remove(slab_index);
        match slab.backing {
            SlabBacking::Child(backing) => {
                self.backing_block_bytes -= backing.size();
                if slab.counts_memory {
                    self.standalone_backed_bytes -= backing.heap().size();
                    self.standalone_backed_count -= 1;
                }
                self.child.deallocate(backing);
            }
            SlabBacking::Prefetched(heap) => {
                self.prefetched_free_bytes -= heap.size();
                drop(heap);
            }
        }
    }
}

impl MemoryAllocator for SlabCacheAllocator {
    fn try_allocate(&mut self, request: &AllocationRequest) -> Option<Allocation> {
        if request.size == 0 || !request.alignment.is_power_of_two() {
            return None;
        }

        self.splice_completed_prefetches();

        let Some(class_size) = self.admit(request.size, request.alignment) else {
            // Too coarse for any class: the child sees the request as-is.
            return self.child.try_allocate(request);
        };

        let slab_bytes = self.slab_size.max(class_size);
        match self.classes.get_mut(&class_size) {
            Some(class) => {
                self.size_cache_hits += 1;
                if request.cache_size {
                    class.pinned = true;
                }
            }
            None => {
                self.classes.insert(
                    class_size,
                    SlabClass {
                        block_size: class_size,
                        slab_bytes,
                        slabs: Vec::new(),
                        pinned: request.cache_size,
                        prefetch_in_flight: false,
                    },
                );
            }
        }

        // First slab with room, lowest id first for reproducibility.
        let (class_slab_bytes, prefetch_in_flight, existing) = {
            let class = self.classes.get(&class_size).unwrap();
            (
                class.slab_bytes,
                class.prefetch_in_flight,
                class.slabs.iter().position(|slab| !slab.tracker.is_full()),
            )
        };

        let mut slab_index = existing;
        if slab_index.is_none() {
            if prefetch_in_flight {
                // The slab we need is still being created; do not wait for it.
                self.prefetched_misses += 1;
            }
            // never_allocate rides along: a pooled heap below may still
            // serve the backing without growing the backing store.
            let backing_request = request.rescoped(class_slab_bytes, self.slab_alignment);
            let backing = self.child.try_allocate(&backing_request)?;
            self.backing_block_bytes += backing.size();
            // Whole-heap backings (pool or leaf children) are accounted
            // here; sub-allocated backings are already counted below.
            let counts_memory = backing.method() == AllocationMethod::Standalone;
            if counts_memory {
                self.standalone_backed_bytes += backing.heap().size();
                self.standalone_backed_count += 1;
            }
            let block_count = (class_slab_bytes / class_size) as u32;
            self.next_slab_id += 1;
            let slab_id = self.next_slab_id;
            let class = self.classes.get_mut(&class_size).unwrap();
            class.slabs.push(Slab {
                id: slab_id,
                backing: SlabBacking::Child(backing),
                tracker: SlabBlockTracker::new(block_count),
                retain_when_empty: request.cache_size,
                from_prefetch: false,
                counts_memory,
            });
            slab_index = Some(class.slabs.len() - 1);
        }

        let class = self.classes.get_mut(&class_size).unwrap();
        let slab_index = slab_index.unwrap();
        let slab = &mut class.slabs[slab_index];
        let was_empty = slab.tracker.is_empty();
        let index = slab.tracker.acquire()?;
        let offset = slab.backing.heap_offset() + index as u64 * class_size;
        let heap = slab.backing.heap().clone();
        let slab_id = slab.id;
        let from_prefetch = slab.from_prefetch;
        let prefetched_backing = matches!(slab.backing, SlabBacking::Prefetched(_));

        if from_prefetch {
            self.prefetched_hits += 1;
        }
        if prefetched_backing && was_empty {
            // The slab graduates from idle cache to live memory.
            let heap_size = heap.size();
            self.prefetched_free_bytes -= heap_size;
            self.prefetched_used_bytes += heap_size;
            self.prefetched_used_count += 1;
        }
        self.used_block_bytes += class_size;

        let allocation = Allocation::new(
            heap,
            offset,
            class_size,
            request.size,
            AllocationMethod::SubAllocated,
            BlockRef::Slab {
                class_size,
                slab_id,
                index,
            },
        );

        if request.cache_size {
            // Warm-up request: publish the block straight back as free.
            // The returned value is informational and must not be passed to
            // deallocate.
            let class = self.classes.get_mut(&class_size).unwrap();
            let slab = &mut class.slabs[slab_index];
            slab.tracker.release(index);
            self.used_block_bytes -= class_size;
            return Some(allocation);
        }

        if request.prefetch {
            self.maybe_prefetch_next_slab(class_size);
        }

        Some(allocation)
    }

    fn deallocate(&mut self, allocation: Allocation) {
        let (class_size, slab_id, index) = match allocation.block() {
            BlockRef::Slab { class_size, slab_id, index } => (class_size, slab_id, index),
            // Fall-through allocations belong to the child.
            _ => return self.child.deallocate(allocation),
        };

        let released = {
            let Some(class) = self.classes.get_mut(&class_size) else {
                debug_assert!(false, "deallocate for unknown size class {}", class_size);
                tracing::error!("leaking slab block: unknown size class {}", class_size);
                return;
            };
            let Some(slab_index) = class.slabs.iter().position(|slab| slab.id == slab_id) else {
                debug_assert!(false, "deallocate for unknown slab {}", slab_id);
                tracing::error!("leaking slab block: unknown slab {}", slab_id);
                return;
            };

            let slab = &mut class.slabs[slab_index];
            if !slab.tracker.release(index) {
                tracing::error!("leaking slab block {}: double free detected", index);
                return;
            }
            Some((
                slab_index,
                slab.tracker.is_empty(),
                matches!(slab.backing, SlabBacking::Prefetched(_)),
                slab.backing.heap().size(),
                slab.retain_when_empty,
            ))
        };

        self.used_block_bytes -= class_size;
        drop(allocation);

        if let Some((slab_index, empty, prefetched, heap_size, retain)) = released {
            if empty {
                if prefetched {
                    // Idle again: move the heap back to the free side.
                    self.prefetched_used_bytes -= heap_size;
                    self.prefetched_used_count -= 1;
                    self.prefetched_free_bytes += heap_size;
                }
                if !retain {
                    self.retire_slab(class_size, slab_index);
                }
            }
        }
    }

    fn release_memory(&mut self) {
        if let Some(context) = &self.prefetch {
            // Synchronous cancellation: no prefetch survives a release.
            context.worker.cancel_and_quiesce();
            for class in self.classes.values_mut() {
                class.prefetch_in_flight = false;
            }
        }

        // Drop idle retained slabs; slabs with live blocks stay.
        let class_sizes: Vec<u64> = self.classes.keys().copied().collect();
        for class_size in class_sizes {
            loop {
                let class = self.classes.get(&class_size).unwrap();
                let Some(slab_index) = class.slabs.iter().position(|slab| slab.tracker.is_empty()) else {
                    break;
                };
                self.retire_slab(class_size, slab_index);
            }
        }
        self.classes.retain(|_, class| class.pinned || !class.slabs.is_empty());

        self.child.release_memory();
    }

    fn memory_size(&self) -> u64 {
        self.child.memory_size()
    }

    fn memory_alignment(&self) -> u64 {
        self.slab_alignment
    }

    fn query_info(&self) -> AllocatorInfo {
        let mut info = self.child.query_info();
        // Slab backings are internal plumbing, not client blocks. Children
        // that do no block accounting (pool, leaf) saturate at zero.
        info.used_block_bytes = info.used_block_bytes.saturating_sub(self.backing_block_bytes);
        info.used_block_bytes += self.used_block_bytes;
        info.used_memory_bytes += self.prefetched_used_bytes + self.standalone_backed_bytes;
        info.used_memory_count += self.prefetched_used_count + self.standalone_backed_count;
        info.free_memory_bytes += self.prefetched_free_bytes;
        info.prefetched_memory_hits += self.prefetched_hits;
        info.prefetched_memory_misses += self.prefetched_misses;
        info
    }
}
