//! Configuration for the resource allocator
//!
//! [`AllocatorConfig`] controls heap sizing, pooling, prefetch and
//! recording. Unset sizes are resolved against the backend's capability
//! report when the allocator is created.

use crate::trace::RecordOptions;

/// Default heap size handed to the sub-allocating layers (4 MiB)
pub const DEFAULT_PREFERRED_HEAP_SIZE: u64 = 4 * 1024 * 1024;

/// Default slab admission threshold
pub const DEFAULT_FRAGMENTATION_LIMIT: f64 = 0.125;

/// Tuning profile shorthand used by the playback harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorProfile {
    /// Library defaults
    Default,
    /// Throughput first: prefetch on, generous pooling
    MaxPerf,
    /// Footprint first: no pooling, no prefetch, stay in budget
    LowMem,
    /// Use the configuration captured in the trace being replayed
    Captured,
}

/// Configuration for [`ResourceAllocator`](crate::resource::ResourceAllocator)
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Heap size for the buddy and slab layers; rounded up to a power of
    /// two. 0 means the 4 MiB default.
    pub preferred_heap_size: u64,

    /// Hard cap on any single heap; 0 means the backend-reported maximum
    pub max_heap_size: u64,

    /// Slab admission threshold in [0, 1]
    pub fragmentation_limit: f64,

    /// Skip all sub-allocation layers; every resource gets a committed heap
    pub always_committed: bool,

    /// Disable the segmented pool; heaps are created and destroyed on
    /// demand
    pub always_on_demand: bool,

    /// Ask the residency manager to evict before creating heaps
    pub always_in_budget: bool,

    /// Disable background slab prefetch
    pub disable_prefetch: bool,

    /// Skip the eager size-class warm-up
    pub disable_size_cache: bool,

    /// Cap idle heaps kept per pool bucket; `None` is unbounded
    pub pool_bucket_capacity: Option<usize>,

    /// Event-trace recording; `None` leaves recording untouched
    pub record_options: Option<RecordOptions>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            preferred_heap_size: DEFAULT_PREFERRED_HEAP_SIZE,
            max_heap_size: 0,
            fragmentation_limit: DEFAULT_FRAGMENTATION_LIMIT,
            always_committed: false,
            always_on_demand: false,
            always_in_budget: false,
            disable_prefetch: false,
            disable_size_cache: false,
            pool_bucket_capacity: None,
            record_options: None,
        }
    }
}

impl AllocatorConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for a named profile
    pub fn for_profile(profile: AllocatorProfile) -> Self {
        match profile {
            AllocatorProfile::Default | AllocatorProfile::Captured => Self::default(),
            AllocatorProfile::MaxPerf => Self::default().with_pool_bucket_capacity(None),
            AllocatorProfile::LowMem => Self::default()
                .with_always_on_demand(true)
                .with_always_in_budget(true)
                .with_disable_prefetch(true)
                .with_disable_size_cache(true),
        }
    }

    /// Set the preferred heap size
    pub fn with_preferred_heap_size(mut self, preferred_heap_size: u64) -> Self {
        self.preferred_heap_size = preferred_heap_size;
        self
    }

    /// Set the maximum heap size
    pub fn with_max_heap_size(mut self, max_heap_size: u64) -> Self {
        self.max_heap_size = max_heap_size;
        self
    }

    /// Set the slab admission threshold
    pub fn with_fragmentation_limit(mut self, fragmentation_limit: f64) -> Self {
        self.fragmentation_limit = fragmentation_limit;
        self
    }

    /// Force committed heaps for every resource
    pub fn with_always_committed(mut self, always_committed: bool) -> Self {
        self.always_committed = always_committed;
        self
    }

    /// Disable heap pooling
    pub fn with_always_on_demand(mut self, always_on_demand: bool) -> Self {
        self.always_on_demand = always_on_demand;
        self
    }

    /// Evict before creating heaps
    pub fn with_always_in_budget(mut self, always_in_budget: bool) -> Self {
        self.always_in_budget = always_in_budget;
        self
    }

    /// Disable background prefetch
    pub fn with_disable_prefetch(mut self, disable_prefetch: bool) -> Self {
        self.disable_prefetch = disable_prefetch;
        self
    }

    /// Skip size-class warm-up
    pub fn with_disable_size_cache(mut self, disable_size_cache: bool) -> Self {
        self.disable_size_cache = disable_size_cache;
        self
    }

    /// Cap idle heaps per pool bucket
    pub fn with_pool_bucket_capacity(mut self, capacity: Option<usize>) -> Self {
        self.pool_bucket_capacity = capacity;
        self
    }

    /// Enable event-trace recording
    pub fn with_record_options(mut self, record_options: RecordOptions) -> Self {
        self.record_options = Some(record_options);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AllocatorConfig::default();
        assert_eq!(config.preferred_heap_size, 4 * 1024 * 1024);
        assert_eq!(config.max_heap_size, 0);
        assert_eq!(config.fragmentation_limit, 0.125);
        assert!(!config.always_committed);
        assert!(!config.always_on_demand);
        assert!(!config.disable_prefetch);
    }

    #[test]
    fn test_builder_chain() {
        let config = AllocatorConfig::new()
            .with_preferred_heap_size(1 << 20)
            .with_max_heap_size(1 << 28)
            .with_fragmentation_limit(0.25)
            .with_always_on_demand(true)
            .with_pool_bucket_capacity(Some(8));
        assert_eq!(config.preferred_heap_size, 1 << 20);
        assert_eq!(config.max_heap_size, 1 << 28);
        assert_eq!(config.fragmentation_limit, 0.25);
        assert!(config.always_on_demand);
        assert_eq!(config.pool_bucket_capacity, Some(8));
    }

    #[test]
    fn test_low_mem_profile_disables_caching() {
        let config = AllocatorConfig::for_profile(AllocatorProfile::LowMem);
        assert!(config.always_on_demand);
        assert!(config.always_in_budget);
        assert!(config.disable_prefetch);
        assert!(config.disable_size_cache);
    }
}
