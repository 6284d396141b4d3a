//! Trace capture playback
//!
//! Parses a recorded event trace and re-issues its allocation calls against
//! a freshly built allocator over the virtual device, verifying that each
//! call resolves the same way it did when captured. Used by the CLI to
//! reproduce allocator behaviour from a trace file without a device.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;

use crate::backend::VirtualDevice;
use crate::error::GpuAllocError;
use crate::heap::HeapKind;
use crate::resource::{AllocationFlags, AllocatorConfig, ResourceAllocator, ResourceDescriptor, ResourceDimension};

/// Errors produced while loading a playback file
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The file could not be read
    #[error("cannot read playback file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON
    #[error("cannot parse playback file: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON is valid but not a usable trace
    #[error("malformed trace: {0}")]
    Schema(String),
}

/// One replayable operation from the trace
#[derive(Debug)]
pub enum PlaybackOp {
    /// A recorded `create_resource` call
    Create {
        /// The captured request
        descriptor: ResourceDescriptor,
        /// The captured placement flags
        flags: AllocationFlags,
        /// Allocation id recorded for the result, when the call succeeded
        recorded_id: Option<u64>,
    },
    /// A recorded `destroy_resource` call
    Destroy {
        /// Allocation id recorded at creation
        recorded_id: u64,
    },
    /// A recorded `trim` call
    Trim,
}

/// A parsed trace ready to replay
#[derive(Debug)]
pub struct PlaybackFile {
    /// Allocator configuration captured in the trace, when present
    pub captured_config: Option<AllocatorConfig>,
    /// Operations in capture order
    pub ops: Vec<PlaybackOp>,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    size: u64,
    alignment: u64,
    dimension: ResourceDimension,
    kind: HeapKind,
    #[serde(default)]
    never_allocate: bool,
    #[serde(default)]
    never_sub_allocate: bool,
    #[serde(default)]
    always_prefetch: bool,
    #[serde(default)]
    sub_allocate_within_resource: bool,
}

#[derive(Debug, Deserialize)]
struct CapturedConfigArgs {
    preferred_heap_size: u64,
    max_heap_size: u64,
    fragmentation_limit: f64,
    always_committed: bool,
    always_on_demand: bool,
    always_in_budget: bool,
    disable_prefetch: bool,
    disable_size_cache: bool,
}

impl PlaybackFile {
    /// Load and validate a trace file
    pub fn parse(path: &Path) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path)?;
        let root: serde_json::Value = serde_json::from_str(&text)?;
        let events = root
            .get("traceEvents")
            .and_then(|value| value.as_array())
            .ok_or_else(|| ReplayError::Schema("missing traceEvents array".into()))?;

        let mut captured_config = None;
        let mut ops: Vec<PlaybackOp> = Vec::new();

        for event in events {
            let name = event.get("name").and_then(|value| value.as_str()).unwrap_or_default();
            let phase = event.get("ph").and_then(|value| value.as_str()).unwrap_or_default();

            match (name, phase) {
                ("ResourceAllocator.CreateResource", "i") => {
                    let Some(args) = event.get("args") else { continue };
                    // Diagnostic messages share the call name; skip them.
                    if args.get("message").is_some() {
                        continue;
                    }
                    let args: CreateArgs = serde_json::from_value(args.clone())
                        .map_err(|err| ReplayError::Schema(format!("bad CreateResource args: {}", err)))?;
                    ops.push(PlaybackOp::Create {
                        descriptor: ResourceDescriptor {
                            size: args.size,
                            alignment: args.alignment,
                            dimension: args.dimension,
                            heap_kind: args.kind,
                        },
                        flags: AllocationFlags {
                            never_allocate: args.never_allocate,
                            never_sub_allocate: args.never_sub_allocate,
                            always_prefetch: args.always_prefetch,
                            sub_allocate_within_resource: args.sub_allocate_within_resource,
                        },
                        recorded_id: None,
                    });
                }
                ("ResourceAllocation", "O") => {
                    // Bind the snapshot to the most recent unbound create.
                    let id = parse_object_id(event)?;
                    if let Some(PlaybackOp::Create { recorded_id, .. }) = ops
                        .iter_mut()
                        .rev()
                        .find(|op| matches!(op, PlaybackOp::Create { recorded_id: None, .. }))
                    {
                        *recorded_id = Some(id);
                    }
                }
                ("ResourceAllocator.DestroyResource", "i") => {
                    let recorded_id = event
                        .get("args")
                        .and_then(|args| args.get("id"))
                        .and_then(|id| id.as_u64())
                        .ok_or_else(|| ReplayError::Schema("DestroyResource without id".into()))?;
                    ops.push(PlaybackOp::Destroy { recorded_id });
                }
                ("ResourceAllocator.Trim", "i") => ops.push(PlaybackOp::Trim),
                ("ResourceAllocator", "O") => {
                    if let Some(args) = event.get("args") {
                        if let Ok(config) = serde_json::from_value::<CapturedConfigArgs>(args.clone()) {
                            captured_config = Some(
                                AllocatorConfig::new()
                                    .with_preferred_heap_size(config.preferred_heap_size)
                                    .with_max_heap_size(config.max_heap_size)
                                    .with_fragmentation_limit(config.fragmentation_limit)
                                    .with_always_committed(config.always_committed)
                                    .with_always_on_demand(config.always_on_demand)
                                    .with_always_in_budget(config.always_in_budget)
                                    .with_disable_prefetch(config.disable_prefetch)
                                    .with_disable_size_cache(config.disable_size_cache),
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        if ops.is_empty() {
            return Err(ReplayError::Schema("trace contains no allocation calls".into()));
        }
        Ok(PlaybackFile { captured_config, ops })
    }
}

fn parse_object_id(event: &serde_json::Value) -> Result<u64, ReplayError> {
    let id = event
        .get("id")
        .and_then(|value| value.as_str())
        .ok_or_else(|| ReplayError::Schema("object event without id".into()))?;
    let digits = id.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|err| ReplayError::Schema(format!("bad object id {}: {}", id, err)))
}

/// Flag overrides applied to every replayed create
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackOverrides {
    /// Force `never_allocate` on every call
    pub never_allocate: bool,
    /// Force `never_sub_allocate` on every call
    pub force_standalone: bool,
}

/// Outcome of a playback run
#[derive(Debug, Default)]
pub struct PlaybackReport {
    /// Create calls replayed
    pub creates: u64,
    /// Destroy calls replayed
    pub destroys: u64,
    /// Calls whose outcome differed from the capture
    pub mismatches: u64,
    /// Heaps the virtual device created during the run
    pub backend_heaps_created: u64,
    /// High-water mark of virtual device bytes
    pub peak_bytes: u64,
    /// Wall time of the run
    pub elapsed: Duration,
}

/// Replay a parsed trace `iterations` times against a fresh allocator
pub fn replay(
    playback: &PlaybackFile,
    config: AllocatorConfig,
    iterations: u32,
    overrides: PlaybackOverrides,
) -> Result<PlaybackReport, GpuAllocError> {
    let device = VirtualDevice::new();
    let allocator = ResourceAllocator::new(config, device.clone(), None)?;

    let mut report = PlaybackReport::default();
    let start = Instant::now();

    for iteration in 0..iterations.max(1) {
        let mut live = HashMap::new();
        for op in &playback.ops {
            match op {
                PlaybackOp::Create { descriptor, flags, recorded_id } => {
                    let mut flags = *flags;
                    flags.never_allocate |= overrides.never_allocate;
                    flags.never_sub_allocate |= overrides.force_standalone;

                    report.creates += 1;
                    match allocator.create_resource(descriptor, flags) {
                        Ok(allocation) => {
                            if recorded_id.is_none() && !overrides.never_allocate {
                                // Captured call failed but replay succeeded.
                                report.mismatches += 1;
                            }
                            if let Some(recorded) = recorded_id {
                                live.insert(*recorded, allocation);
                            } else {
                                allocator.destroy_resource(allocation)?;
                            }
                        }
                        Err(err) => {
                            tracing::debug!("replayed create failed: {}", err);
                            if recorded_id.is_some() && !overrides.never_allocate {
                                report.mismatches += 1;
                            }
                        }
                    }
                }
                PlaybackOp::Destroy { recorded_id } => {
                    report.destroys += 1;
                    match live.remove(recorded_id) {
                        Some(allocation) => allocator.destroy_resource(allocation)?,
                        None => {
                            // Destroy for an allocation the replay never
                            // produced; only a mismatch when unforced.
                            if !overrides.never_allocate && !overrides.force_standalone {
                                report.mismatches += 1;
                            }
                        }
                    }
                }
                PlaybackOp::Trim => allocator.trim(),
            }
        }

        // Anything the capture leaked stays live across iterations only if
        // the capture itself did; end each pass clean.
        for (_, allocation) in live.drain() {
            allocator.destroy_resource(allocation)?;
        }
        allocator.trim();
        tracing::debug!("playback iteration {} complete", iteration + 1);
    }

    report.elapsed = start.elapsed();
    report.backend_heaps_created = device.heaps_created();
    report.peak_bytes = device.peak_bytes();
    Ok(report)
}
