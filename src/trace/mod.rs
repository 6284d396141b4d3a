//! Allocation event trace
//!
//! Optional recording of allocator activity into a chrome-tracing
//! compatible file: object lifecycle, per-call instants, counters and
//! duration pairs. Records are buffered in per-thread rings so the hot path
//! never takes the writer lock except when a ring fills; an explicit flush
//! merges and writes the file as a top-level `traceEvents` array with one
//! record per line.
//!
//! Recording is process-global and off by default. The playback harness
//! replays the `Call` records written here.

use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Events buffered per thread before the ring spills to the shared writer
const RING_CAPACITY: usize = 256;

/// Severity threshold for diagnostic message records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RecordLevel {
    /// Record everything
    Debug = 0,
    /// Informational and above (default)
    #[default]
    Info = 1,
    /// Warnings and errors only
    Warn = 2,
    /// Errors only
    Error = 3,
}

impl RecordLevel {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(RecordLevel::Debug),
            "info" => Some(RecordLevel::Info),
            "warn" | "warning" => Some(RecordLevel::Warn),
            "error" => Some(RecordLevel::Error),
            _ => None,
        }
    }
}

/// Trace recording configuration
#[derive(Debug, Clone)]
pub struct RecordOptions {
    /// Output file path
    pub trace_file: PathBuf,
    /// Minimum severity for diagnostic message records
    pub min_level: RecordLevel,
    /// Drop DurationBegin/DurationEnd records
    pub skip_duration_events: bool,
    /// Drop ObjectNew/ObjectDestroy/ObjectSnapshot records
    pub skip_object_events: bool,
    /// Drop Call and Counter records
    pub skip_instant_events: bool,
}

impl Default for RecordOptions {
    fn default() -> Self {
        RecordOptions {
            trace_file: PathBuf::from("vramforge_trace.json"),
            min_level: RecordLevel::Info,
            skip_duration_events: false,
            skip_object_events: false,
            skip_instant_events: false,
        }
    }
}

/// Kinds of records the allocator emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEventPhase {
    /// An object (allocator, heap, allocation) came into existence
    ObjectNew,
    /// An object was destroyed
    ObjectDestroy,
    /// Full state snapshot of an object
    ObjectSnapshot,
    /// A named call with its arguments
    Call,
    /// A named numeric counter sample
    Counter,
    /// Start of a timed span
    DurationBegin,
    /// End of a timed span
    DurationEnd,
}

impl TraceEventPhase {
    /// Chrome tracing phase letter
    pub fn letter(self) -> char {
        match self {
            TraceEventPhase::ObjectNew => 'N',
            TraceEventPhase::ObjectDestroy => 'D',
            TraceEventPhase::ObjectSnapshot => 'O',
            TraceEventPhase::Call => 'i',
            TraceEventPhase::Counter => 'C',
            TraceEventPhase::DurationBegin => 'B',
            TraceEventPhase::DurationEnd => 'E',
        }
    }
}

/// One buffered record
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Record kind
    pub phase: TraceEventPhase,
    /// Record name, e.g. `ResourceAllocator.CreateResource`
    pub name: String,
    /// Timestamp in microseconds since recording started
    pub timestamp_us: u64,
    /// Thread the record was produced on
    pub tid: u64,
    /// Object id for object records
    pub id: Option<u64>,
    /// Arbitrary key-value arguments
    pub args: Option<serde_json::Value>,
}

/// On-disk shape of a record, chrome-tracing compatible
#[derive(Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Record name
    pub name: String,
    /// Category; `default` for all allocator records
    pub cat: String,
    /// Phase letter
    pub ph: String,
    /// Timestamp in microseconds
    pub ts: u64,
    /// Process id
    pub pid: u32,
    /// Thread id
    pub tid: u64,
    /// Object id, hex-encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Arguments map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug)]
struct TraceState {
    options: Option<RecordOptions>,
    merged: Vec<TraceEvent>,
}

static ENABLED: AtomicBool = AtomicBool::new(false);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(RecordLevel::Info as u8);
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// Timestamps are relative to the first record of the process; taking them
/// from a shared epoch keeps the hot path lock-free.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

static TRACE: Lazy<Mutex<TraceState>> = Lazy::new(|| {
    Mutex::new(TraceState {
        options: None,
        merged: Vec::new(),
    })
});

thread_local! {
    static RING: RefCell<Vec<TraceEvent>> = RefCell::new(Vec::with_capacity(RING_CAPACITY));
    static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

/// Begin recording with the given options
///
/// Re-configuring while enabled flushes the previous session first.
pub fn startup_event_trace(options: RecordOptions) {
    flush_event_trace();
    Lazy::force(&EPOCH);
    let mut state = TRACE.lock().unwrap();
    MIN_LEVEL.store(options.min_level as u8, Ordering::Relaxed);
    state.options = Some(options);
    state.merged.clear();
    ENABLED.store(true, Ordering::Release);
}

/// Whether recording is active
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Stop recording, flushing buffered records to disk
pub fn shutdown_event_trace() {
    flush_event_trace();
    ENABLED.store(false, Ordering::Release);
    TRACE.lock().unwrap().options = None;
}

fn record(phase: TraceEventPhase, name: &str, id: Option<u64>, args: Option<serde_json::Value>) {
    if !is_enabled() {
        return;
    }
    let timestamp_us = EPOCH.elapsed().as_micros() as u64;
    let tid = TID.with(|tid| *tid);
    let event = TraceEvent {
        phase,
        name: name.to_string(),
        timestamp_us,
        tid,
        id,
        args,
    };
    let spill = RING.with(|ring| {
        let mut ring = ring.borrow_mut();
        ring.push(event);
        ring.len() >= RING_CAPACITY
    });
    if spill {
        merge_thread_ring();
    }
}

fn merge_thread_ring() {
    let drained: Vec<TraceEvent> = RING.with(|ring| ring.borrow_mut().drain(..).collect());
    if drained.is_empty() {
        return;
    }
    TRACE.lock().unwrap().merged.extend(drained);
}

/// Record an object creation
pub fn object_new(name: &str, id: u64) {
    record(TraceEventPhase::ObjectNew, name, Some(id), None);
}

/// Record an object destruction
pub fn object_destroy(name: &str, id: u64) {
    record(TraceEventPhase::ObjectDestroy, name, Some(id), None);
}

/// Record a full object snapshot with arguments
pub fn object_snapshot(name: &str, id: u64, args: serde_json::Value) {
    record(TraceEventPhase::ObjectSnapshot, name, Some(id), Some(args));
}

/// Record a named call and its arguments
pub fn call(name: &str, args: serde_json::Value) {
    record(TraceEventPhase::Call, name, None, Some(args));
}

/// Record a counter sample
pub fn counter(name: &str, value: i64) {
    record(TraceEventPhase::Counter, name, None, Some(serde_json::json!({ "value": value })));
}

/// Record the start of a timed span
pub fn duration_begin(name: &str) {
    record(TraceEventPhase::DurationBegin, name, None, None);
}

/// Record the end of a timed span
pub fn duration_end(name: &str) {
    record(TraceEventPhase::DurationEnd, name, None, None);
}

/// Record a diagnostic message, subject to the configured minimum level
pub fn message(level: RecordLevel, name: &str, text: &str) {
    if (level as u8) < MIN_LEVEL.load(Ordering::Relaxed) {
        return;
    }
    record(TraceEventPhase::Call, name, None, Some(serde_json::json!({ "message": text })));
}

/// Merge the calling thread's ring and write every buffered record to the
/// trace file
///
/// Rings owned by other threads spill on their own once full; the writer
/// merges whatever has spilled so far.
pub fn flush_event_trace() {
    if !is_enabled() {
        return;
    }
    merge_thread_ring();

    let mut state = TRACE.lock().unwrap();
    let Some(options) = state.options.clone() else {
        return;
    };
    if state.merged.is_empty() {
        return;
    }
    state.merged.sort_by_key(|event| event.timestamp_us);

    let pid = std::process::id();
    let records: Vec<String> = state
        .merged
        .iter()
        .filter(|event| {
            match event.phase {
                TraceEventPhase::DurationBegin | TraceEventPhase::DurationEnd => !options.skip_duration_events,
                TraceEventPhase::ObjectNew | TraceEventPhase::ObjectDestroy | TraceEventPhase::ObjectSnapshot => {
                    !options.skip_object_events
                }
                TraceEventPhase::Call | TraceEventPhase::Counter => !options.skip_instant_events,
            }
        })
        .map(|event| {
            let record = TraceRecord {
                name: event.name.clone(),
                cat: "default".to_string(),
                ph: event.phase.letter().to_string(),
                ts: event.timestamp_us,
                pid,
                tid: event.tid,
                id: event.id.map(|id| format!("{:#x}", id)),
                args: event.args.clone(),
            };
            serde_json::to_string(&record).expect("trace record serialization cannot fail")
        })
        .collect();

    let write_result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&options.trace_file)?;
        writeln!(file, "{{\"traceEvents\": [")?;
        for (index, line) in records.iter().enumerate() {
            if index + 1 < records.len() {
                writeln!(file, "{},", line)?;
            } else {
                writeln!(file, "{}", line)?;
            }
        }
        writeln!(file, "]}}")?;
        file.flush()
    })();

    if let Err(err) = write_result {
        tracing::warn!("failed to write trace file {:?}: {}", options.trace_file, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_disabled_recording_is_noop() {
        shutdown_event_trace();
        call("ResourceAllocator.CreateResource", serde_json::json!({ "size": 1024 }));
        assert!(!is_enabled());
    }

    #[test]
    #[serial]
    fn test_trace_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        startup_event_trace(RecordOptions {
            trace_file: path.clone(),
            ..RecordOptions::default()
        });

        object_new("Heap", 7);
        call("ResourceAllocator.CreateResource", serde_json::json!({ "size": 4096, "alignment": 256 }));
        counter("pool_heap_reuses", 3);
        object_destroy("Heap", 7);
        flush_event_trace();
        shutdown_event_trace();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let events = parsed["traceEvents"].as_array().unwrap();

        // Other unit tests may record incidental events while this session
        // is live; assert on our own records by name.
        let created = events
            .iter()
            .find(|event| event["ph"] == "N" && event["name"] == "Heap")
            .expect("heap creation record missing");
        assert_eq!(created["id"], "0x7");
        let call = events
            .iter()
            .find(|event| event["ph"] == "i" && event["name"] == "ResourceAllocator.CreateResource")
            .expect("call record missing");
        assert_eq!(call["args"]["size"], 4096);
        assert_eq!(call["args"]["alignment"], 256);
        assert!(events.iter().any(|event| event["ph"] == "C" && event["name"] == "pool_heap_reuses"));
        assert!(events.iter().any(|event| event["ph"] == "D" && event["name"] == "Heap"));
        for event in events {
            assert_eq!(event["cat"], "default");
            assert!(event["ts"].is_u64());
            assert!(event["pid"].is_u64());
        }
    }

    #[test]
    #[serial]
    fn test_object_events_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        startup_event_trace(RecordOptions {
            trace_file: path.clone(),
            skip_object_events: true,
            ..RecordOptions::default()
        });

        object_new("Heap", 1);
        call("ResourceAllocator.CreateResource", serde_json::json!({}));
        flush_event_trace();
        shutdown_event_trace();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let events = parsed["traceEvents"].as_array().unwrap();
        assert!(events.iter().all(|event| event["ph"] != "N" && event["ph"] != "D" && event["ph"] != "O"));
        assert!(events
            .iter()
            .any(|event| event["ph"] == "i" && event["name"] == "ResourceAllocator.CreateResource"));
    }

    #[test]
    #[serial]
    fn test_message_level_gating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        startup_event_trace(RecordOptions {
            trace_file: path.clone(),
            min_level: RecordLevel::Warn,
            ..RecordOptions::default()
        });

        message(RecordLevel::Debug, "ResourceAllocator.Message", "dropped");
        message(RecordLevel::Error, "ResourceAllocator.Message", "kept");
        flush_event_trace();
        shutdown_event_trace();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let events = parsed["traceEvents"].as_array().unwrap();
        let messages: Vec<_> = events
            .iter()
            .filter(|event| event["name"] == "ResourceAllocator.Message")
            .collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["args"]["message"], "kept");
    }
}
