//! Playback harness for captured allocation traces
//!
//! Replays the `CreateResource`/`DestroyResource` calls of a recorded trace
//! against a freshly built allocator over the virtual device and reports
//! allocator efficiency. Exit codes: 0 on success, 1 when the trace cannot
//! be parsed, 2 when the replayed outcomes diverge from the capture.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use vramforge::logging;
use vramforge::replay::{self, PlaybackFile, PlaybackOverrides};
use vramforge::resource::{AllocatorConfig, AllocatorProfile};
use vramforge::trace::{RecordLevel, RecordOptions};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    /// Library defaults
    Default,
    /// Prefetch and pooling tuned for throughput
    MaxPerf,
    /// Minimal footprint: on-demand heaps, no caches
    LowMem,
    /// Configuration captured inside the trace
    Captured,
}

impl From<ProfileArg> for AllocatorProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Default => AllocatorProfile::Default,
            ProfileArg::MaxPerf => AllocatorProfile::MaxPerf,
            ProfileArg::LowMem => AllocatorProfile::LowMem,
            ProfileArg::Captured => AllocatorProfile::Captured,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "vramforge-cli", version)]
#[command(about = "Replay captured GPU allocation traces", long_about = None)]
struct Cli {
    /// Trace file to replay
    #[arg(long)]
    playback_file: PathBuf,

    /// Number of times to replay the whole trace
    #[arg(long, default_value_t = 1)]
    iterations: u32,

    /// Allocator tuning profile
    #[arg(long, value_enum, default_value = "default")]
    profile: ProfileArg,

    /// Minimum severity for recorded diagnostic messages
    #[arg(long, default_value = "info")]
    record_level: String,

    /// Force never_allocate on every replayed call
    #[arg(long)]
    never_allocate: bool,

    /// Force one heap per resource on every replayed call
    #[arg(long)]
    force_standalone: bool,
}

fn main() -> ExitCode {
    logging::init_from_env();
    let cli = Cli::parse();

    let Some(record_level) = RecordLevel::from_str(&cli.record_level) else {
        eprintln!("unknown record level: {}", cli.record_level);
        return ExitCode::from(1);
    };

    let playback = match PlaybackFile::parse(&cli.playback_file) {
        Ok(playback) => playback,
        Err(err) => {
            eprintln!("failed to load {}: {}", cli.playback_file.display(), err);
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        "loaded {} operations from {}",
        playback.ops.len(),
        cli.playback_file.display()
    );

    let profile: AllocatorProfile = cli.profile.into();
    let config = match profile {
        AllocatorProfile::Captured => match playback.captured_config.clone() {
            Some(config) => config,
            None => {
                eprintln!("trace carries no captured configuration; falling back to defaults");
                AllocatorConfig::default()
            }
        },
        other => AllocatorConfig::for_profile(other),
    };

    // Re-record the replay run next to the input so divergence can be
    // diffed against the capture.
    let config = config.with_record_options(RecordOptions {
        trace_file: cli.playback_file.with_extension("replay.json"),
        min_level: record_level,
        ..RecordOptions::default()
    });

    let overrides = PlaybackOverrides {
        never_allocate: cli.never_allocate,
        force_standalone: cli.force_standalone,
    };

    let report = match replay::replay(&playback, config, cli.iterations, overrides) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("replay aborted: {}", err);
            return ExitCode::from(2);
        }
    };

    println!("replayed {} creates / {} destroys in {:?}", report.creates, report.destroys, report.elapsed);
    println!("backend heaps created: {}", report.backend_heaps_created);
    println!("peak device bytes:     {}", report.peak_bytes);
    println!("mismatches:            {}", report.mismatches);

    if report.mismatches > 0 {
        eprintln!("playback diverged from capture");
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
