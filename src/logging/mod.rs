//! Logging configuration and initialization
//!
//! Centralized logging setup using the `tracing` ecosystem. Supports both
//! human-readable and JSON output, configurable via environment variables or
//! programmatically.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "info", "debug,vramforge=trace")
//! - `VRAMFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `VRAMFORGE_LOG_FORMAT`: Output format ("human" or "json")

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Global flag to track if tracing has been initialized
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Environment variable for log level override
const LOG_LEVEL_ENV: &str = "VRAMFORGE_LOG_LEVEL";

/// Environment variable for log format (json/human)
const LOG_FORMAT_ENV: &str = "VRAMFORGE_LOG_FORMAT";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Invalid log level string provided
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Invalid log format string provided
    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),
}

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl LogLevel {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to EnvFilter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable colored output (default)
    #[default]
    Human,
    /// JSON structured output
    Json,
}

impl LogFormat {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log level to use
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Build a configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self, LoggingError> {
        let mut config = LoggingConfig::default();

        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            config.level = LogLevel::from_str(&level).ok_or(LoggingError::InvalidLogLevel(level))?;
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = LogFormat::from_str(&format).ok_or(LoggingError::InvalidLogFormat(format))?;
        }
        Ok(config)
    }
}

/// Initialize tracing once for the whole process
///
/// Safe to call multiple times; only the first call installs a subscriber.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let mut result = Ok(());
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("vramforge={}", config.level.as_filter_str())));

        let registry = tracing_subscriber::registry().with(filter);
        let installed = match config.format {
            LogFormat::Human => registry.with(fmt::layer().with_target(false)).try_init(),
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        };
        if installed.is_err() {
            // Another subscriber won the race; logging still works.
            tracing::debug!("tracing subscriber already installed");
        }
        result = Ok(());
    });
    result
}

/// Initialize logging from environment variables, falling back to defaults
/// when unset or invalid
pub fn init_from_env() {
    let config = LoggingConfig::from_env().unwrap_or_else(|err| {
        eprintln!("vramforge logging: {}; using defaults", err);
        LoggingConfig::default()
    });
    let _ = init_logging(&config);
    tracing::debug!("logging initialized: {:?} {:?}", config.level, config.format);
}
