//! Unified error handling for vramforge
//!
//! This module provides a centralized error type for the allocation engine.
//! It implements error categorization for:
//! - User errors (invalid requests, never retryable with the same arguments)
//! - Capacity errors (out of memory, retryable after a release or with
//!   different placement flags)
//! - Backend errors (device/driver failures, opaque passthrough)
//! - Contract violations (bugs such as double-free; assert in debug builds,
//!   leak in release builds)

use thiserror::Error;

/// Unified error type for vramforge
///
/// Every fallible public operation returns this type. Sub-allocators
/// themselves communicate capacity exhaustion by returning `None`; the root
/// allocator converts the final outcome into one of these variants.
#[derive(Debug, Error)]
pub enum GpuAllocError {
    /// Input violates the request contract (zero size, non-power-of-two
    /// alignment, incompatible heap kind). Never retry with the same
    /// arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Capacity exhausted. The caller may retry with different flags or
    /// after releasing idle memory.
    #[error("out of memory")]
    OutOfMemory,

    /// The device backend returned an error. The code is passed through
    /// verbatim and is meaningful only to the backend.
    #[error("backend failure (code {0})")]
    BackendFailure(i32),

    /// Programming bug: double-free, deallocation through the wrong
    /// allocator, or releasing memory with live blocks.
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

/// Coarse classification used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller error, not retryable
    User,
    /// Capacity error, retryable
    Capacity,
    /// Device/driver error
    Backend,
    /// Internal bug
    Internal,
}

impl GpuAllocError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            GpuAllocError::InvalidArgument(_) => ErrorCategory::User,
            GpuAllocError::OutOfMemory => ErrorCategory::Capacity,
            GpuAllocError::BackendFailure(_) => ErrorCategory::Backend,
            GpuAllocError::ContractViolation(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error may succeed on retry (after a trim or with
    /// different allocation flags)
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Capacity)
    }
}

/// Result type used throughout the crate
pub type AllocResult<T> = Result<T, GpuAllocError>;
