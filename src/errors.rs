//! Error types.
//!
//! [`BackendError`] is what a backend reports about itself; [`StreamError`] is what the harness
//! surfaces to its caller, enriched with the context (backend, kernel, iteration) needed to
//! diagnose a failure without re-running the benchmark.

use crate::{perf_report::KernelKind, validation::ValidationError};

use std::fmt;

use thiserror::Error;

/// Result type of the backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors reported by a backend kernel provider.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The arrays could not be allocated.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The execution technology or the selected device is not available.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A kernel launch or a synchronization failed.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl BackendError {
    pub fn allocation(e: impl fmt::Display) -> Self {
        Self::Allocation(e.to_string())
    }

    pub fn unavailable(e: impl fmt::Display) -> Self {
        Self::Unavailable(e.to_string())
    }

    pub fn execution(e: impl fmt::Display) -> Self {
        Self::Execution(e.to_string())
    }
}

/// Errors surfaced by the benchmark harness.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Buffer or device memory unavailable at construction.
    #[error("could not allocate 3 x {array_size} elements on backend `{backend}`: {reason}")]
    Allocation {
        backend: String,
        array_size: usize,
        reason: String,
    },

    /// Execution technology or device missing.
    #[error("backend `{backend}` is unavailable: {reason}")]
    DeviceUnavailable { backend: String, reason: String },

    /// Filling the arrays with their start values failed.
    #[error("failed to initialize the arrays on backend `{backend}`: {reason}")]
    Initialization { backend: String, reason: String },

    /// A kernel call failed; timings of the previous iterations are still reported.
    #[error("kernel `{kernel}` failed at iteration {iteration}: {reason}")]
    KernelExecution {
        kernel: KernelKind,
        iteration: usize,
        reason: String,
    },

    /// Arrays could not be copied back for validation.
    #[error("failed to read the arrays back: {reason}")]
    Readback { reason: String },

    /// Final array contents deviate from the expected values.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Invalid run configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Report could not be written.
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Wraps a construction-time backend error with the backend name and requested size.
    pub fn from_construction(backend: impl fmt::Display, array_size: usize, e: BackendError) -> Self {
        match e {
            BackendError::Allocation(reason) => Self::Allocation {
                backend: backend.to_string(),
                array_size,
                reason,
            },
            BackendError::Unavailable(reason) | BackendError::Execution(reason) => {
                Self::DeviceUnavailable {
                    backend: backend.to_string(),
                    reason,
                }
            }
        }
    }

    /// Wraps an `init_arrays` error with the backend name and requested size.
    pub fn from_init(backend: impl fmt::Display, array_size: usize, e: BackendError) -> Self {
        match e {
            BackendError::Execution(reason) => Self::Initialization {
                backend: backend.to_string(),
                reason,
            },
            e => Self::from_construction(backend, array_size, e),
        }
    }

    /// Wraps a kernel-time backend error with the failing kernel and iteration.
    pub fn from_kernel(kernel: KernelKind, iteration: usize, e: BackendError) -> Self {
        Self::KernelExecution {
            kernel,
            iteration,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_errors_keep_their_kind() {
        let e = StreamError::from_construction("rayon", 0, BackendError::allocation("empty"));
        assert!(matches!(e, StreamError::Allocation { array_size: 0, .. }));

        let e = StreamError::from_construction("cuda", 8, BackendError::unavailable("no GPU"));
        assert!(matches!(e, StreamError::DeviceUnavailable { .. }));
        assert_eq!(e.to_string(), "backend `cuda` is unavailable: no GPU");
    }

    #[test]
    fn init_errors_name_the_initialization() {
        let e = StreamError::from_init("opencl", 8, BackendError::execution("enqueue failed"));
        assert_eq!(
            e.to_string(),
            "failed to initialize the arrays on backend `opencl`: enqueue failed"
        );
        let e = StreamError::from_init("cuda", 8, BackendError::allocation("out of memory"));
        assert!(matches!(e, StreamError::Allocation { array_size: 8, .. }));
    }

    #[test]
    fn kernel_error_names_kernel_and_iteration() {
        let e = StreamError::from_kernel(KernelKind::Triad, 7, BackendError::execution("boom"));
        assert_eq!(
            e.to_string(),
            "kernel `triad` failed at iteration 7: execution failed: boom"
        );
    }
}
