//! Graphics error types.
//!
//! Two classes of failure are surfaced as values: [`GraphicsError`] for
//! device and resource creation problems, and [`AllocationError`] for
//! transfer pool exhaustion, which callers are expected to recover from.
//! Protocol violations (resubmission, non-monotonic timeline values, waiting
//! on values that were never scheduled) are programming errors and panic.

use thiserror::Error;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// The surface is outdated and needs to be reconfigured.
    #[error("surface outdated, needs reconfiguration")]
    SurfaceOutdated,
}

/// Failure to allocate from a [`TransferMemoryPool`].
///
/// [`TransferMemoryPool`]: crate::resources::TransferMemoryPool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AllocationError {
    /// Not enough contiguous space is free until the GPU catches up.
    #[error("transfer pool exhausted: requested {requested} bytes, {available} bytes free")]
    Exhausted {
        /// Bytes requested.
        requested: u64,
        /// Bytes not claimed by in-flight allocations.
        available: u64,
    },
    /// The request can never be satisfied by this pool.
    #[error("allocation of {requested} bytes exceeds transfer pool capacity of {capacity} bytes")]
    ExceedsCapacity {
        /// Bytes requested.
        requested: u64,
        /// Total pool capacity.
        capacity: u64,
    },
    /// The alignment is zero or not a power of two.
    #[error("alignment must be a non-zero power of 2, got {0}")]
    InvalidAlignment(u64),
}

impl AllocationError {
    /// Whether retrying after the GPU has progressed may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_allocation_error_display() {
        let err = AllocationError::Exhausted {
            requested: 68,
            available: 32,
        };
        assert_eq!(
            err.to_string(),
            "transfer pool exhausted: requested 68 bytes, 32 bytes free"
        );
        assert!(err.is_retryable());

        let err = AllocationError::ExceedsCapacity {
            requested: 512,
            capacity: 256,
        };
        assert!(!err.is_retryable());
    }
}
