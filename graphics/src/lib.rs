//! # Tempo Graphics
//!
//! GPU command submission and resource lifetime core for real-time renderers.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`TimelineSemaphore`] / [`BinarySignal`] - GPU synchronization primitives
//! - [`TransferMemoryPool`] - ring-allocated host-visible memory for uploads
//! - [`FrameRing`] - N frames in flight with per-slot timelines
//! - [`CommandEncoder`] / [`CommandList`] - record once, submit once
//! - [`GarbageCollector`] - deferred destruction keyed on timeline values
//! - [`GraphicsDevice`] - the context object tying them together
//! - [`Renderer`] - the frame loop API on top
//! - Backends: Vulkan (`vulkan-backend` feature) and Dummy, an emulated
//!   asynchronous queue for testing
//!
//! ## Example
//!
//! ```ignore
//! use tempo_graphics::{Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::new(RendererConfig::new())?;
//! loop {
//!     let slot = renderer.acquire_next_slot().index();
//!     let encoder = renderer.record();
//!     // Record commands...
//!     renderer.submit(slot, encoder.complete())?;
//!     renderer.collect_garbage();
//! }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod gc;
pub mod profiling;
pub mod renderer;
pub mod resources;
pub mod surface;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuBackend};
pub use command::{Command, CommandEncoder, CommandList, PipelineBindPoint, PipelineHandle};
pub use config::{BackendType, DeviceDescriptor, RendererConfig};
pub use device::{DeviceCapabilities, GraphicsDevice, Submission, SubmissionIndex};
pub use error::{AllocationError, GraphicsError};
pub use frame::{FrameRing, FrameSlot};
pub use gc::{GarbageCollector, PendingDestruction, Resource};
pub use renderer::Renderer;
pub use resources::{BufferId, TransferAllocation, TransferMemoryPool};
pub use surface::{HeadlessSurface, PresentationSurface, SurfaceImage};
pub use sync::{BinarySignal, SignalState, TimelineSemaphore};
pub use types::{
    Access, AccessKind, BufferCopyRegion, BufferDescriptor, BufferUsage, PipelineStages,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// Starts the profiler client when the `profiling` feature is enabled.
pub fn init() {
    profiling::start();
    log::info!("Tempo Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
