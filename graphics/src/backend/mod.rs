//! GPU backend abstraction layer.
//!
//! This is the only place native API calls happen. The rest of the crate talks
//! to a backend through [`GpuBackend`], which covers exactly what the
//! submission core needs: buffers with host mappings, timeline and binary
//! semaphores, queue submission and idle waits.
//!
//! # Available Backends
//!
//! - `dummy` (always built): an emulated queue. Submissions run on a worker
//!   thread that performs copies and fills on host memory and then signals
//!   semaphores, so GPU/CPU overlap behaves like a real device.
//! - `vulkan-backend`: native Vulkan using ash and gpu-allocator.

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::ptr::NonNull;
use std::sync::Arc;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

use crate::command::PipelineHandle;
use crate::config::BackendType;
use crate::error::GraphicsError;
use crate::types::{Access, BufferCopyRegion, BufferDescriptor};

pub use dummy::DummyBackend;

/// Handle to a GPU buffer resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuBuffer {
    /// Dummy backend buffer backed by host memory.
    Dummy(Arc<dummy::HostMemory>),
    /// Vulkan backend buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        allocator: Arc<Mutex<Allocator>>,
        size: u64,
    },
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(memory) => f
                .debug_tuple("GpuBuffer::Dummy")
                .field(&memory.len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU timeline semaphore.
pub enum GpuTimeline {
    /// Dummy backend timeline, signalled by the emulated queue.
    Dummy(Arc<dummy::DummyTimeline>),
    /// Vulkan timeline semaphore
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(timeline) => f
                .debug_tuple("GpuTimeline::Dummy")
                .field(&timeline.value())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuTimeline::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU binary semaphore.
pub enum GpuSignal {
    /// Dummy backend (queue order already serializes everything)
    Dummy { id: u64 },
    /// Vulkan binary semaphore
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id } => f.debug_struct("GpuSignal::Dummy").field("id", id).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuSignal::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            allocator,
            ..
        } = self
        {
            if let Some(allocation) = allocation.lock().take()
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("Failed to free buffer allocation: {}", e);
            }
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTimeline {
    fn drop(&mut self) {
        if let GpuTimeline::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSignal {
    fn drop(&mut self) {
        if let GpuSignal::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

/// A command with every buffer reference resolved to its backend handle.
///
/// Buffers are held by `Arc` so a backend that executes asynchronously keeps
/// them alive until the work is done.
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Memory and execution dependency.
    Barrier { src: Access, dst: Access },
    /// Buffer to buffer copy.
    CopyBuffer {
        src: Arc<GpuBuffer>,
        dst: Arc<GpuBuffer>,
        region: BufferCopyRegion,
    },
    /// Fill a range with a repeated 32-bit value.
    FillBuffer {
        dst: Arc<GpuBuffer>,
        offset: u64,
        size: u64,
        value: u32,
    },
    /// Bind an externally created pipeline.
    BindPipeline(PipelineHandle),
    /// Non-indexed draw.
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    /// Compute dispatch.
    Dispatch { x: u32, y: u32, z: u32 },
}

/// One queue submission as seen by a backend.
#[derive(Debug, Default)]
pub struct SubmitBatch<'a> {
    /// Debug label of the submitted command list.
    pub label: Option<&'a str>,
    /// Commands in recording order.
    pub commands: Vec<BackendCommand>,
    /// Binary semaphores to wait on before execution.
    pub wait_signals: Vec<&'a GpuSignal>,
    /// Binary semaphores to signal on completion.
    pub signal_signals: Vec<&'a GpuSignal>,
    /// Timeline semaphores to signal on completion, with their new values.
    pub signal_timelines: Vec<(&'a GpuTimeline, u64)>,
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Get the persistent host mapping of a host-visible buffer.
    fn map_host_visible(&self, buffer: &GpuBuffer) -> Result<NonNull<u8>, GraphicsError>;

    /// Create a timeline semaphore starting at `initial_value`.
    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<GpuTimeline, GraphicsError>;

    /// Create a binary semaphore.
    fn create_binary_signal(&self) -> Result<GpuSignal, GraphicsError>;

    /// Read the device-visible value of a timeline (non-blocking).
    fn timeline_value(&self, timeline: &GpuTimeline) -> Result<u64, GraphicsError>;

    /// Block until a timeline reaches `value`.
    fn wait_timeline(&self, timeline: &GpuTimeline, value: u64) -> Result<(), GraphicsError>;

    /// Submit a batch of commands to the queue.
    fn submit(&self, batch: SubmitBatch<'_>) -> Result<(), GraphicsError>;

    /// Block until the queue has executed everything submitted so far.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}

/// Creates the backend requested by `backend`.
///
/// [`BackendType::Auto`] tries Vulkan first and falls back to the dummy
/// backend when no driver is available.
pub fn create_backend(
    backend: BackendType,
    validation: bool,
) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::new()))
        }
        BackendType::Vulkan => create_vulkan_backend(validation),
        BackendType::Auto => match create_vulkan_backend(validation) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
                log::info!("Using dummy backend");
                Ok(Arc::new(DummyBackend::new()))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan_backend(validation: bool) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    let backend = vulkan::VulkanBackend::new(validation)?;
    log::info!("Using Vulkan backend (ash)");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan_backend(_validation: bool) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    Err(GraphicsError::FeatureNotSupported(
        "built without the vulkan-backend feature".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}
