//! Common utilities for submission integration tests.
//!
//! Tests are parameterized over [`Backend`]; backends that are not compiled
//! in or have no driver on this machine are skipped.

use std::sync::Arc;

use tempo_graphics::{
    Access, BackendType, BufferDescriptor, BufferId, BufferUsage, DeviceDescriptor,
    GraphicsDevice, Renderer, RendererConfig, Submission,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Emulated queue on a worker thread.
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::Vulkan => tempo_graphics::backend::has_gpu_backend(),
        }
    }

    /// Device parameters selecting this backend.
    pub fn to_device_descriptor(self) -> DeviceDescriptor {
        let backend = match self {
            Backend::Dummy => BackendType::Dummy,
            Backend::Vulkan => BackendType::Vulkan,
        };
        DeviceDescriptor::new()
            .with_label(format!("test_{:?}", self).to_lowercase())
            .with_backend(backend)
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A device plus helpers for common test operations.
pub struct TestContext {
    /// The backend being tested.
    #[allow(dead_code)]
    pub backend: Backend,
    /// Graphics device for creating resources.
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        if !backend.is_available() {
            return None;
        }

        let _ = env_logger::builder().is_test(true).try_init();

        let device = match GraphicsDevice::new(&backend.to_device_descriptor()) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("Backend {:?} failed to initialize: {}", backend, e);
                return None;
            }
        };

        Some(Self { backend, device })
    }

    /// Create a renderer sharing this context's device.
    #[allow(dead_code)]
    pub fn renderer(&self, frames_in_flight: usize, pool_capacity: u64) -> Renderer {
        Renderer::with_device(
            Arc::clone(&self.device),
            RendererConfig::new()
                .with_frames_in_flight(frames_in_flight)
                .with_transfer_pool_capacity(pool_capacity),
        )
        .expect("Failed to create renderer")
    }

    /// Create a host-readable buffer for copy destinations.
    #[allow(dead_code)]
    pub fn create_readback_buffer(&self, size: u64) -> BufferId {
        self.device
            .create_buffer(&BufferDescriptor::readback(size).with_label("readback"))
            .expect("Failed to create readback buffer")
    }

    /// Create a device-local buffer.
    #[allow(dead_code)]
    pub fn create_gpu_buffer(&self, size: u64, usage: BufferUsage) -> BufferId {
        self.device
            .create_buffer(
                &BufferDescriptor::new(size, usage | BufferUsage::COPY_SRC | BufferUsage::COPY_DST)
                    .with_label("gpu"),
            )
            .expect("Failed to create GPU buffer")
    }

    /// Submit a list making transfer writes visible to the host, and wait for it.
    #[allow(dead_code)]
    pub fn flush_to_host(&self) {
        let mut encoder = self.device.create_command_encoder().with_label("flush_to_host");
        encoder.pipeline_barrier(Access::TRANSFER_WRITE, Access::HOST_READ);
        let index = self
            .device
            .submit(Submission::new(encoder.complete()))
            .expect("Failed to submit flush");
        self.device.wait_for_submission(index);
    }

    /// Read `len` bytes of a host-visible buffer.
    #[allow(dead_code)]
    pub fn read_bytes(&self, buffer: BufferId, offset: u64, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.device
            .read_buffer(buffer, offset, &mut bytes)
            .expect("Failed to read buffer");
        bytes
    }

    /// Read `count` 32-bit words of a host-visible buffer.
    #[allow(dead_code)]
    pub fn read_words(&self, buffer: BufferId, offset: u64, count: usize) -> Vec<u32> {
        let mut words = vec![0u32; count];
        self.device
            .read_buffer(buffer, offset, bytemuck::cast_slice_mut(&mut words))
            .expect("Failed to read buffer");
        words
    }
}

/// Generate a deterministic test pattern.
#[allow(dead_code)]
pub fn generate_test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}
