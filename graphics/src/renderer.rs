//! The caller-facing renderer.
//!
//! [`Renderer`] ties the components together: one device, one frame ring and
//! one transfer pool. A frame looks like this:
//!
//! ```text
//! acquire_next_slot()          wait until the slot's previous work is done
//!        │
//!        ▼
//! allocate_transfer() + record()   stream data, record commands
//!        │
//!        ▼
//! submit(slot, list)           signal slot + transfer pool timelines
//!        │
//!        ▼
//! present(surface, image)      optional, consumes the slot's signal
//!        │
//!        ▼
//! collect_garbage()            release resources the GPU is done with
//! ```
//!
//! # Teardown
//!
//! Fields drop in reverse construction order: the ring waits for the GPU,
//! the pool hands its buffer to deferred destruction, and the last device
//! reference flushes everything.

use std::sync::Arc;

use crate::command::{CommandEncoder, CommandList};
use crate::config::RendererConfig;
use crate::device::{GraphicsDevice, SubmissionIndex};
use crate::error::{AllocationError, GraphicsError};
use crate::frame::{FrameRing, FrameSlot};
use crate::gc::Resource;
use crate::profiling::{frame_mark, profile_scope};
use crate::resources::{TransferAllocation, TransferMemoryPool};
use crate::surface::{PresentationSurface, SurfaceImage};

/// Frame loop driver owning a device, a frame ring and a transfer pool.
///
/// # Example
///
/// ```ignore
/// let mut renderer = Renderer::new(RendererConfig::new().with_frames_in_flight(2))?;
///
/// loop {
///     let slot = renderer.acquire_next_slot().index();
///
///     let mut staging = renderer.allocate_transfer(64, 16)?;
///     staging.write_pod(&uniforms);
///     let mut encoder = renderer.record();
///     encoder.copy_from_transfer(&staging, uniform_buffer, 0);
///
///     renderer.submit(slot, encoder.complete())?;
///     renderer.collect_garbage();
/// }
/// ```
pub struct Renderer {
    ring: FrameRing,
    transfer_pool: TransferMemoryPool,
    config: RendererConfig,
    device: Arc<GraphicsDevice>,
}

impl Renderer {
    /// Create a renderer and its device.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the device or its
    /// resources cannot be created.
    pub fn new(config: RendererConfig) -> Result<Self, GraphicsError> {
        config.validate()?;
        let device = GraphicsDevice::new(&config.device)?;
        Self::with_device(device, config)
    }

    /// Create a renderer on an existing device.
    pub fn with_device(
        device: Arc<GraphicsDevice>,
        config: RendererConfig,
    ) -> Result<Self, GraphicsError> {
        config.validate()?;

        let ring = FrameRing::new(&device, config.frames_in_flight)?;
        let transfer_pool = TransferMemoryPool::new(
            &device,
            config.transfer_pool_capacity,
            &config.transfer_pool_label,
        )?;

        log::info!(
            "Renderer ready on {} ({} frames in flight, {} byte transfer pool)",
            device.name(),
            config.frames_in_flight,
            config.transfer_pool_capacity
        );

        Ok(Self {
            ring,
            transfer_pool,
            config,
            device,
        })
    }

    /// Rotate to the next frame slot, waiting until the GPU is done with it.
    pub fn acquire_next_slot(&mut self) -> &FrameSlot {
        self.ring.acquire_next_slot()
    }

    /// Allocate transfer memory for this frame.
    ///
    /// Released once the next [`submit`](Self::submit) has completed.
    pub fn allocate_transfer(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<TransferAllocation<'_>, AllocationError> {
        self.transfer_pool.allocate(size, alignment)
    }

    /// Start recording commands.
    pub fn record(&self) -> CommandEncoder {
        self.device.create_command_encoder()
    }

    /// Submit `list` with the current slot.
    ///
    /// Transfer allocations made since the previous submit are released when
    /// this submission completes.
    pub fn submit(&mut self, slot: usize, list: CommandList) -> Result<SubmissionIndex, GraphicsError> {
        profile_scope!("renderer_submit");
        let (timeline, value) = self.transfer_pool.submission_signal();
        let index = self.ring.submit_with_slot(slot, list, &[(&timeline, value)])?;
        frame_mark!();
        Ok(index)
    }

    /// Present `image` after the current slot's submission completes.
    ///
    /// # Panics
    ///
    /// Panics if the current slot was not submitted since it was last presented.
    pub fn present(
        &mut self,
        surface: &mut dyn PresentationSurface,
        image: SurfaceImage,
    ) -> Result<(), GraphicsError> {
        let slot = self.ring.current_slot();
        let signal = slot.completion_signal();
        assert!(
            signal.is_armed(),
            "present of slot {} without a submission signalling it",
            slot.index()
        );
        surface.present(image, signal)
    }

    /// Destroy `resource` once every submission issued so far has completed.
    pub fn destroy(&self, resource: Resource) {
        self.device.destroy(resource);
    }

    /// Release everything the GPU is done with. Never blocks.
    ///
    /// Returns the number of released resources.
    pub fn collect_garbage(&self) -> usize {
        self.transfer_pool.collect();
        self.device.collect_garbage()
    }

    /// Wait for all submitted work to complete.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.ring.wait_idle();
        self.device.wait_idle()
    }

    /// The device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// The transfer pool.
    pub fn transfer_pool(&self) -> &TransferMemoryPool {
        &self.transfer_pool
    }

    /// The frame ring.
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Configuration the renderer was created with.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::debug!(
            "Shutting down renderer after {} frames",
            self.ring.frame_count()
        );
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during renderer teardown: {}", e);
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("device", &self.device.name())
            .field("ring", &self.ring)
            .field("transfer_pool", &self.transfer_pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendType, DeviceDescriptor};
    use crate::surface::HeadlessSurface;
    use crate::types::BufferDescriptor;

    fn create_test_renderer(frames_in_flight: usize) -> Renderer {
        Renderer::new(
            RendererConfig::new()
                .with_frames_in_flight(frames_in_flight)
                .with_transfer_pool_capacity(1024)
                .with_device(DeviceDescriptor::new().with_backend(BackendType::Dummy)),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Renderer::new(
            RendererConfig::new()
                .with_frames_in_flight(0)
                .with_device(DeviceDescriptor::new().with_backend(BackendType::Dummy)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_frames_stream_data() {
        let mut renderer = create_test_renderer(2);
        let result = renderer
            .device()
            .create_buffer(&BufferDescriptor::readback(4 * 8))
            .unwrap();

        for frame in 0..8u32 {
            let slot = renderer.acquire_next_slot().index();
            let mut encoder = renderer.record();
            {
                let mut staging = renderer.allocate_transfer(4, 4).unwrap();
                staging.write_pod(&[frame * 10]);
                encoder.copy_from_transfer(&staging, result, u64::from(frame) * 4);
            }
            renderer.submit(slot, encoder.complete()).unwrap();
            renderer.collect_garbage();
        }

        renderer.wait_idle().unwrap();
        let mut values = [0u32; 8];
        renderer
            .device()
            .read_buffer(result, 0, bytemuck::cast_slice_mut(&mut values))
            .unwrap();
        assert_eq!(values, [0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_transfer_memory_reclaimed_after_submit() {
        let mut renderer = create_test_renderer(2);

        let slot = renderer.acquire_next_slot().index();
        renderer.allocate_transfer(512, 4).unwrap();
        let list = renderer.record().complete();
        renderer.submit(slot, list).unwrap();

        renderer.wait_idle().unwrap();
        renderer.collect_garbage();
        assert_eq!(renderer.transfer_pool().claimed(), 0);
    }

    #[test]
    fn test_present_consumes_slot_signal() {
        let mut renderer = create_test_renderer(2);
        let mut surface = HeadlessSurface::new(renderer.device(), 3);

        for _ in 0..4 {
            let slot = renderer.acquire_next_slot().index();
            let image = surface.acquire_next_image().unwrap();
            let list = renderer.record().complete();
            renderer.submit(slot, list).unwrap();
            renderer.present(&mut surface, image).unwrap();
            assert!(
                !renderer
                    .ring()
                    .current_slot()
                    .completion_signal()
                    .is_armed()
            );
        }
        assert_eq!(surface.presented_count(), 4);
    }

    #[test]
    #[should_panic(expected = "without a submission signalling it")]
    fn test_present_without_submit_panics() {
        let mut renderer = create_test_renderer(2);
        let mut surface = HeadlessSurface::new(renderer.device(), 2);
        renderer.acquire_next_slot();
        let image = surface.acquire_next_image().unwrap();
        let _ = renderer.present(&mut surface, image);
    }

    #[test]
    fn test_destroy_through_renderer() {
        let mut renderer = create_test_renderer(2);
        let scratch = renderer
            .device()
            .create_buffer(&BufferDescriptor::staging(64))
            .unwrap();

        let slot = renderer.acquire_next_slot().index();
        let mut encoder = renderer.record();
        encoder.fill_buffer(scratch, 0, 64, 0);
        renderer.submit(slot, encoder.complete()).unwrap();
        renderer.destroy(Resource::Buffer(scratch));

        renderer.wait_idle().unwrap();
        assert_eq!(renderer.collect_garbage(), 1);
        assert!(!renderer.device().is_buffer_alive(scratch));
    }
}
