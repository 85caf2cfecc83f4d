//! Native Vulkan backend implementation using ash.
//!
//! Requires Vulkan 1.2 with timeline semaphores. All work goes to a single
//! queue that supports graphics and compute. Each submission records its
//! commands into a one-time command buffer which is recycled once an
//! internal timeline shows the GPU is done with it.
//!
//! Draws need a render pass or dynamic rendering setup owned by a pipeline
//! collaborator; this backend rejects them with
//! [`GraphicsError::FeatureNotSupported`] before anything is recorded.

mod allocator;
mod command;
pub(crate) mod conversion;
mod debug;
mod device;
mod instance;

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::command::PipelineBindPoint;
use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::types::BufferDescriptor;

use super::{BackendCommand, GpuBackend, GpuBuffer, GpuSignal, GpuTimeline, SubmitBatch};

use self::command::CommandRecycler;
use self::conversion::{
    convert_access, convert_buffer_usage, convert_memory_location, convert_pipeline_stages,
    convert_vk_error,
};

/// Vulkan-based GPU backend using ash.
///
/// This backend provides native Vulkan access with:
/// - Validation layers when requested
/// - gpu-allocator for memory management
/// - Timeline semaphores for every completion query
pub struct VulkanBackend {
    /// Vulkan entry points (function loader). Must outlive the instance.
    _entry: ash::Entry,
    /// Vulkan instance.
    instance: ash::Instance,
    /// Debug messenger for validation layer output.
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// Debug utils extension instance.
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Logical device.
    device: ash::Device,
    /// The submission queue.
    queue: vk::Queue,
    /// Queue family of `queue`.
    queue_family: u32,
    /// Memory allocator, shared with every buffer it allocated.
    /// Taken on drop so it is released before the device.
    allocator: Option<Arc<Mutex<Allocator>>>,
    /// Command buffers. The lock also serializes access to `queue`.
    commands: Mutex<CommandRecycler>,
    /// Whether validation layers are enabled.
    validation_enabled: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("queue_family", &self.queue_family)
            .field("validation_enabled", &self.validation_enabled)
            .field("command_buffers_in_flight", &self.commands.lock().in_flight())
            .finish()
    }
}

impl VulkanBackend {
    /// Create a new Vulkan backend.
    ///
    /// This initializes the Vulkan instance, selects a physical device,
    /// creates a logical device, and sets up the memory allocator.
    pub fn new(validation: bool) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let (instance, debug_messenger, debug_utils) =
            instance::create_instance(&entry, validation)?;

        let destroy_instance = |instance: &ash::Instance| unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let physical_device = match device::select_physical_device(&instance) {
            Ok(physical_device) => physical_device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let Some(queue_family) = device::find_queue_family(&instance, physical_device) else {
            destroy_instance(&instance);
            return Err(GraphicsError::InitializationFailed(
                "No graphics and compute queue family found".to_string(),
            ));
        };

        let device = match device::create_logical_device(&instance, physical_device, queue_family)
        {
            Ok(device) => device,
            Err(e) => {
                destroy_instance(&instance);
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let setup = allocator::create_allocator(&instance, physical_device, device.clone())
            .and_then(|allocator| {
                CommandRecycler::new(&device, queue_family).map(|commands| (allocator, commands))
            });
        let (allocator, commands) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                destroy_instance(&instance);
                return Err(e);
            }
        };

        log::info!(
            "Vulkan backend initialized (validation: {}, queue family: {})",
            debug_utils.is_some(),
            queue_family
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,
            debug_utils,
            device,
            queue,
            queue_family,
            allocator: Some(Arc::new(Mutex::new(allocator))),
            commands: Mutex::new(commands),
            validation_enabled: validation,
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the submission queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    fn allocator(&self) -> Result<&Arc<Mutex<Allocator>>, GraphicsError> {
        self.allocator
            .as_ref()
            .ok_or_else(|| GraphicsError::Internal("allocator already released".to_string()))
    }

    fn record(&self, cmd: vk::CommandBuffer, commands: &[BackendCommand]) -> Result<(), GraphicsError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| convert_vk_error("Failed to begin command buffer", e))?;

        for command in commands {
            self.encode_command(cmd, command)?;
        }

        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| convert_vk_error("Failed to end command buffer", e))
    }

    fn encode_command(
        &self,
        cmd: vk::CommandBuffer,
        command: &BackendCommand,
    ) -> Result<(), GraphicsError> {
        match command {
            BackendCommand::Barrier { src, dst } => {
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(convert_access(*src))
                    .dst_access_mask(convert_access(*dst));
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        convert_pipeline_stages(src.stages, vk::PipelineStageFlags::TOP_OF_PIPE),
                        convert_pipeline_stages(dst.stages, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    );
                }
            }
            BackendCommand::CopyBuffer { src, dst, region } => {
                let copy = vk::BufferCopy::default()
                    .src_offset(region.src_offset)
                    .dst_offset(region.dst_offset)
                    .size(region.size);
                unsafe {
                    self.device
                        .cmd_copy_buffer(cmd, vk_buffer(src)?, vk_buffer(dst)?, &[copy]);
                }
            }
            BackendCommand::FillBuffer {
                dst,
                offset,
                size,
                value,
            } => unsafe {
                self.device
                    .cmd_fill_buffer(cmd, vk_buffer(dst)?, *offset, *size, *value);
            },
            BackendCommand::BindPipeline(pipeline) => {
                let bind_point = match pipeline.bind_point {
                    PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
                    PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
                };
                unsafe {
                    self.device.cmd_bind_pipeline(
                        cmd,
                        bind_point,
                        vk::Pipeline::from_raw(pipeline.raw),
                    );
                }
            }
            BackendCommand::Dispatch { x, y, z } => unsafe {
                self.device.cmd_dispatch(cmd, *x, *y, *z);
            },
            BackendCommand::Draw { .. } => {
                return Err(GraphicsError::FeatureNotSupported(
                    "draws are not supported by the Vulkan backend".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn vk_buffer(buffer: &GpuBuffer) -> Result<vk::Buffer, GraphicsError> {
    match buffer {
        GpuBuffer::Vulkan { buffer, .. } => Ok(*buffer),
        other => Err(GraphicsError::InvalidParameter(format!(
            "{:?} does not belong to the Vulkan backend",
            other
        ))),
    }
}

fn vk_timeline(timeline: &GpuTimeline) -> Result<vk::Semaphore, GraphicsError> {
    match timeline {
        GpuTimeline::Vulkan { semaphore, .. } => Ok(*semaphore),
        other => Err(GraphicsError::InvalidParameter(format!(
            "{:?} does not belong to the Vulkan backend",
            other
        ))),
    }
}

fn vk_signal(signal: &GpuSignal) -> Result<vk::Semaphore, GraphicsError> {
    match signal {
        GpuSignal::Vulkan { semaphore, .. } => Ok(*semaphore),
        other => Err(GraphicsError::InvalidParameter(format!(
            "{:?} does not belong to the Vulkan backend",
            other
        ))),
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        let allocator = self.allocator()?;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let allocation = match allocator::allocate_buffer_memory(
            &self.device,
            &mut allocator.lock(),
            buffer,
            descriptor.label.as_deref().unwrap_or("buffer"),
            convert_memory_location(descriptor.usage),
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        log::trace!(
            "Vulkan: created buffer {:?} ({} bytes, {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.usage
        );

        Ok(GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            allocator: Arc::clone(allocator),
            size: descriptor.size,
        })
    }

    fn map_host_visible(&self, buffer: &GpuBuffer) -> Result<NonNull<u8>, GraphicsError> {
        let GpuBuffer::Vulkan { allocation, .. } = buffer else {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} does not belong to the Vulkan backend",
                buffer
            )));
        };

        allocation
            .lock()
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.cast::<u8>())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter("buffer is not host visible".to_string())
            })
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<GpuTimeline, GraphicsError> {
        let semaphore = command::create_timeline_semaphore(&self.device, initial_value)?;
        Ok(GpuTimeline::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn create_binary_signal(&self) -> Result<GpuSignal, GraphicsError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| convert_vk_error("Failed to create semaphore", e))?;
        Ok(GpuSignal::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn timeline_value(&self, timeline: &GpuTimeline) -> Result<u64, GraphicsError> {
        let semaphore = vk_timeline(timeline)?;
        unsafe { self.device.get_semaphore_counter_value(semaphore) }
            .map_err(|e| convert_vk_error("Failed to read timeline semaphore", e))
    }

    fn wait_timeline(&self, timeline: &GpuTimeline, value: u64) -> Result<(), GraphicsError> {
        profile_scope!("vulkan_wait_timeline");
        let semaphores = [vk_timeline(timeline)?];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| convert_vk_error("Failed to wait for timeline semaphore", e))
    }

    fn submit(&self, batch: SubmitBatch<'_>) -> Result<(), GraphicsError> {
        profile_scope!("vulkan_submit");

        if batch
            .commands
            .iter()
            .any(|command| matches!(command, BackendCommand::Draw { .. }))
        {
            return Err(GraphicsError::FeatureNotSupported(
                "draws are not supported by the Vulkan backend".to_string(),
            ));
        }

        let wait_semaphores = batch
            .wait_signals
            .iter()
            .map(|signal| vk_signal(signal))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_values = vec![0u64; wait_semaphores.len()];
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];

        let mut signal_semaphores = Vec::with_capacity(
            batch.signal_signals.len() + batch.signal_timelines.len() + 1,
        );
        let mut signal_values = Vec::with_capacity(signal_semaphores.capacity());
        for signal in &batch.signal_signals {
            signal_semaphores.push(vk_signal(signal)?);
            signal_values.push(0);
        }
        for (timeline, value) in &batch.signal_timelines {
            signal_semaphores.push(vk_timeline(timeline)?);
            signal_values.push(*value);
        }

        let mut commands = self.commands.lock();
        let cmd = commands.acquire(&self.device)?;

        if let Err(e) = self.record(cmd, &batch.commands) {
            commands.release_unsubmitted(cmd);
            return Err(e);
        }

        signal_semaphores.push(commands.retire_timeline());
        signal_values.push(commands.next_retire_value());

        let command_buffers = [cmd];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let result = {
            profile_scope!("queue_submit");
            unsafe {
                self.device
                    .queue_submit(self.queue, &[submit_info], vk::Fence::null())
            }
        };

        if let Err(e) = result {
            commands.release_unsubmitted(cmd);
            return Err(convert_vk_error("Failed to submit command buffer", e));
        }
        commands.retire_on_completion(cmd);

        log::trace!(
            "Vulkan: submitted {:?} ({} commands, {} waits, {} signals)",
            batch.label,
            batch.commands.len(),
            wait_semaphores.len(),
            signal_semaphores.len() - 1
        );
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        profile_scope!("vulkan_wait_idle");
        let _queue_guard = self.commands.lock();
        unsafe { self.device.queue_wait_idle(self.queue) }
            .map_err(|e| convert_vk_error("Failed to wait for queue idle", e))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Failed to wait for device idle: {:?}", e);
            }

            self.commands.get_mut().destroy(&self.device);

            // Buffers hold the allocator too; all of them are gone by now.
            if let Some(allocator) = self.allocator.take()
                && Arc::strong_count(&allocator) > 1
            {
                log::warn!(
                    "{} buffers outlive the Vulkan backend",
                    Arc::strong_count(&allocator) - 1
                );
            }

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}
