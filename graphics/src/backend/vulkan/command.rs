//! Vulkan command pool and one-time command buffer recycling.
//!
//! Every submission records into a fresh primary command buffer. Each one is
//! tagged with a value on an internal timeline semaphore that the submission
//! signals, and goes back to the free list once that value is reached.

use std::collections::VecDeque;

use ash::vk;

use crate::error::GraphicsError;

use super::conversion::convert_vk_error;

/// Create a command pool whose buffers can be reset individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        );

    let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })?;

    Ok(pool)
}

/// Create a timeline semaphore starting at `initial_value`.
pub fn create_timeline_semaphore(
    device: &ash::Device,
    initial_value: u64,
) -> Result<vk::Semaphore, GraphicsError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

    unsafe { device.create_semaphore(&create_info, None) }
        .map_err(|e| convert_vk_error("Failed to create timeline semaphore", e))
}

/// Hands out command buffers and takes them back once the GPU is done.
pub struct CommandRecycler {
    pool: vk::CommandPool,
    retire_timeline: vk::Semaphore,
    retire_value: u64,
    in_flight: VecDeque<(u64, vk::CommandBuffer)>,
    free: Vec<vk::CommandBuffer>,
}

impl CommandRecycler {
    /// Create the pool and the retire timeline.
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self, GraphicsError> {
        let pool = create_command_pool(device, queue_family_index)?;
        let retire_timeline = match create_timeline_semaphore(device, 0) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };

        Ok(Self {
            pool,
            retire_timeline,
            retire_value: 0,
            in_flight: VecDeque::new(),
            free: Vec::new(),
        })
    }

    /// Get a command buffer ready for `begin`.
    pub fn acquire(&mut self, device: &ash::Device) -> Result<vk::CommandBuffer, GraphicsError> {
        self.reclaim(device)?;

        if let Some(cmd) = self.free.pop() {
            unsafe { device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }
                .map_err(|e| convert_vk_error("Failed to reset command buffer", e))?;
            return Ok(cmd);
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| convert_vk_error("Failed to allocate command buffer", e))?;

        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsError::Internal("driver returned no command buffer".to_string()))
    }

    /// Return a command buffer that was never submitted.
    pub fn release_unsubmitted(&mut self, cmd: vk::CommandBuffer) {
        self.free.push(cmd);
    }

    /// The semaphore and value the submission of `cmd` must signal.
    ///
    /// Call only once the submission is certain to be made.
    pub fn retire_on_completion(&mut self, cmd: vk::CommandBuffer) -> (vk::Semaphore, u64) {
        self.retire_value += 1;
        self.in_flight.push_back((self.retire_value, cmd));
        (self.retire_timeline, self.retire_value)
    }

    /// The value the next [`retire_on_completion`](Self::retire_on_completion) will hand out.
    pub fn next_retire_value(&self) -> u64 {
        self.retire_value + 1
    }

    /// The internal retire timeline.
    pub fn retire_timeline(&self) -> vk::Semaphore {
        self.retire_timeline
    }

    /// Number of command buffers still owned by the GPU.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn reclaim(&mut self, device: &ash::Device) -> Result<(), GraphicsError> {
        if self.in_flight.is_empty() {
            return Ok(());
        }

        let completed = unsafe { device.get_semaphore_counter_value(self.retire_timeline) }
            .map_err(|e| convert_vk_error("Failed to read retire timeline", e))?;

        while let Some(&(value, cmd)) = self.in_flight.front() {
            if value > completed {
                break;
            }
            self.in_flight.pop_front();
            self.free.push(cmd);
        }
        Ok(())
    }

    /// Destroy the pool and the retire timeline.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.in_flight.clear();
        self.free.clear();
        unsafe {
            // Destroying the pool frees every buffer allocated from it.
            device.destroy_command_pool(self.pool, None);
            device.destroy_semaphore(self.retire_timeline, None);
        }
    }
}
