//! Type conversions between Tempo types and Vulkan types.

use ash::vk;

use crate::error::GraphicsError;
use crate::types::{Access, BufferUsage, PipelineStages};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    // Copy and fill ranges are validated on submission, so every buffer may
    // take part in transfers.
    let mut result = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }

    // MAP_READ and MAP_WRITE don't have direct Vulkan buffer usage equivalents
    // They affect memory allocation location instead

    result
}

/// Pick the memory location for a buffer.
pub fn convert_memory_location(usage: BufferUsage) -> gpu_allocator::MemoryLocation {
    if usage.contains(BufferUsage::MAP_READ) {
        gpu_allocator::MemoryLocation::GpuToCpu
    } else if usage.contains(BufferUsage::MAP_WRITE) {
        gpu_allocator::MemoryLocation::CpuToGpu
    } else {
        gpu_allocator::MemoryLocation::GpuOnly
    }
}

/// Convert pipeline stages to Vulkan stage flags.
///
/// An empty set maps to `empty_stage`, which is `TOP_OF_PIPE` for the source
/// scope of a barrier and `BOTTOM_OF_PIPE` for the destination scope.
pub fn convert_pipeline_stages(
    stages: PipelineStages,
    empty_stage: vk::PipelineStageFlags,
) -> vk::PipelineStageFlags {
    if stages.is_empty() {
        return empty_stage;
    }

    const TABLE: [(PipelineStages, vk::PipelineStageFlags); 11] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStages::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStages::HOST, vk::PipelineStageFlags::HOST),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];

    TABLE
        .iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, vk_stage)| {
            acc | *vk_stage
        })
}

/// Convert an access declaration to Vulkan access flags.
pub fn convert_access(access: Access) -> vk::AccessFlags {
    let stages = access.stages;
    let mut result = vk::AccessFlags::empty();

    if access.is_read() {
        if stages.contains(PipelineStages::DRAW_INDIRECT) {
            result |= vk::AccessFlags::INDIRECT_COMMAND_READ;
        }
        if stages.contains(PipelineStages::VERTEX_INPUT) {
            result |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ;
        }
        if stages.intersects(
            PipelineStages::VERTEX_SHADER
                | PipelineStages::FRAGMENT_SHADER
                | PipelineStages::COMPUTE_SHADER,
        ) {
            result |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::UNIFORM_READ;
        }
        if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
            result |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
        }
        if stages.contains(PipelineStages::TRANSFER) {
            result |= vk::AccessFlags::TRANSFER_READ;
        }
        if stages.contains(PipelineStages::HOST) {
            result |= vk::AccessFlags::HOST_READ;
        }
        if stages.contains(PipelineStages::ALL_COMMANDS) {
            result |= vk::AccessFlags::MEMORY_READ;
        }
    }

    if access.is_write() {
        if stages.intersects(
            PipelineStages::VERTEX_SHADER
                | PipelineStages::FRAGMENT_SHADER
                | PipelineStages::COMPUTE_SHADER,
        ) {
            result |= vk::AccessFlags::SHADER_WRITE;
        }
        if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
            result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        }
        if stages.contains(PipelineStages::TRANSFER) {
            result |= vk::AccessFlags::TRANSFER_WRITE;
        }
        if stages.contains(PipelineStages::HOST) {
            result |= vk::AccessFlags::HOST_WRITE;
        }
        if stages.contains(PipelineStages::ALL_COMMANDS) {
            result |= vk::AccessFlags::MEMORY_WRITE;
        }
    }

    result
}

/// Map a Vulkan error code to a [`GraphicsError`].
pub fn convert_vk_error(context: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("{}: {:?}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_always_transfers() {
        let flags = convert_buffer_usage(BufferUsage::UNIFORM);
        assert!(flags.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!flags.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
    }

    #[test]
    fn test_memory_location() {
        assert_eq!(
            convert_memory_location(BufferUsage::MAP_READ | BufferUsage::COPY_DST),
            gpu_allocator::MemoryLocation::GpuToCpu
        );
        assert_eq!(
            convert_memory_location(BufferUsage::MAP_WRITE),
            gpu_allocator::MemoryLocation::CpuToGpu
        );
        assert_eq!(
            convert_memory_location(BufferUsage::STORAGE),
            gpu_allocator::MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn test_empty_stages_use_fallback() {
        assert_eq!(
            convert_pipeline_stages(
                PipelineStages::empty(),
                vk::PipelineStageFlags::TOP_OF_PIPE
            ),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            convert_pipeline_stages(
                PipelineStages::TRANSFER | PipelineStages::HOST,
                vk::PipelineStageFlags::TOP_OF_PIPE
            ),
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::HOST
        );
    }

    #[test]
    fn test_access_flags() {
        assert_eq!(
            convert_access(Access::TRANSFER_WRITE),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(convert_access(Access::HOST_READ), vk::AccessFlags::HOST_READ);
        assert_eq!(convert_access(Access::NONE), vk::AccessFlags::empty());
        assert!(
            convert_access(Access::COMPUTE_SHADER_READ_WRITE)
                .contains(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
        );
    }

    #[test]
    fn test_vk_error_mapping() {
        assert_eq!(
            convert_vk_error("submit", vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            convert_vk_error("alloc", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::OutOfMemory
        );
    }
}
