//! Command encoder.

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::resources::{BufferId, TransferAllocation};
use crate::types::{Access, BufferCopyRegion};

use super::{Command, CommandList, PipelineBindPoint, PipelineHandle};

/// Records commands for one submission.
///
/// Created with [`GraphicsDevice::create_command_encoder`]. Recording never
/// blocks and never touches the GPU; ranges are validated against the
/// buffer sizes known to the device as they are recorded.
///
/// # Example
///
/// ```ignore
/// let mut encoder = device.create_command_encoder().with_label("upload");
/// encoder.copy_from_transfer(&staging, vertex_buffer, 0);
/// encoder.pipeline_barrier(Access::TRANSFER_WRITE, Access::VERTEX_INPUT_READ);
/// let list = encoder.complete();
/// ```
pub struct CommandEncoder {
    device: Arc<GraphicsDevice>,
    label: Option<String>,
    commands: Vec<Command>,
    bound_pipeline: Option<PipelineHandle>,
}

impl CommandEncoder {
    pub(crate) fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            device,
            label: None,
            commands: Vec::new(),
            bound_pipeline: None,
        }
    }

    /// Set the debug label carried by the completed list.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Make everything matching `src` complete before anything matching `dst` starts.
    pub fn pipeline_barrier(&mut self, src: Access, dst: Access) -> &mut Self {
        self.commands.push(Command::PipelineBarrier { src, dst });
        self
    }

    /// Copy `size` bytes from `src` to `dst`.
    ///
    /// Zero-size copies are not recorded.
    ///
    /// # Panics
    ///
    /// Panics if either range lies outside its buffer.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        if size == 0 {
            return self;
        }

        let region = BufferCopyRegion::new(src_offset, dst_offset, size);
        self.check_range(src, region.src_offset, size, "copy source");
        self.check_range(dst, region.dst_offset, size, "copy destination");

        self.commands
            .push(Command::CopyBufferToBuffer { src, dst, region });
        self
    }

    /// Copy a transfer allocation into `dst` at `dst_offset`.
    ///
    /// # Panics
    ///
    /// Panics if the allocation belongs to another device or the destination
    /// range lies outside `dst`.
    pub fn copy_from_transfer(
        &mut self,
        allocation: &TransferAllocation<'_>,
        dst: BufferId,
        dst_offset: u64,
    ) -> &mut Self {
        assert!(
            Arc::ptr_eq(allocation.device(), &self.device),
            "transfer allocation belongs to another device"
        );
        self.copy_buffer_to_buffer(
            allocation.buffer(),
            allocation.buffer_offset(),
            dst,
            dst_offset,
            allocation.size(),
        )
    }

    /// Fill `size` bytes of `dst` at `offset` with `value` repeated.
    ///
    /// # Panics
    ///
    /// Panics if `offset` or `size` is not a multiple of 4 or the range lies
    /// outside `dst`.
    pub fn fill_buffer(&mut self, dst: BufferId, offset: u64, size: u64, value: u32) -> &mut Self {
        assert!(
            offset % 4 == 0 && size % 4 == 0,
            "fill offset and size must be multiples of 4 (offset: {offset}, size: {size})"
        );
        if size == 0 {
            return self;
        }

        self.check_range(dst, offset, size, "fill destination");
        self.commands.push(Command::FillBuffer {
            dst,
            offset,
            size,
            value,
        });
        self
    }

    /// Bind a pipeline for subsequent draws or dispatches.
    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> &mut Self {
        self.bound_pipeline = Some(pipeline);
        self.commands.push(Command::BindPipeline(pipeline));
        self
    }

    /// Record a non-indexed draw.
    ///
    /// # Panics
    ///
    /// Panics if no graphics pipeline is bound.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> &mut Self {
        self.require_pipeline(PipelineBindPoint::Graphics, "draw");
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        self
    }

    /// Record a compute dispatch.
    ///
    /// # Panics
    ///
    /// Panics if no compute pipeline is bound.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> &mut Self {
        self.require_pipeline(PipelineBindPoint::Compute, "dispatch");
        self.commands.push(Command::Dispatch { x, y, z });
        self
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Finish recording.
    pub fn complete(self) -> CommandList {
        log::trace!(
            "Completed command list {:?} ({} commands)",
            self.label,
            self.commands.len()
        );
        CommandList {
            device_id: self.device.id(),
            label: self.label,
            commands: self.commands,
        }
    }

    fn require_pipeline(&self, bind_point: PipelineBindPoint, what: &str) {
        assert!(
            matches!(self.bound_pipeline, Some(p) if p.bind_point == bind_point),
            "{what} recorded without a bound {bind_point:?} pipeline"
        );
    }

    /// Buffers that are already gone are reported at submit time.
    fn check_range(&self, buffer: BufferId, offset: u64, size: u64, what: &str) {
        if let Some(buffer_size) = self.device.buffer_size(buffer) {
            assert!(
                offset
                    .checked_add(size)
                    .is_some_and(|end| end <= buffer_size),
                "{what} range {offset}..{} out of bounds of buffer of {buffer_size} bytes",
                offset.saturating_add(size)
            );
        }
    }
}

impl std::fmt::Debug for CommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEncoder")
            .field("label", &self.label)
            .field("commands", &self.commands.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandEncoder: Send);
