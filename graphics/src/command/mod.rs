//! Command recording.
//!
//! Work for the GPU is recorded into a [`CommandEncoder`] and sealed into a
//! [`CommandList`] by [`CommandEncoder::complete`]. The list is then moved
//! into [`GraphicsDevice::submit`], so a list can be neither modified after
//! completion nor submitted twice:
//!
//! ```text
//! CommandEncoder ──complete()──► CommandList ──submit()──► in flight ──► retired
//!   (Recording)                   (Completed)               (Submitted)   (timeline reached)
//! ```
//!
//! Commands refer to buffers by [`BufferId`]. Ids are resolved when the list
//! is submitted; a list referencing a destroyed buffer panics there.
//!
//! Encoders are `Send`, so several threads can record in parallel while one
//! thread submits.
//!
//! [`GraphicsDevice::submit`]: crate::GraphicsDevice::submit

mod encoder;
mod list;

pub use encoder::CommandEncoder;
pub use list::CommandList;

use crate::resources::BufferId;
use crate::types::{Access, BufferCopyRegion};

/// Which pipeline type a [`PipelineHandle`] binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    /// Rasterization pipeline.
    Graphics,
    /// Compute pipeline.
    Compute,
}

/// Opaque handle to a pipeline created outside this crate.
///
/// The pipeline collaborator owns the pipeline object and keeps it alive
/// until every submission using it has retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle {
    /// Native handle value (e.g. a `VkPipeline` cast to `u64`).
    pub raw: u64,
    /// Bind point of the pipeline.
    pub bind_point: PipelineBindPoint,
}

impl PipelineHandle {
    /// Handle to a graphics pipeline.
    pub fn graphics(raw: u64) -> Self {
        Self {
            raw,
            bind_point: PipelineBindPoint::Graphics,
        }
    }

    /// Handle to a compute pipeline.
    pub fn compute(raw: u64) -> Self {
        Self {
            raw,
            bind_point: PipelineBindPoint::Compute,
        }
    }
}

/// A recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Everything matching `src` completes before anything matching `dst` starts.
    PipelineBarrier { src: Access, dst: Access },
    /// Copy bytes between two buffers.
    CopyBufferToBuffer {
        src: BufferId,
        dst: BufferId,
        region: BufferCopyRegion,
    },
    /// Fill a range with a repeated 32-bit value.
    FillBuffer {
        dst: BufferId,
        offset: u64,
        size: u64,
        value: u32,
    },
    /// Bind a pipeline for subsequent draws or dispatches.
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

impl Command {
    /// Buffers the command reads or writes.
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> {
        let (first, second) = match self {
            Self::CopyBufferToBuffer { src, dst, .. } => (Some(*src), Some(*dst)),
            Self::FillBuffer { dst, .. } => (Some(*dst), None),
            _ => (None, None),
        };
        first.into_iter().chain(second)
    }
}
