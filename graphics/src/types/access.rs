//! Pipeline stages and memory access declarations used by barriers.
//!
//! An [`Access`] pairs a set of pipeline stages with the kind of memory
//! access performed in them. A barrier is declared as the access that must
//! complete (`src`) before the access that follows (`dst`) may start.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages a command may execute in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        /// Start of the pipeline.
        const TOP_OF_PIPE = 1 << 0;
        /// Indirect argument fetch.
        const DRAW_INDIRECT = 1 << 1;
        /// Vertex and index fetch.
        const VERTEX_INPUT = 1 << 2;
        /// Vertex shading.
        const VERTEX_SHADER = 1 << 3;
        /// Fragment shading.
        const FRAGMENT_SHADER = 1 << 4;
        /// Color attachment writes.
        const COLOR_ATTACHMENT_OUTPUT = 1 << 5;
        /// Compute shading.
        const COMPUTE_SHADER = 1 << 6;
        /// Copies and fills.
        const TRANSFER = 1 << 7;
        /// Host reads and writes of mapped memory.
        const HOST = 1 << 8;
        /// End of the pipeline.
        const BOTTOM_OF_PIPE = 1 << 9;
        /// Every stage.
        const ALL_COMMANDS = 1 << 10;
    }
}

/// Kind of memory access performed in a set of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessKind {
    /// Execution dependency only.
    #[default]
    None,
    /// Memory is read.
    Read,
    /// Memory is written.
    Write,
    /// Memory is read and written.
    ReadWrite,
}

/// A stage set combined with an access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    /// Stages performing the access.
    pub stages: PipelineStages,
    /// What the stages do to memory.
    pub kind: AccessKind,
}

impl Access {
    /// No access at all.
    pub const NONE: Self = Self::new(PipelineStages::empty(), AccessKind::None);
    /// Copy source reads.
    pub const TRANSFER_READ: Self = Self::new(PipelineStages::TRANSFER, AccessKind::Read);
    /// Copy and fill destination writes.
    pub const TRANSFER_WRITE: Self = Self::new(PipelineStages::TRANSFER, AccessKind::Write);
    /// Any transfer access.
    pub const TRANSFER_READ_WRITE: Self =
        Self::new(PipelineStages::TRANSFER, AccessKind::ReadWrite);
    /// CPU reads of mapped memory.
    pub const HOST_READ: Self = Self::new(PipelineStages::HOST, AccessKind::Read);
    /// CPU writes of mapped memory.
    pub const HOST_WRITE: Self = Self::new(PipelineStages::HOST, AccessKind::Write);
    /// Vertex attribute and index fetch.
    pub const VERTEX_INPUT_READ: Self = Self::new(PipelineStages::VERTEX_INPUT, AccessKind::Read);
    /// Indirect argument fetch.
    pub const INDIRECT_READ: Self = Self::new(PipelineStages::DRAW_INDIRECT, AccessKind::Read);
    /// Shader reads from the vertex stage.
    pub const VERTEX_SHADER_READ: Self =
        Self::new(PipelineStages::VERTEX_SHADER, AccessKind::Read);
    /// Shader reads from the fragment stage.
    pub const FRAGMENT_SHADER_READ: Self =
        Self::new(PipelineStages::FRAGMENT_SHADER, AccessKind::Read);
    /// Compute shader reads.
    pub const COMPUTE_SHADER_READ: Self =
        Self::new(PipelineStages::COMPUTE_SHADER, AccessKind::Read);
    /// Compute shader writes.
    pub const COMPUTE_SHADER_WRITE: Self =
        Self::new(PipelineStages::COMPUTE_SHADER, AccessKind::Write);
    /// Compute shader reads and writes.
    pub const COMPUTE_SHADER_READ_WRITE: Self =
        Self::new(PipelineStages::COMPUTE_SHADER, AccessKind::ReadWrite);
    /// Color attachment writes.
    pub const COLOR_ATTACHMENT_WRITE: Self =
        Self::new(PipelineStages::COLOR_ATTACHMENT_OUTPUT, AccessKind::Write);
    /// Full barrier: everything reads and writes.
    pub const ALL: Self = Self::new(PipelineStages::ALL_COMMANDS, AccessKind::ReadWrite);

    /// Create a new access declaration.
    pub const fn new(stages: PipelineStages, kind: AccessKind) -> Self {
        Self { stages, kind }
    }

    /// Check if this access writes memory.
    pub fn is_write(self) -> bool {
        matches!(self.kind, AccessKind::Write | AccessKind::ReadWrite)
    }

    /// Check if this access reads memory.
    pub fn is_read(self) -> bool {
        matches!(self.kind, AccessKind::Read | AccessKind::ReadWrite)
    }

    /// Combine two access declarations.
    pub fn union(self, other: Self) -> Self {
        let kind = match (self.is_read() || other.is_read(), self.is_write() || other.is_write()) {
            (false, false) => AccessKind::None,
            (true, false) => AccessKind::Read,
            (false, true) => AccessKind::Write,
            (true, true) => AccessKind::ReadWrite,
        };
        Self::new(self.stages | other.stages, kind)
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_kind_queries() {
        assert!(Access::TRANSFER_WRITE.is_write());
        assert!(!Access::TRANSFER_WRITE.is_read());
        assert!(Access::TRANSFER_READ_WRITE.is_read());
        assert!(Access::TRANSFER_READ_WRITE.is_write());
        assert!(!Access::NONE.is_read());
    }

    #[test]
    fn test_access_union() {
        let combined = Access::TRANSFER_READ.union(Access::COMPUTE_SHADER_WRITE);
        assert_eq!(combined.kind, AccessKind::ReadWrite);
        assert!(combined.stages.contains(PipelineStages::TRANSFER));
        assert!(combined.stages.contains(PipelineStages::COMPUTE_SHADER));
    }
}
