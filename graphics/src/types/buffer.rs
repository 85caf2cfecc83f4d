//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be used as an indirect buffer.
        const INDIRECT = 1 << 4;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
        /// Buffer is mapped for CPU reads (readback).
        const MAP_READ = 1 << 7;
        /// Buffer is mapped for CPU writes (staging).
        const MAP_WRITE = 1 << 8;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferUsage {
    /// Whether buffers with this usage live in host-visible memory.
    pub fn is_host_visible(self) -> bool {
        self.intersects(Self::MAP_READ | Self::MAP_WRITE)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Descriptor for a host-writable staging buffer.
    pub fn staging(size: u64) -> Self {
        Self::new(size, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC)
    }

    /// Descriptor for a host-readable readback buffer.
    pub fn readback(size: u64) -> Self {
        Self::new(size, BufferUsage::MAP_READ | BufferUsage::COPY_DST)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A region to copy between two buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferCopyRegion {
    /// Byte offset in the source buffer.
    pub src_offset: u64,
    /// Byte offset in the destination buffer.
    pub dst_offset: u64,
    /// Number of bytes to copy.
    pub size: u64,
}

impl BufferCopyRegion {
    /// Create a new copy region.
    pub fn new(src_offset: u64, dst_offset: u64, size: u64) -> Self {
        Self {
            src_offset,
            dst_offset,
            size,
        }
    }

    /// End of the source range (exclusive).
    pub fn src_end(&self) -> u64 {
        self.src_offset + self.size
    }

    /// End of the destination range (exclusive).
    pub fn dst_end(&self) -> u64 {
        self.dst_offset + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor() {
        let desc = BufferDescriptor::new(1024, BufferUsage::VERTEX | BufferUsage::COPY_DST)
            .with_label("vertices");
        assert_eq!(desc.size, 1024);
        assert_eq!(desc.label.as_deref(), Some("vertices"));
        assert!(!desc.usage.is_host_visible());
    }

    #[test]
    fn test_host_visible_presets() {
        assert!(BufferDescriptor::staging(64).usage.is_host_visible());
        assert!(BufferDescriptor::readback(64).usage.is_host_visible());
        assert!(
            BufferDescriptor::readback(64)
                .usage
                .contains(BufferUsage::COPY_DST)
        );
    }

    #[test]
    fn test_copy_region_ends() {
        let region = BufferCopyRegion::new(16, 64, 32);
        assert_eq!(region.src_end(), 48);
        assert_eq!(region.dst_end(), 96);
    }
}
