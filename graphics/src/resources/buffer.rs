//! Buffer table entries.
//!
//! Buffers live in the device's arena and are referred to by [`BufferId`].
//! Commands store ids rather than handles; the device resolves them when a
//! list is submitted, which is where destroyed buffers are caught.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::backend::GpuBuffer;
use crate::types::BufferDescriptor;

slotmap::new_key_type! {
    /// Generational handle to a buffer owned by a [`GraphicsDevice`].
    ///
    /// A stale id never aliases a buffer created later in the same slot.
    ///
    /// [`GraphicsDevice`]: crate::GraphicsDevice
    pub struct BufferId;
}

/// Persistent host mapping of a host-visible buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HostAddress(pub(crate) NonNull<u8>);

// SAFETY: the address points into backend memory that outlives every user of
// it. Access to the bytes is ordered by timelines, not by this type.
unsafe impl Send for HostAddress {}
unsafe impl Sync for HostAddress {}

impl HostAddress {
    /// Address `offset` bytes into the mapping.
    ///
    /// # Safety
    ///
    /// `offset` must not exceed the size of the mapped buffer.
    pub(crate) unsafe fn add(self, offset: u64) -> NonNull<u8> {
        // SAFETY: in bounds per the caller's contract.
        unsafe { self.0.add(offset as usize) }
    }
}

/// Device-side record of a live buffer.
pub(crate) struct BufferEntry {
    pub(crate) raw: Arc<GpuBuffer>,
    pub(crate) descriptor: BufferDescriptor,
    pub(crate) host_address: Option<HostAddress>,
    /// Set by `destroy_buffer`; the slot is freed once the GPU is done.
    pub(crate) pending_destroy: bool,
}

impl std::fmt::Debug for BufferEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferEntry")
            .field("label", &self.descriptor.label)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("pending_destroy", &self.pending_destroy)
            .finish()
    }
}
