//! GPU resources.
//!
//! This module contains the resources managed by the [`GraphicsDevice`]:
//! - [`BufferId`] - generational handle into the device's buffer arena
//! - [`TransferMemoryPool`] - ring of host-visible memory for streaming data
//!   to the GPU, reclaimed as timelines advance
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice

mod buffer;
mod transfer_pool;

pub(crate) use buffer::{BufferEntry, HostAddress};
pub use buffer::BufferId;
pub use transfer_pool::{TransferAllocation, TransferMemoryPool};
