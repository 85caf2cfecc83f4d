//! Common types and descriptors for graphics resources.
//!
//! This module contains usage flags, descriptor structs and the access
//! declarations used throughout the graphics system.

mod access;
mod buffer;

pub use access::{Access, AccessKind, PipelineStages};
pub use buffer::{BufferCopyRegion, BufferDescriptor, BufferUsage};
