//! Completed command lists.

use super::Command;

/// An immutable, recorded sequence of commands.
///
/// Created by [`CommandEncoder::complete`](super::CommandEncoder::complete)
/// and consumed by [`GraphicsDevice::submit`](crate::GraphicsDevice::submit).
/// Not `Clone`: each list is submitted exactly once.
#[derive(Debug)]
pub struct CommandList {
    pub(crate) device_id: u64,
    pub(crate) label: Option<String>,
    pub(crate) commands: Vec<Command>,
}

impl CommandList {
    /// Debug label copied from the encoder.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Recorded commands in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the list has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

static_assertions::assert_impl_all!(CommandList: Send, Sync);
static_assertions::assert_not_impl_any!(CommandList: Clone);
