//! GPU synchronization primitives.
//!
//! Two kinds of semaphore coordinate the CPU and the GPU:
//!
//! | Primitive | Direction | Purpose |
//! |-----------|-----------|---------|
//! | [`TimelineSemaphore`] | GPU → CPU | "Has the device reached value N?" Waited on before reusing frame slots, transfer memory and destroyed resources |
//! | [`BinarySignal`] | GPU → GPU | Signalled once by a submission, consumed once by a wait or a present |
//!
//! Both are created through the [`GraphicsDevice`](crate::GraphicsDevice) and
//! keep the backend alive for as long as any handle exists.

mod signal;
mod timeline;

pub use signal::{BinarySignal, SignalState};
pub use timeline::TimelineSemaphore;

static_assertions::assert_impl_all!(TimelineSemaphore: Send, Sync, Clone);
static_assertions::assert_impl_all!(BinarySignal: Send, Sync, Clone);
