//! Binary signals: single-shot GPU to GPU semaphores.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::backend::{GpuBackend, GpuSignal};
use crate::error::GraphicsError;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// CPU-side state of a [`BinarySignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// No submission will signal it; it may be added as a signal.
    Unarmed,
    /// A submission signals it; exactly one wait or present must consume it.
    Armed,
}

struct SignalInner {
    id: u64,
    label: Option<String>,
    armed: AtomicBool,
    raw: GpuSignal,
    // Keeps the native device alive for the semaphore.
    _backend: Arc<dyn GpuBackend>,
}

/// A binary semaphore signalled once per submission and consumed once.
///
/// The CPU tracks whether the semaphore is armed so that signalling twice
/// without a wait in between, or waiting on a signal that nothing will
/// signal, is caught at submit time instead of hanging the GPU.
#[derive(Clone)]
pub struct BinarySignal {
    inner: Arc<SignalInner>,
}

impl BinarySignal {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        label: Option<String>,
    ) -> Result<Self, GraphicsError> {
        let raw = backend.create_binary_signal()?;
        let id = NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("Created binary signal {} ({:?})", id, label);

        Ok(Self {
            inner: Arc::new(SignalInner {
                id,
                label,
                armed: AtomicBool::new(false),
                raw,
                _backend: backend,
            }),
        })
    }

    /// Unique identifier, for debugging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Current CPU-side state.
    pub fn state(&self) -> SignalState {
        if self.inner.armed.load(Ordering::Acquire) {
            SignalState::Armed
        } else {
            SignalState::Unarmed
        }
    }

    /// Whether a submission will signal this semaphore and nothing waited on it yet.
    pub fn is_armed(&self) -> bool {
        self.state() == SignalState::Armed
    }

    /// Mark the signal as armed by a submission.
    pub(crate) fn arm(&self) {
        let was_armed = self.inner.armed.swap(true, Ordering::AcqRel);
        assert!(
            !was_armed,
            "Binary signal {} ({:?}) signalled twice without a wait in between",
            self.inner.id, self.inner.label
        );
    }

    /// Mark the signal as consumed by a wait or a present.
    pub(crate) fn consume(&self) {
        let was_armed = self.inner.armed.swap(false, Ordering::AcqRel);
        assert!(
            was_armed,
            "Binary signal {} ({:?}) waited on but never signalled",
            self.inner.id, self.inner.label
        );
    }

    /// Whether two handles refer to the same semaphore.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn raw(&self) -> &GpuSignal {
        &self.inner.raw
    }
}

impl std::fmt::Debug for BinarySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinarySignal")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn create_signal() -> BinarySignal {
        BinarySignal::new(Arc::new(DummyBackend::new()), Some("present".into())).unwrap()
    }

    #[test]
    fn test_arm_consume_cycle() {
        let signal = create_signal();
        assert_eq!(signal.state(), SignalState::Unarmed);

        signal.arm();
        assert!(signal.is_armed());

        signal.consume();
        assert_eq!(signal.state(), SignalState::Unarmed);

        signal.arm();
        assert!(signal.is_armed());
    }

    #[test]
    #[should_panic(expected = "signalled twice")]
    fn test_double_arm_panics() {
        let signal = create_signal();
        signal.arm();
        signal.arm();
    }

    #[test]
    #[should_panic(expected = "never signalled")]
    fn test_consume_unarmed_panics() {
        let signal = create_signal();
        signal.consume();
    }

    #[test]
    fn test_ids_unique() {
        let a = create_signal();
        let b = create_signal();
        assert_ne!(a.id(), b.id());
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }
}
