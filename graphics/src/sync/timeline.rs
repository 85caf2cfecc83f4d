//! Timeline semaphores: monotonically increasing GPU-visible counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{GpuBackend, GpuTimeline};
use crate::error::GraphicsError;
use crate::profiling::profile_scope;

static NEXT_TIMELINE_ID: AtomicU64 = AtomicU64::new(1);

struct TimelineInner {
    id: u64,
    label: Option<String>,
    /// Highest value handed to a submission so far.
    scheduled: AtomicU64,
    raw: GpuTimeline,
    backend: Arc<dyn GpuBackend>,
}

/// A GPU timeline semaphore.
///
/// The device signals the counter to a value when the submission carrying
/// that value completes. On the CPU side the semaphore remembers the highest
/// value scheduled so far, which enforces strictly increasing signal values
/// and turns waits on values that can never be reached into a panic instead
/// of a deadlock.
///
/// Cloning is cheap; clones refer to the same semaphore.
///
/// ```text
/// scheduled: 1 ── 2 ── 3 ── 4        (CPU, signal_on_submission)
/// value():   1 ── 2 ──┐              (GPU progress)
///                     └─ wait_for_value(3) blocks here
/// ```
#[derive(Clone)]
pub struct TimelineSemaphore {
    inner: Arc<TimelineInner>,
}

impl TimelineSemaphore {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        label: Option<String>,
    ) -> Result<Self, GraphicsError> {
        let raw = backend.create_timeline_semaphore(0)?;
        let id = NEXT_TIMELINE_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("Created timeline semaphore {} ({:?})", id, label);

        Ok(Self {
            inner: Arc::new(TimelineInner {
                id,
                label,
                scheduled: AtomicU64::new(0),
                raw,
                backend,
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

    /// Record that the submission being issued will signal `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not greater than every value scheduled before.
    pub fn signal_on_submission(&self, value: u64) {
        let result = self
            .inner
            .scheduled
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (value > last).then_some(value)
            });

        if let Err(last) = result {
            panic!(
                "Timeline {} ({:?}): signal values must be strictly increasing, got {} after {}",
                self.inner.id, self.inner.label, value, last
            );
        }

        log::trace!("Timeline {}: scheduled value {}", self.inner.id, value);
    }

    /// Undo [`signal_on_submission`](Self::signal_on_submission) for a
    /// submission the backend rejected.
    ///
    /// Restores `previous` only if `value` is still the latest scheduled value.
    pub(crate) fn unschedule(&self, value: u64, previous: u64) {
        if self
            .inner
            .scheduled
            .compare_exchange(value, previous, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::trace!(
                "Timeline {}: unscheduled value {}, back to {}",
                self.inner.id,
                value,
                previous
            );
        }
    }

    /// Assert that `value` would be accepted by
    /// [`signal_on_submission`](Self::signal_on_submission).
    pub(crate) fn check_signal_value(&self, value: u64) {
        let last = self.last_scheduled();
        assert!(
            value > last,
            "Timeline {} ({:?}): signal values must be strictly increasing, got {} after {}",
            self.inner.id,
            self.inner.label,
            value,
            last
        );
    }

    /// Highest value scheduled for signalling.
    pub fn last_scheduled(&self) -> u64 {
        self.inner.scheduled.load(Ordering::Acquire)
    }

    /// Current device-visible value (non-blocking).
    ///
    /// # Panics
    ///
    /// Panics if the device was lost.
    pub fn value(&self) -> u64 {
        self.inner
            .backend
            .timeline_value(&self.inner.raw)
            .unwrap_or_else(|e| {
                panic!("Timeline {}: failed to query value: {}", self.inner.id, e)
            })
    }

    /// Whether the device has signalled at least `value`.
    pub fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }

    /// Block until the device has signalled at least `value`.
    ///
    /// Returns immediately if the value is already reached.
    ///
    /// # Panics
    ///
    /// Panics if `value` was never scheduled (the wait could not return) or
    /// if the device was lost while waiting.
    pub fn wait_for_value(&self, value: u64) {
        if self.is_reached(value) {
            return;
        }

        let scheduled = self.last_scheduled();
        assert!(
            value <= scheduled,
            "Timeline {} ({:?}): waiting for value {} which was never scheduled (last scheduled: {})",
            self.inner.id,
            self.inner.label,
            value,
            scheduled
        );

        profile_scope!("timeline_wait");
        log::trace!("Timeline {}: waiting for value {}", self.inner.id, value);

        if let Err(e) = self.inner.backend.wait_timeline(&self.inner.raw, value) {
            panic!(
                "Timeline {}: wait for value {} failed: {}",
                self.inner.id, value, e
            );
        }
    }

    /// Whether two handles refer to the same semaphore.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn raw(&self) -> &GpuTimeline {
        &self.inner.raw
    }
}

impl std::fmt::Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineSemaphore")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("last_scheduled", &self.last_scheduled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, SubmitBatch};

    fn create_timeline() -> (Arc<DummyBackend>, TimelineSemaphore) {
        let backend = Arc::new(DummyBackend::new());
        let timeline = TimelineSemaphore::new(backend.clone(), Some("test".into())).unwrap();
        (backend, timeline)
    }

    fn signal(backend: &DummyBackend, timeline: &TimelineSemaphore, value: u64) {
        timeline.signal_on_submission(value);
        backend
            .submit(SubmitBatch {
                signal_timelines: vec![(timeline.raw(), value)],
                ..Default::default()
            })
            .unwrap();
    }

    #[test]
    fn test_initial_state() {
        let (_backend, timeline) = create_timeline();
        assert_eq!(timeline.value(), 0);
        assert_eq!(timeline.last_scheduled(), 0);
        assert!(timeline.is_reached(0));
        assert_eq!(timeline.label(), Some("test"));
    }

    #[test]
    fn test_wait_for_signalled_value() {
        let (backend, timeline) = create_timeline();
        signal(&backend, &timeline, 1);
        signal(&backend, &timeline, 2);

        timeline.wait_for_value(2);
        assert_eq!(timeline.value(), 2);
        assert!(timeline.is_reached(1));
        assert_eq!(timeline.last_scheduled(), 2);
    }

    #[test]
    fn test_wait_returns_immediately_when_reached() {
        let (_backend, timeline) = create_timeline();
        timeline.wait_for_value(0);
    }

    #[test]
    fn test_wait_blocks_until_queue_resumes() {
        let (backend, timeline) = create_timeline();
        backend.pause();
        signal(&backend, &timeline, 1);
        assert!(!timeline.is_reached(1));

        let resumer = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                backend.resume();
            })
        };

        timeline.wait_for_value(1);
        assert!(timeline.is_reached(1));
        resumer.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn test_non_monotonic_signal_panics() {
        let (_backend, timeline) = create_timeline();
        timeline.signal_on_submission(2);
        timeline.signal_on_submission(2);
    }

    #[test]
    #[should_panic(expected = "never scheduled")]
    fn test_wait_on_unscheduled_value_panics() {
        let (_backend, timeline) = create_timeline();
        timeline.wait_for_value(1);
    }

    #[test]
    fn test_unschedule_restores_previous_value() {
        let (_backend, timeline) = create_timeline();
        timeline.signal_on_submission(2);
        timeline.signal_on_submission(5);

        timeline.unschedule(5, 2);
        assert_eq!(timeline.last_scheduled(), 2);

        // Only the latest value can be rolled back.
        timeline.signal_on_submission(7);
        timeline.unschedule(5, 2);
        assert_eq!(timeline.last_scheduled(), 7);
    }

    #[test]
    fn test_clones_share_state() {
        let (_backend, timeline) = create_timeline();
        let clone = timeline.clone();
        timeline.signal_on_submission(3);
        assert_eq!(clone.last_scheduled(), 3);
        assert!(clone.ptr_eq(&timeline));
        assert_eq!(clone.id(), timeline.id());
    }
}
