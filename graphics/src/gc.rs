//! Deferred destruction of GPU-referenced resources.
//!
//! GPU commands execute asynchronously: when a resource is dropped on the CPU,
//! a submission that references it may still be running. Instead of releasing
//! the resource, its owner queues it here together with a timeline value that
//! proves the GPU is done with it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        GarbageCollector                          │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  pending (FIFO)                                            │  │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │  │
//! │  │  │ buffer 3     │  │ timeline 7   │  │ buffer 9     │ ...  │  │
//! │  │  │ submit >= 12 │  │ frame0 >= 4  │  │ submit >= 13 │      │  │
//! │  │  └──────────────┘  └──────────────┘  └──────────────┘      │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!
//! destroy(resource, timeline, value):
//!   queue the triple, release nothing
//!
//! collect_garbage():
//!   release every entry whose timeline reached its value (non-blocking)
//!
//! flush_all() (device teardown, after a device idle wait):
//!   release everything
//! ```
//!
//! Entries can wait on different timelines, so they are not necessarily
//! released in queue order.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::profiling::profile_scope;
use crate::resources::BufferId;
use crate::sync::{BinarySignal, TimelineSemaphore};

/// A resource whose release can be deferred.
#[derive(Debug, Clone)]
pub enum Resource {
    /// A buffer in the device's buffer table.
    Buffer(BufferId),
    /// A timeline semaphore handle.
    Timeline(TimelineSemaphore),
    /// A binary signal handle.
    Signal(BinarySignal),
}

impl From<BufferId> for Resource {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<TimelineSemaphore> for Resource {
    fn from(timeline: TimelineSemaphore) -> Self {
        Self::Timeline(timeline)
    }
}

impl From<BinarySignal> for Resource {
    fn from(signal: BinarySignal) -> Self {
        Self::Signal(signal)
    }
}

/// A resource waiting for `timeline` to reach `required_value`.
#[derive(Debug)]
pub struct PendingDestruction {
    /// What to release.
    pub resource: Resource,
    /// Timeline proving the GPU is done with the resource.
    pub timeline: TimelineSemaphore,
    /// Value the timeline must reach.
    pub required_value: u64,
}

impl PendingDestruction {
    /// Whether the GPU is done with the resource.
    pub fn is_ready(&self) -> bool {
        self.timeline.is_reached(self.required_value)
    }
}

/// Queue of resources released once their timelines allow it.
///
/// The collector only decides *when*; the caller supplies *how* through the
/// release callback, which the device uses to free buffer table slots.
#[derive(Default)]
pub struct GarbageCollector {
    pending: Mutex<VecDeque<PendingDestruction>>,
}

impl GarbageCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `resource` until `timeline` reaches `required_value`.
    ///
    /// Never blocks and never releases anything.
    pub fn destroy(&self, resource: Resource, timeline: &TimelineSemaphore, required_value: u64) {
        log::trace!(
            "Deferred destruction of {:?} until {:?} reaches {}",
            resource,
            timeline.label(),
            required_value
        );
        self.pending.lock().push_back(PendingDestruction {
            resource,
            timeline: timeline.clone(),
            required_value,
        });
    }

    /// Release every entry whose timeline reached its value.
    ///
    /// Non-blocking. Entries that are not ready stay queued in order. Returns
    /// the number of released resources.
    pub fn collect_garbage(&self, mut release: impl FnMut(Resource)) -> usize {
        profile_scope!("collect_garbage");

        let ready: Vec<PendingDestruction> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return 0;
            }

            let mut ready = Vec::new();
            let mut waiting = VecDeque::with_capacity(pending.len());
            for entry in pending.drain(..) {
                if entry.is_ready() {
                    ready.push(entry);
                } else {
                    waiting.push_back(entry);
                }
            }
            *pending = waiting;
            ready
        };

        let released = ready.len();
        for entry in ready {
            release(entry.resource);
        }

        if released > 0 {
            log::debug!(
                "Garbage collection released {} resources ({} pending)",
                released,
                self.pending_count()
            );
        }
        released
    }

    /// Release every entry regardless of its timeline.
    ///
    /// Only correct once the device is idle.
    pub fn flush_all(&self, mut release: impl FnMut(Resource)) -> usize {
        let entries: Vec<_> = self.pending.lock().drain(..).collect();
        let released = entries.len();
        for entry in entries {
            release(entry.resource);
        }

        if released > 0 {
            log::debug!("Flushed {} pending destructions", released);
        }
        released
    }

    /// Number of queued entries.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GarbageCollector: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend, SubmitBatch};
    use std::sync::Arc;

    struct Fixture {
        backend: Arc<DummyBackend>,
        timeline: TimelineSemaphore,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(DummyBackend::new());
            let timeline = TimelineSemaphore::new(backend.clone(), Some("gc".into())).unwrap();
            Self { backend, timeline }
        }

        fn advance_to(&self, value: u64) {
            self.timeline.signal_on_submission(value);
            self.backend
                .submit(SubmitBatch {
                    signal_timelines: vec![(self.timeline.raw(), value)],
                    ..Default::default()
                })
                .unwrap();
            self.timeline.wait_for_value(value);
        }

        fn resource(&self) -> Resource {
            Resource::Timeline(TimelineSemaphore::new(self.backend.clone(), None).unwrap())
        }
    }

    #[test]
    fn test_collect_on_empty_is_noop() {
        let gc = GarbageCollector::new();
        let mut released = Vec::new();
        assert_eq!(gc.collect_garbage(|r| released.push(r)), 0);
        assert!(released.is_empty());
    }

    #[test]
    fn test_unsatisfied_entries_stay_queued() {
        let fixture = Fixture::new();
        let gc = GarbageCollector::new();
        gc.destroy(fixture.resource(), &fixture.timeline, 1);
        gc.destroy(fixture.resource(), &fixture.timeline, 2);

        for _ in 0..3 {
            assert_eq!(gc.collect_garbage(|_| panic!("released too early")), 0);
            assert_eq!(gc.pending_count(), 2);
        }
    }

    #[test]
    fn test_release_when_reached() {
        let fixture = Fixture::new();
        let gc = GarbageCollector::new();
        gc.destroy(fixture.resource(), &fixture.timeline, 1);
        gc.destroy(fixture.resource(), &fixture.timeline, 2);

        fixture.advance_to(1);
        assert_eq!(gc.collect_garbage(|_| {}), 1);
        assert_eq!(gc.pending_count(), 1);

        fixture.advance_to(2);
        assert_eq!(gc.collect_garbage(|_| {}), 1);
        assert_eq!(gc.pending_count(), 0);
        assert_eq!(gc.collect_garbage(|_| {}), 0);
    }

    #[test]
    fn test_entries_on_other_timelines_released_out_of_order() {
        let fixture = Fixture::new();
        let other = Fixture::new();
        let gc = GarbageCollector::new();

        gc.destroy(fixture.resource(), &fixture.timeline, 5);
        gc.destroy(Resource::Buffer(BufferId::default()), &other.timeline, 1);

        other.advance_to(1);
        let mut released = Vec::new();
        gc.collect_garbage(|r| released.push(r));
        assert!(matches!(released.as_slice(), [Resource::Buffer(_)]));
        assert_eq!(gc.pending_count(), 1);
    }

    #[test]
    fn test_flush_all_releases_everything() {
        let fixture = Fixture::new();
        let gc = GarbageCollector::new();
        gc.destroy(fixture.resource(), &fixture.timeline, 10);
        gc.destroy(fixture.resource(), &fixture.timeline, 20);

        assert_eq!(gc.flush_all(|_| {}), 2);
        assert_eq!(gc.pending_count(), 0);
    }
}
