//! Frame resource ring for keeping multiple frames in flight.
//!
//! [`FrameRing`] lets the CPU record frame N+1 while the GPU executes frame N.
//! Each of the N slots owns a completion signal (for presentation) and a
//! timeline semaphore counting the submissions made with that slot.
//!
//! # Frame Overlap
//!
//! With 2 frames in flight:
//!
//! ```text
//! Frame 0: [acquire 0] [record] [submit] ─────────────────────────────────►
//!                                [GPU executes frame 0] ──────────────────►
//!
//! Frame 1:             [acquire 1] [record] [submit] ─────────────────────►
//!                                            [GPU executes frame 1] ──────►
//!
//! Frame 2:                         [acquire 0: wait slot 0] [record] ...
//!
//! Time ───────────────────────────────────────────────────────────────────►
//! ```
//!
//! - The CPU only waits when it comes back to a slot the GPU still uses
//! - Rotation is strict FIFO: slot 0, 1, ..., N-1, 0, ...
//!
//! # Slot Timelines
//!
//! A slot's `finish_counter` is the number of submissions made with it. Each
//! submission signals the slot's timeline to the incremented counter, so
//! waiting for `timeline >= finish_counter` means every submission ever made
//! with the slot has completed:
//!
//! ```text
//! slot 0: finish_counter 0 ──submit──► 1 ──submit──► 2
//! timeline:                 0 ─────────► 1 ──────────► 2
//!                                        ^ acquire waits here before reuse
//! ```
//!
//! # Choosing Frames in Flight
//!
//! | Count | Behavior |
//! |-------|----------|
//! | 1 | CPU waits for GPU every frame. Simple but slow. |
//! | 2 | Good balance. CPU can work on N+1 while GPU renders N. |
//! | 3 | More overlap, higher latency. |

use std::sync::Arc;

use crate::command::CommandList;
use crate::device::{GraphicsDevice, Submission, SubmissionIndex};
use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::sync::{BinarySignal, TimelineSemaphore};

/// Synchronization state of one frame slot.
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    completion_signal: BinarySignal,
    timeline: TimelineSemaphore,
    finish_counter: u64,
}

impl FrameSlot {
    /// Position of the slot in the ring.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Signalled by each submission made with the slot; waited on by presentation.
    pub fn completion_signal(&self) -> &BinarySignal {
        &self.completion_signal
    }

    /// Timeline counting completed submissions of the slot.
    pub fn timeline(&self) -> &TimelineSemaphore {
        &self.timeline
    }

    /// Number of submissions made with the slot.
    pub fn finish_counter(&self) -> u64 {
        self.finish_counter
    }

    /// Whether every submission made with the slot has completed.
    pub fn is_ready(&self) -> bool {
        self.timeline.is_reached(self.finish_counter)
    }
}

/// Ring of frame slots for CPU/GPU overlap.
///
/// # Thread Safety
///
/// `FrameRing` is owned by the submission thread. It is `Send` but all
/// methods that rotate or submit take `&mut self`.
///
/// # Example
///
/// ```ignore
/// let mut ring = FrameRing::new(&device, 2)?;
///
/// loop {
///     let slot = ring.acquire_next_slot().index(); // may block
///     let list = record_frame(&device);
///     ring.submit_with_slot(slot, list, &[])?;
/// }
///
/// ring.wait_idle();
/// ```
pub struct FrameRing {
    device: Arc<GraphicsDevice>,
    slots: Vec<FrameSlot>,
    current: usize,
    /// Whether `current` was acquired and not yet submitted.
    acquired: bool,
    frame_count: u64,
}

impl FrameRing {
    /// Create a ring with `frames_in_flight` slots.
    ///
    /// The first [`acquire_next_slot`](Self::acquire_next_slot) yields slot 0.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(device: &Arc<GraphicsDevice>, frames_in_flight: usize) -> Result<Self, GraphicsError> {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        let slots = (0..frames_in_flight)
            .map(|index| {
                Ok(FrameSlot {
                    index,
                    completion_signal: device
                        .create_binary_signal(Some(&format!("frame{index}_complete")))?,
                    timeline: device.create_timeline_semaphore(Some(&format!("frame{index}")))?,
                    finish_counter: 0,
                })
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        log::debug!("Created frame ring with {} slots", frames_in_flight);

        Ok(Self {
            device: Arc::clone(device),
            slots,
            current: frames_in_flight - 1,
            acquired: false,
            frame_count: 0,
        })
    }

    /// Rotate to the next slot and wait until the GPU is done with it.
    ///
    /// Blocks only if the slot's previous submissions are still executing.
    pub fn acquire_next_slot(&mut self) -> &FrameSlot {
        profile_scope!("acquire_next_slot");

        self.current = (self.current + 1) % self.slots.len();
        self.acquired = true;
        self.frame_count += 1;

        let slot = &self.slots[self.current];
        log::trace!(
            "Acquire frame {} (slot {}), waiting for {:?} >= {}",
            self.frame_count,
            slot.index,
            slot.timeline.label(),
            slot.finish_counter
        );
        slot.timeline.wait_for_value(slot.finish_counter);
        slot
    }

    /// Submit `list` as work of the current slot.
    ///
    /// The submission signals the slot's completion signal and advances its
    /// timeline. Completion signals of any slot that nobody presented are
    /// waited on, so they are never armed twice. `extra_signals` ride along,
    /// e.g. the transfer pool's timeline.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not the slot returned by the last
    /// [`acquire_next_slot`](Self::acquire_next_slot), or if that slot was
    /// already submitted. Each acquire allows exactly one submission.
    pub fn submit_with_slot(
        &mut self,
        slot: usize,
        list: CommandList,
        extra_signals: &[(&TimelineSemaphore, u64)],
    ) -> Result<SubmissionIndex, GraphicsError> {
        profile_scope!("submit_with_slot");

        assert!(slot < self.slots.len(), "Invalid slot index {}", slot);
        assert_eq!(
            slot, self.current,
            "only the current slot {} may be submitted, got {}",
            self.current, slot
        );
        assert!(
            self.acquired,
            "slot {} was not acquired since its last submission; call acquire_next_slot first",
            slot
        );

        let frame = &self.slots[slot];
        let value = frame.finish_counter + 1;

        let mut submission = Submission::new(list);
        for other in &self.slots {
            if other.completion_signal.is_armed() {
                log::trace!(
                    "Slot {} signal was not presented, consumed by slot {}",
                    other.index,
                    slot
                );
                submission = submission.wait(&other.completion_signal);
            }
        }
        submission = submission
            .signal(&frame.completion_signal)
            .signal_timeline(&frame.timeline, value);
        for (timeline, value) in extra_signals {
            submission = submission.signal_timeline(timeline, *value);
        }

        let index = self.device.submit(submission)?;
        self.slots[slot].finish_counter = value;
        self.acquired = false;

        log::trace!(
            "Slot {} submitted as {:?} (finish counter {})",
            slot,
            index,
            value
        );
        Ok(index)
    }

    /// Wait until every submission made with any slot has completed.
    pub fn wait_idle(&self) {
        log::trace!("Waiting for frame ring idle ({} slots)", self.slots.len());
        for slot in &self.slots {
            slot.timeline.wait_for_value(slot.finish_counter);
        }
    }

    /// Whether the GPU is done with slot `index` (non-blocking).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn is_slot_ready(&self, index: usize) -> bool {
        assert!(index < self.slots.len(), "Invalid slot index {}", index);
        self.slots[index].is_ready()
    }

    /// Whether every slot is ready.
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(FrameSlot::is_ready)
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot returned by the last acquire.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The slot returned by the last acquire.
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn slot(&self, index: usize) -> &FrameSlot {
        assert!(index < self.slots.len(), "Invalid slot index {}", index);
        &self.slots[index]
    }

    /// Number of acquired frames.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The device the ring submits to.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        log::debug!("Destroying frame ring after {} frames", self.frame_count);
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during frame ring teardown: {}", e);
        }
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("frames_in_flight", &self.slots.len())
            .field("current", &self.current)
            .field("acquired", &self.acquired)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

static_assertions::assert_impl_all!(FrameRing: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::DeviceDescriptor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn create_test_device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device =
            GraphicsDevice::with_backend(backend.clone(), &DeviceDescriptor::new()).unwrap();
        (backend, device)
    }

    fn submit_frame(ring: &mut FrameRing) -> SubmissionIndex {
        let slot = ring.acquire_next_slot().index();
        let list = ring.device().create_command_encoder().complete();
        ring.submit_with_slot(slot, list, &[]).unwrap()
    }

    #[test]
    #[should_panic(expected = "frames_in_flight must be at least 1")]
    fn test_zero_frames_panics() {
        let (_backend, device) = create_test_device();
        let _ = FrameRing::new(&device, 0);
    }

    #[test]
    fn test_rotation_order() {
        let (_backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 3).unwrap();
        assert_eq!(ring.frames_in_flight(), 3);

        let order: Vec<usize> = (0..7).map(|_| ring.acquire_next_slot().index()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.frame_count(), 7);
    }

    #[test]
    fn test_submit_advances_finish_counter() {
        let (_backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();

        submit_frame(&mut ring);
        submit_frame(&mut ring);
        submit_frame(&mut ring);

        assert_eq!(ring.slot(0).finish_counter(), 2);
        assert_eq!(ring.slot(1).finish_counter(), 1);

        ring.wait_idle();
        assert!(ring.is_idle());
        assert_eq!(ring.slot(0).timeline().value(), 2);
    }

    #[test]
    fn test_unpresented_signals_are_consumed() {
        let (_backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();

        submit_frame(&mut ring);
        assert!(ring.slot(0).completion_signal().is_armed());

        submit_frame(&mut ring);
        assert!(!ring.slot(0).completion_signal().is_armed());
        assert!(ring.slot(1).completion_signal().is_armed());

        // Re-arming slot 0 works because its previous signal was consumed.
        submit_frame(&mut ring);
        assert!(ring.slot(0).completion_signal().is_armed());
    }

    #[test]
    #[should_panic(expected = "only the current slot")]
    fn test_submit_non_current_slot_panics() {
        let (_backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        ring.acquire_next_slot();
        let list = device.create_command_encoder().complete();
        let _ = ring.submit_with_slot(1, list, &[]);
    }

    #[test]
    #[should_panic(expected = "was not acquired")]
    fn test_submit_twice_without_acquire_panics() {
        let (backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        backend.pause();

        let slot = ring.acquire_next_slot().index();
        let list = device.create_command_encoder().complete();
        ring.submit_with_slot(slot, list, &[]).unwrap();

        let list = device.create_command_encoder().complete();
        let _ = ring.submit_with_slot(slot, list, &[]);
    }

    #[test]
    #[should_panic(expected = "was not acquired")]
    fn test_submit_before_first_acquire_panics() {
        let (_backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        let list = device.create_command_encoder().complete();
        let _ = ring.submit_with_slot(1, list, &[]);
    }

    #[test]
    fn test_failed_submit_keeps_slot_acquired() {
        let (backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        let slot = ring.acquire_next_slot().index();

        backend.set_reject_submissions(true);
        let list = device.create_command_encoder().complete();
        assert!(matches!(
            ring.submit_with_slot(slot, list, &[]),
            Err(GraphicsError::DeviceLost)
        ));
        assert_eq!(ring.slot(slot).finish_counter(), 0);
        assert!(!ring.slot(slot).completion_signal().is_armed());

        backend.set_reject_submissions(false);
        let list = device.create_command_encoder().complete();
        ring.submit_with_slot(slot, list, &[]).unwrap();
        assert_eq!(ring.slot(slot).finish_counter(), 1);
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_invalid_slot_panics() {
        let (_backend, device) = create_test_device();
        let ring = FrameRing::new(&device, 2).unwrap();
        ring.is_slot_ready(5);
    }

    #[test]
    fn test_reacquire_blocks_until_slot_completes() {
        let (backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();

        backend.pause();
        submit_frame(&mut ring);
        submit_frame(&mut ring);
        assert!(!ring.is_slot_ready(0));

        let resumed = Arc::new(AtomicBool::new(false));
        let resumer = {
            let backend = backend.clone();
            let resumed = resumed.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                resumed.store(true, Ordering::SeqCst);
                backend.resume();
            })
        };

        let slot = ring.acquire_next_slot();
        assert_eq!(slot.index(), 0);
        assert!(resumed.load(Ordering::SeqCst));
        assert!(slot.timeline().value() >= 1);
        resumer.join().unwrap();
    }

    #[test]
    fn test_extra_signals_ride_along() {
        let (_backend, device) = create_test_device();
        let mut ring = FrameRing::new(&device, 2).unwrap();
        let uploads = device.create_timeline_semaphore(Some("uploads")).unwrap();

        let slot = ring.acquire_next_slot().index();
        let list = device.create_command_encoder().complete();
        ring.submit_with_slot(slot, list, &[(&uploads, 1)]).unwrap();

        uploads.wait_for_value(1);
        assert_eq!(uploads.last_scheduled(), 1);
    }
}
