//! Graphics device.
//!
//! The [`GraphicsDevice`] is the explicit context object of the crate. It owns
//! the backend, the buffer table, the submission timeline and the garbage
//! collector, and every other component holds an `Arc` to it.
//!
//! # Submission Timeline
//!
//! Every submission gets the next [`SubmissionIndex`] and signals the
//! device's internal timeline semaphore to that index on completion:
//!
//! ```text
//! submit()  ──► index 1 ──► index 2 ──► index 3
//!                 │           │           │
//! GPU             ▼           ▼           ▼
//! timeline:       1 ───────── 2 ───────── 3
//! ```
//!
//! "Has submission N finished" is then a timeline query, and buffers destroyed
//! after submission N are released once the timeline reaches N.
//!
//! # Teardown
//!
//! Dropping the device waits for the GPU to go idle, releases every pending
//! destruction unconditionally, then drops the remaining buffers and finally
//! the backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;

use crate::backend::{self, BackendCommand, GpuBackend, GpuTimeline, SubmitBatch};
use crate::command::{Command, CommandEncoder, CommandList};
use crate::config::DeviceDescriptor;
use crate::error::GraphicsError;
use crate::gc::{GarbageCollector, Resource};
use crate::profiling::profile_scope;
use crate::resources::{BufferEntry, BufferId, HostAddress};
use crate::sync::{BinarySignal, TimelineSemaphore};
use crate::types::BufferDescriptor;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum buffer size.
    pub max_buffer_size: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_buffer_size: 1 << 30, // 1 GB
        }
    }
}

/// Index of a device submission, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubmissionIndex(pub u64);

impl SubmissionIndex {
    /// The raw index.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// A command list with the semaphores its submission waits on and signals.
///
/// # Example
///
/// ```ignore
/// let submission = Submission::new(list)
///     .wait(&image_acquired)
///     .signal(&render_finished)
///     .signal_timeline(&frame_timeline, frame_value);
/// device.submit(submission)?;
/// ```
#[derive(Debug)]
pub struct Submission<'a> {
    list: CommandList,
    waits: Vec<&'a BinarySignal>,
    signals: Vec<&'a BinarySignal>,
    timeline_signals: Vec<(&'a TimelineSemaphore, u64)>,
}

impl<'a> Submission<'a> {
    /// Submit `list` with no extra synchronization.
    pub fn new(list: CommandList) -> Self {
        Self {
            list,
            waits: Vec::new(),
            signals: Vec::new(),
            timeline_signals: Vec::new(),
        }
    }

    /// Wait on an armed binary signal before executing.
    pub fn wait(mut self, signal: &'a BinarySignal) -> Self {
        self.waits.push(signal);
        self
    }

    /// Signal a binary signal on completion.
    pub fn signal(mut self, signal: &'a BinarySignal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Signal `timeline` to `value` on completion.
    pub fn signal_timeline(mut self, timeline: &'a TimelineSemaphore, value: u64) -> Self {
        self.timeline_signals.push((timeline, value));
        self
    }
}

/// A graphics device for creating GPU resources and submitting work.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and can be safely shared across threads.
/// Submissions are serialized by an internal mutex so submission indices and
/// the submission timeline stay in lock-step.
///
/// # Example
///
/// ```ignore
/// let device = GraphicsDevice::new(&DeviceDescriptor::new())?;
///
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::COPY_DST))?;
/// let mut encoder = device.create_command_encoder();
/// encoder.fill_buffer(buffer, 0, 1024, 0);
/// device.submit(Submission::new(encoder.complete()))?;
/// ```
pub struct GraphicsDevice {
    id: u64,
    name: String,
    label: Option<String>,
    capabilities: DeviceCapabilities,
    buffers: RwLock<SlotMap<BufferId, BufferEntry>>,
    /// Index of the last issued submission.
    last_submission: Mutex<u64>,
    submission_timeline: TimelineSemaphore,
    garbage: GarbageCollector,
    // Dropped last: every handle above may refer to backend objects.
    backend: Arc<dyn GpuBackend>,
}

impl GraphicsDevice {
    /// Create a device with the backend selected by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized.
    pub fn new(descriptor: &DeviceDescriptor) -> Result<Arc<Self>, GraphicsError> {
        let backend = backend::create_backend(descriptor.backend, descriptor.validation)?;
        Self::with_backend(backend, descriptor)
    }

    /// Create a device on top of an existing backend.
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let submission_timeline =
            TimelineSemaphore::new(Arc::clone(&backend), Some("submission_timeline".into()))?;
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let name = backend.name().to_string();

        log::info!(
            "Created graphics device {} ({:?}) on {}",
            id,
            descriptor.label,
            name
        );

        Ok(Arc::new(Self {
            id,
            name,
            label: descriptor.label.clone(),
            capabilities: DeviceCapabilities::default(),
            buffers: RwLock::new(SlotMap::with_key()),
            last_submission: Mutex::new(0),
            submission_timeline,
            garbage: GarbageCollector::new(),
            backend,
        }))
    }

    /// Unique identifier of this device.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Get the device capabilities.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Create a GPU buffer.
    ///
    /// Host-visible buffers (`MAP_READ` / `MAP_WRITE`) are persistently mapped.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size exceeds device limits or allocation fails.
    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, GraphicsError> {
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let raw = self.backend.create_buffer(descriptor)?;
        let host_address = if descriptor.usage.is_host_visible() {
            Some(HostAddress(self.backend.map_host_visible(&raw)?))
        } else {
            None
        };

        let id = self.buffers.write().insert(BufferEntry {
            raw: Arc::new(raw),
            descriptor: descriptor.clone(),
            host_address,
            pending_destroy: false,
        });

        log::trace!(
            "GraphicsDevice: created buffer {:?} {:?}, size={}",
            id,
            descriptor.label,
            descriptor.size
        );

        Ok(id)
    }

    /// Size of a buffer, or `None` if it was released.
    pub fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.read().get(id).map(|entry| entry.descriptor.size)
    }

    /// Descriptor a buffer was created with, or `None` if it was released.
    pub fn buffer_descriptor(&self, id: BufferId) -> Option<BufferDescriptor> {
        self.buffers
            .read()
            .get(id)
            .map(|entry| entry.descriptor.clone())
    }

    /// Whether the buffer's table slot is still occupied.
    ///
    /// A destroyed buffer stays alive until garbage collection releases it.
    pub fn is_buffer_alive(&self, id: BufferId) -> bool {
        self.buffers.read().contains_key(id)
    }

    /// Number of buffers in the table, including those pending destruction.
    pub fn buffer_count(&self) -> usize {
        self.buffers.read().len()
    }

    pub(crate) fn host_address(&self, id: BufferId) -> Option<HostAddress> {
        self.buffers.read().get(id).and_then(|entry| entry.host_address)
    }

    /// Write `data` into a host-visible buffer at `offset`.
    ///
    /// The caller must make sure no submission in flight reads or writes the
    /// range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for unknown or device-local buffers and for
    /// ranges outside the buffer.
    pub fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let address = self.mapped_range(id, offset, data.len() as u64)?;
        // SAFETY: the range was checked against the buffer size.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), address.add(offset).as_ptr(), data.len());
        }
        Ok(())
    }

    /// Read a host-visible buffer at `offset` into `data`.
    ///
    /// Wait for the submissions writing the range before reading.
    ///
    /// # Errors
    ///
    /// Same as [`write_buffer`](Self::write_buffer).
    pub fn read_buffer(&self, id: BufferId, offset: u64, data: &mut [u8]) -> Result<(), GraphicsError> {
        let address = self.mapped_range(id, offset, data.len() as u64)?;
        // SAFETY: the range was checked against the buffer size.
        unsafe {
            std::ptr::copy_nonoverlapping(
                address.add(offset).as_ptr(),
                data.as_mut_ptr(),
                data.len(),
            );
        }
        Ok(())
    }

    fn mapped_range(&self, id: BufferId, offset: u64, size: u64) -> Result<HostAddress, GraphicsError> {
        let buffers = self.buffers.read();
        let entry = buffers.get(id).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {id:?}"))
        })?;
        let address = entry.host_address.ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "buffer {:?} ({:?}) is not host visible",
                id, entry.descriptor.label
            ))
        })?;
        if offset
            .checked_add(size)
            .is_none_or(|end| end > entry.descriptor.size)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "range {}..{} out of bounds of buffer of {} bytes",
                offset,
                offset.saturating_add(size),
                entry.descriptor.size
            )));
        }
        Ok(address)
    }

    // ========================================================================
    // Synchronization objects and recording
    // ========================================================================

    /// Create a timeline semaphore starting at 0.
    pub fn create_timeline_semaphore(
        &self,
        label: Option<&str>,
    ) -> Result<TimelineSemaphore, GraphicsError> {
        TimelineSemaphore::new(Arc::clone(&self.backend), label.map(str::to_owned))
    }

    /// Create an unarmed binary signal.
    pub fn create_binary_signal(&self, label: Option<&str>) -> Result<BinarySignal, GraphicsError> {
        BinarySignal::new(Arc::clone(&self.backend), label.map(str::to_owned))
    }

    /// Start recording commands.
    pub fn create_command_encoder(self: &Arc<Self>) -> CommandEncoder {
        CommandEncoder::new(Arc::clone(self))
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a command list.
    ///
    /// Everything is validated before the backend sees the submission; when
    /// the backend rejects it, no semaphore state changes.
    ///
    /// Timeline values are scheduled before the backend call, so a waiter on
    /// another thread never observes a queued value as unscheduled. They are
    /// rolled back if the backend rejects the submission.
    ///
    /// # Errors
    ///
    /// Returns the backend error, e.g. [`GraphicsError::DeviceLost`].
    ///
    /// # Panics
    ///
    /// Panics on protocol violations: a list recorded for another device, a
    /// buffer that was destroyed, an out-of-bounds range, waiting on an unarmed
    /// binary signal, arming an armed one, or a non-increasing timeline value.
    pub fn submit(&self, submission: Submission<'_>) -> Result<SubmissionIndex, GraphicsError> {
        profile_scope!("submit");

        let Submission {
            list,
            waits,
            signals,
            timeline_signals,
        } = submission;

        assert_eq!(
            list.device_id, self.id,
            "command list {:?} was recorded for another device",
            list.label
        );

        let mut last_submission = self.last_submission.lock();
        let index = *last_submission + 1;

        let commands = self.resolve_commands(&list);
        self.check_semaphores(&waits, &signals, &timeline_signals);

        let mut signal_timelines: Vec<(&GpuTimeline, u64)> = timeline_signals
            .iter()
            .map(|(timeline, value)| (timeline.raw(), *value))
            .collect();
        signal_timelines.push((self.submission_timeline.raw(), index));

        let previous: Vec<u64> = timeline_signals
            .iter()
            .map(|(timeline, _)| timeline.last_scheduled())
            .collect();
        for (timeline, value) in &timeline_signals {
            timeline.signal_on_submission(*value);
        }
        self.submission_timeline.signal_on_submission(index);

        let result = self.backend.submit(SubmitBatch {
            label: list.label.as_deref(),
            commands,
            wait_signals: waits.iter().map(|signal| signal.raw()).collect(),
            signal_signals: signals.iter().map(|signal| signal.raw()).collect(),
            signal_timelines,
        });

        if let Err(e) = result {
            self.submission_timeline.unschedule(index, index - 1);
            for ((timeline, value), last) in timeline_signals.iter().zip(previous).rev() {
                timeline.unschedule(*value, last);
            }
            log::warn!("Submission {:?} rejected by the backend: {}", list.label, e);
            return Err(e);
        }

        for wait in &waits {
            wait.consume();
        }
        for signal in &signals {
            signal.arm();
        }
        *last_submission = index;

        log::trace!(
            "Submitted {:?} as submission {} ({} commands)",
            list.label,
            index,
            list.commands.len()
        );

        Ok(SubmissionIndex(index))
    }

    fn resolve_commands(&self, list: &CommandList) -> Vec<BackendCommand> {
        let buffers = self.buffers.read();
        let label = list.label.as_deref();

        list.commands
            .iter()
            .map(|command| match command {
                Command::PipelineBarrier { src, dst } => BackendCommand::Barrier {
                    src: *src,
                    dst: *dst,
                },
                Command::CopyBufferToBuffer { src, dst, region } => {
                    let src_entry = resolve_buffer(&buffers, *src, label);
                    let dst_entry = resolve_buffer(&buffers, *dst, label);
                    assert!(
                        region.src_end() <= src_entry.descriptor.size
                            && region.dst_end() <= dst_entry.descriptor.size,
                        "command list {label:?}: copy {region:?} out of bounds"
                    );
                    BackendCommand::CopyBuffer {
                        src: Arc::clone(&src_entry.raw),
                        dst: Arc::clone(&dst_entry.raw),
                        region: *region,
                    }
                }
                Command::FillBuffer {
                    dst,
                    offset,
                    size,
                    value,
                } => {
                    let entry = resolve_buffer(&buffers, *dst, label);
                    assert!(
                        offset + size <= entry.descriptor.size,
                        "command list {label:?}: fill {offset}..{} out of bounds",
                        offset + size
                    );
                    BackendCommand::FillBuffer {
                        dst: Arc::clone(&entry.raw),
                        offset: *offset,
                        size: *size,
                        value: *value,
                    }
                }
                Command::BindPipeline(pipeline) => BackendCommand::BindPipeline(*pipeline),
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => BackendCommand::Draw {
                    vertex_count: *vertex_count,
                    instance_count: *instance_count,
                    first_vertex: *first_vertex,
                    first_instance: *first_instance,
                },
                Command::Dispatch { x, y, z } => BackendCommand::Dispatch {
                    x: *x,
                    y: *y,
                    z: *z,
                },
            })
            .collect()
    }

    fn check_semaphores(
        &self,
        waits: &[&BinarySignal],
        signals: &[&BinarySignal],
        timeline_signals: &[(&TimelineSemaphore, u64)],
    ) {
        for (i, wait) in waits.iter().enumerate() {
            assert!(
                wait.is_armed(),
                "submission waits on binary signal {} ({:?}) which no submission signals",
                wait.id(),
                wait.label()
            );
            assert!(
                !waits[..i].iter().any(|other| other.ptr_eq(wait)),
                "binary signal {} waited on twice in one submission",
                wait.id()
            );
        }

        for (i, signal) in signals.iter().enumerate() {
            let consumed_here = waits.iter().any(|wait| wait.ptr_eq(signal));
            assert!(
                !signal.is_armed() || consumed_here,
                "binary signal {} ({:?}) is already armed; wait on it before signalling it again",
                signal.id(),
                signal.label()
            );
            assert!(
                !signals[..i].iter().any(|other| other.ptr_eq(signal)),
                "binary signal {} signalled twice in one submission",
                signal.id()
            );
        }

        for (i, (timeline, value)) in timeline_signals.iter().enumerate() {
            assert!(
                !timeline.ptr_eq(&self.submission_timeline),
                "the submission timeline is signalled by the device only"
            );
            assert!(
                !timeline_signals[..i]
                    .iter()
                    .any(|(other, _)| other.ptr_eq(timeline)),
                "timeline {} signalled twice in one submission",
                timeline.id()
            );
            timeline.check_signal_value(*value);
        }
    }

    /// The timeline signalled to each submission's index on completion.
    pub fn submission_timeline(&self) -> &TimelineSemaphore {
        &self.submission_timeline
    }

    /// Index of the last issued submission (0 if none).
    pub fn last_submission(&self) -> SubmissionIndex {
        SubmissionIndex(*self.last_submission.lock())
    }

    /// Index of the last submission the GPU has finished.
    pub fn completed_submission(&self) -> SubmissionIndex {
        SubmissionIndex(self.submission_timeline.value())
    }

    /// Whether the GPU has finished `index`.
    pub fn is_submission_complete(&self, index: SubmissionIndex) -> bool {
        self.submission_timeline.is_reached(index.0)
    }

    /// Block until the GPU has finished `index`.
    pub fn wait_for_submission(&self, index: SubmissionIndex) {
        self.submission_timeline.wait_for_value(index.0);
    }

    /// Block until the GPU has executed everything submitted so far.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::DeviceLost`] if the device was lost.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        profile_scope!("device_wait_idle");
        log::trace!("Waiting for device idle");
        self.backend.wait_idle()
    }

    // ========================================================================
    // Deferred destruction
    // ========================================================================

    /// Destroy a buffer once every submission issued so far has completed.
    ///
    /// The id stays valid until garbage collection releases it, but
    /// submitting a list that uses it panics from now on.
    pub fn destroy_buffer(&self, id: BufferId) {
        self.destroy(Resource::Buffer(id));
    }

    /// Destroy a resource once every submission issued so far has completed.
    pub fn destroy(&self, resource: Resource) {
        if let Resource::Buffer(id) = &resource
            && !self.mark_destroyed(*id)
        {
            return;
        }

        let last = *self.last_submission.lock();
        self.garbage
            .destroy(resource, &self.submission_timeline, last);
    }

    /// Destroy a resource once `timeline` reaches `value`.
    pub fn destroy_after(&self, resource: Resource, timeline: &TimelineSemaphore, value: u64) {
        if let Resource::Buffer(id) = &resource
            && !self.mark_destroyed(*id)
        {
            return;
        }

        self.garbage.destroy(resource, timeline, value);
    }

    fn mark_destroyed(&self, id: BufferId) -> bool {
        let mut buffers = self.buffers.write();
        match buffers.get_mut(id) {
            Some(entry) if !entry.pending_destroy => {
                entry.pending_destroy = true;
                true
            }
            Some(entry) => {
                log::warn!(
                    "Buffer {:?} ({:?}) destroyed twice",
                    id,
                    entry.descriptor.label
                );
                false
            }
            None => {
                log::warn!("Destroy of unknown buffer {:?}", id);
                false
            }
        }
    }

    /// Release every deferred destruction whose timeline was reached.
    ///
    /// Non-blocking. Returns the number of released resources.
    pub fn collect_garbage(&self) -> usize {
        self.garbage
            .collect_garbage(|resource| self.release(resource))
    }

    /// Number of deferred destructions not yet released.
    pub fn pending_destructions(&self) -> usize {
        self.garbage.pending_count()
    }

    fn release(&self, resource: Resource) {
        match resource {
            Resource::Buffer(id) => {
                if let Some(entry) = self.buffers.write().remove(id) {
                    log::trace!(
                        "Released buffer {:?} ({:?})",
                        id,
                        entry.descriptor.label
                    );
                }
            }
            Resource::Timeline(timeline) => {
                log::trace!("Released timeline semaphore {}", timeline.id());
            }
            Resource::Signal(signal) => {
                log::trace!("Released binary signal {}", signal.id());
            }
        }
    }
}

fn resolve_buffer<'a>(
    buffers: &'a SlotMap<BufferId, BufferEntry>,
    id: BufferId,
    label: Option<&str>,
) -> &'a BufferEntry {
    let entry = buffers.get(id).unwrap_or_else(|| {
        panic!("command list {label:?} references unknown or released buffer {id:?}")
    });
    assert!(
        !entry.pending_destroy,
        "command list {:?} uses buffer {:?} ({:?}) after destroy",
        label, id, entry.descriptor.label
    );
    entry
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to wait for device idle during teardown: {}", e);
        }

        let flushed = self.garbage.flush_all(|resource| self.release(resource));
        let remaining = self.buffers.get_mut().len();
        log::debug!(
            "Destroying graphics device {} ({} deferred destructions flushed, {} buffers left)",
            self.id,
            flushed,
            remaining
        );
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("label", &self.label)
            .field("buffers", &self.buffer_count())
            .field("last_submission", &self.last_submission())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::BackendType;
    use crate::types::BufferUsage;

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(&DeviceDescriptor::new().with_backend(BackendType::Dummy)).unwrap()
    }

    fn create_paused_device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device =
            GraphicsDevice::with_backend(backend.clone(), &DeviceDescriptor::new()).unwrap();
        backend.pause();
        (backend, device)
    }

    fn empty_list(device: &Arc<GraphicsDevice>) -> CommandList {
        device.create_command_encoder().complete()
    }

    #[test]
    fn test_device_creation() {
        let device = create_test_device();
        assert_eq!(device.name(), "Dummy Backend");
        assert_eq!(device.buffer_count(), 0);
        assert_eq!(device.last_submission(), SubmissionIndex(0));
        assert_eq!(device.completed_submission(), SubmissionIndex(0));
    }

    #[test]
    fn test_buffer_validation() {
        let device = create_test_device();
        assert!(
            device
                .create_buffer(&BufferDescriptor::new(0, BufferUsage::COPY_DST))
                .is_err()
        );
        assert!(
            device
                .create_buffer(&BufferDescriptor::new(2 << 30, BufferUsage::COPY_DST))
                .is_err()
        );
    }

    #[test]
    fn test_write_and_read_host_visible() {
        let device = create_test_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();

        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        let mut data = [0u8; 8];
        device.read_buffer(buffer, 0, &mut data).unwrap();
        assert_eq!(data, [0, 0, 0, 0, 1, 2, 3, 4]);

        assert!(device.write_buffer(buffer, 14, &[0; 4]).is_err());
    }

    #[test]
    fn test_write_device_local_fails() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap();
        assert!(matches!(
            device.write_buffer(buffer, 0, &[0; 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_submission_indices_increase() {
        let device = create_test_device();
        let first = device.submit(Submission::new(empty_list(&device))).unwrap();
        let second = device.submit(Submission::new(empty_list(&device))).unwrap();
        assert_eq!(first, SubmissionIndex(1));
        assert_eq!(second, SubmissionIndex(2));

        device.wait_for_submission(second);
        assert!(device.is_submission_complete(first));
        assert_eq!(device.completed_submission(), second);
    }

    #[test]
    fn test_rejected_submission_changes_no_state() {
        let backend = Arc::new(DummyBackend::new());
        let device =
            GraphicsDevice::with_backend(backend.clone(), &DeviceDescriptor::new()).unwrap();
        let timeline = device.create_timeline_semaphore(Some("uploads")).unwrap();
        let done = device.create_binary_signal(Some("done")).unwrap();

        backend.set_reject_submissions(true);
        let result = device.submit(
            Submission::new(empty_list(&device))
                .signal(&done)
                .signal_timeline(&timeline, 1),
        );
        assert!(matches!(result, Err(GraphicsError::DeviceLost)));
        assert_eq!(timeline.last_scheduled(), 0);
        assert_eq!(device.submission_timeline().last_scheduled(), 0);
        assert_eq!(device.last_submission(), SubmissionIndex(0));
        assert!(!done.is_armed());

        backend.set_reject_submissions(false);
        let index = device
            .submit(
                Submission::new(empty_list(&device))
                    .signal(&done)
                    .signal_timeline(&timeline, 1),
            )
            .unwrap();
        assert_eq!(index, SubmissionIndex(1));
        timeline.wait_for_value(1);
        assert!(done.is_armed());
    }

    #[test]
    fn test_copy_round_trip() {
        let device = create_test_device();
        let src = device.create_buffer(&BufferDescriptor::staging(8)).unwrap();
        let dst = device.create_buffer(&BufferDescriptor::readback(8)).unwrap();
        device.write_buffer(src, 0, &[9; 8]).unwrap();

        let mut encoder = device.create_command_encoder();
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, 8);
        device.submit(Submission::new(encoder.complete())).unwrap();
        device.wait_idle().unwrap();

        let mut data = [0u8; 8];
        device.read_buffer(dst, 0, &mut data).unwrap();
        assert_eq!(data, [9; 8]);
    }

    #[test]
    #[should_panic(expected = "recorded for another device")]
    fn test_list_from_other_device_panics() {
        let device = create_test_device();
        let other = create_test_device();
        device.submit(Submission::new(empty_list(&other))).unwrap();
    }

    #[test]
    #[should_panic(expected = "after destroy")]
    fn test_use_after_destroy_panics() {
        let device = create_test_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();

        let mut encoder = device.create_command_encoder();
        encoder.fill_buffer(buffer, 0, 16, 0);
        device.destroy_buffer(buffer);
        device.submit(Submission::new(encoder.complete())).unwrap();
    }

    #[test]
    #[should_panic(expected = "unknown or released buffer")]
    fn test_released_buffer_panics() {
        let device = create_test_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();

        let mut encoder = device.create_command_encoder();
        encoder.fill_buffer(buffer, 0, 16, 0);
        device.destroy_buffer(buffer);
        device.collect_garbage();
        device.submit(Submission::new(encoder.complete())).unwrap();
    }

    #[test]
    fn test_destroy_waits_for_in_flight_submission() {
        let (backend, device) = create_paused_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();

        let mut encoder = device.create_command_encoder();
        encoder.fill_buffer(buffer, 0, 16, 1);
        device.submit(Submission::new(encoder.complete())).unwrap();
        device.destroy_buffer(buffer);

        assert_eq!(device.collect_garbage(), 0);
        assert!(device.is_buffer_alive(buffer));
        assert_eq!(device.pending_destructions(), 1);

        backend.resume();
        device.wait_idle().unwrap();
        assert_eq!(device.collect_garbage(), 1);
        assert!(!device.is_buffer_alive(buffer));
    }

    #[test]
    fn test_destroy_twice_is_ignored() {
        let device = create_test_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();
        device.destroy_buffer(buffer);
        device.destroy_buffer(buffer);
        assert_eq!(device.pending_destructions(), 1);
    }

    #[test]
    fn test_destroy_after_user_timeline() {
        let device = create_test_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();
        let timeline = device.create_timeline_semaphore(Some("user")).unwrap();

        device.destroy_after(Resource::Buffer(buffer), &timeline, 1);
        assert_eq!(device.collect_garbage(), 0);

        device
            .submit(Submission::new(empty_list(&device)).signal_timeline(&timeline, 1))
            .unwrap();
        timeline.wait_for_value(1);
        assert_eq!(device.collect_garbage(), 1);
        assert!(!device.is_buffer_alive(buffer));
    }

    #[test]
    fn test_binary_signal_protocol() {
        let device = create_test_device();
        let signal = device.create_binary_signal(Some("render_done")).unwrap();

        device
            .submit(Submission::new(empty_list(&device)).signal(&signal))
            .unwrap();
        assert!(signal.is_armed());

        // Waiting and re-signalling in one submission keeps it armed.
        device
            .submit(
                Submission::new(empty_list(&device))
                    .wait(&signal)
                    .signal(&signal),
            )
            .unwrap();
        assert!(signal.is_armed());

        device
            .submit(Submission::new(empty_list(&device)).wait(&signal))
            .unwrap();
        assert!(!signal.is_armed());
    }

    #[test]
    #[should_panic(expected = "which no submission signals")]
    fn test_wait_on_unarmed_signal_panics() {
        let device = create_test_device();
        let signal = device.create_binary_signal(None).unwrap();
        device
            .submit(Submission::new(empty_list(&device)).wait(&signal))
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "already armed")]
    fn test_double_arm_panics() {
        let device = create_test_device();
        let signal = device.create_binary_signal(None).unwrap();
        device
            .submit(Submission::new(empty_list(&device)).signal(&signal))
            .unwrap();
        device
            .submit(Submission::new(empty_list(&device)).signal(&signal))
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn test_non_monotonic_timeline_panics() {
        let device = create_test_device();
        let timeline = device.create_timeline_semaphore(None).unwrap();
        device
            .submit(Submission::new(empty_list(&device)).signal_timeline(&timeline, 2))
            .unwrap();
        device
            .submit(Submission::new(empty_list(&device)).signal_timeline(&timeline, 1))
            .unwrap();
    }

    #[test]
    fn test_teardown_flushes_pending() {
        let (backend, device) = create_paused_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();
        device.submit(Submission::new(empty_list(&device))).unwrap();
        device.destroy_buffer(buffer);
        backend.resume();
        drop(device);
        assert_eq!(backend.pending_submissions(), 0);
    }
}
