//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU but behaves like an asynchronous queue:
//! submissions are handed to a worker thread which executes copies and fills
//! on host memory, counts draws and dispatches, and then signals the
//! submission's timelines. CPU code therefore observes the same ordering it
//! would observe on hardware: nothing is done until the timeline says so.
//!
//! [`DummyBackend::pause`] holds the queue back, which lets tests observe the
//! CPU blocking on GPU progress deterministically.

use std::alloc::{self, Layout};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::GraphicsError;
use crate::profiling::{profile_scope, set_thread_name};
use crate::types::BufferDescriptor;

use super::{BackendCommand, GpuBackend, GpuBuffer, GpuSignal, GpuTimeline, SubmitBatch};

/// Alignment of every dummy buffer allocation.
const HOST_MEMORY_ALIGNMENT: usize = 256;

/// Zero-initialized host memory standing in for a device allocation.
pub struct HostMemory {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

// SAFETY: HostMemory owns its allocation. Concurrent access to disjoint
// regions is coordinated through timelines, exactly like device memory.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    /// Allocate `size` zeroed bytes.
    pub fn new(size: u64) -> Result<Self, GraphicsError> {
        let len = usize::try_from(size).map_err(|_| GraphicsError::OutOfMemory)?;
        let layout = Layout::from_size_align(len.max(1), HOST_MEMORY_ALIGNMENT)
            .map_err(|e| GraphicsError::InvalidParameter(e.to_string()))?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(GraphicsError::OutOfMemory)?;
        Ok(Self { ptr, layout, len })
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the allocation.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Timeline state shared between the queue worker and waiting threads.
#[derive(Debug)]
pub struct DummyTimeline {
    value: Mutex<u64>,
    reached: Condvar,
}

impl DummyTimeline {
    fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            reached: Condvar::new(),
        }
    }

    /// Current counter value.
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }

    fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        if value > *current {
            *current = value;
        }
        self.reached.notify_all();
    }

    fn wait(&self, value: u64) {
        let mut current = self.value.lock();
        while *current < value {
            self.reached.wait(&mut current);
        }
    }
}

/// Counters of work executed by the emulated queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Submissions executed.
    pub submissions: u64,
    /// Barriers encountered.
    pub barriers: u64,
    /// Buffer copies executed.
    pub copies: u64,
    /// Total bytes copied.
    pub bytes_copied: u64,
    /// Buffer fills executed.
    pub fills: u64,
    /// Draw commands encountered.
    pub draws: u64,
    /// Dispatch commands encountered.
    pub dispatches: u64,
}

impl DummyStats {
    fn accumulate(&mut self, other: &DummyStats) {
        self.submissions += other.submissions;
        self.barriers += other.barriers;
        self.copies += other.copies;
        self.bytes_copied += other.bytes_copied;
        self.fills += other.fills;
        self.draws += other.draws;
        self.dispatches += other.dispatches;
    }
}

struct DummyJob {
    label: Option<String>,
    commands: Vec<BackendCommand>,
    signal_timelines: Vec<(Arc<DummyTimeline>, u64)>,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<DummyJob>,
    executing: bool,
    paused: bool,
    reject_submissions: bool,
    shutdown: bool,
    stats: DummyStats,
}

#[derive(Default)]
struct DummyQueue {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    idle: Condvar,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    queue: Arc<DummyQueue>,
    worker: Option<JoinHandle<()>>,
    next_signal_id: AtomicU64,
}

impl DummyBackend {
    /// Create a new dummy backend and start its queue worker.
    pub fn new() -> Self {
        let queue = Arc::new(DummyQueue::default());
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("dummy-gpu-queue".to_string())
            .spawn(move || run_queue(worker_queue));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!(
                    "DummyBackend: failed to spawn queue worker ({}), executing submissions inline",
                    e
                );
                None
            }
        };

        Self {
            queue,
            worker,
            next_signal_id: AtomicU64::new(1),
        }
    }

    /// Stop executing submissions until [`resume`](Self::resume) is called.
    ///
    /// Work already executing completes; queued work stays queued.
    pub fn pause(&self) {
        log::trace!("DummyBackend: queue paused");
        self.queue.state.lock().paused = true;
    }

    /// Resume executing submissions.
    pub fn resume(&self) {
        log::trace!("DummyBackend: queue resumed");
        self.queue.state.lock().paused = false;
        self.queue.work_ready.notify_all();
    }

    /// Whether the queue is paused.
    pub fn is_paused(&self) -> bool {
        self.queue.state.lock().paused
    }

    /// Make every following submission fail with [`GraphicsError::DeviceLost`].
    pub fn set_reject_submissions(&self, reject: bool) {
        log::trace!("DummyBackend: reject submissions = {}", reject);
        self.queue.state.lock().reject_submissions = reject;
    }

    /// Number of submissions waiting to execute.
    pub fn pending_submissions(&self) -> usize {
        let state = self.queue.state.lock();
        state.jobs.len() + usize::from(state.executing)
    }

    /// Counters of executed work.
    pub fn stats(&self) -> DummyStats {
        self.queue.state.lock().stats
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.queue.state.lock();
        f.debug_struct("DummyBackend")
            .field("pending", &state.jobs.len())
            .field("paused", &state.paused)
            .field("stats", &state.stats)
            .finish()
    }
}

impl Drop for DummyBackend {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock();
            state.shutdown = true;
            state.paused = false;
        }
        self.queue.work_ready.notify_all();

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("DummyBackend: queue worker panicked");
        }
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Dummy(Arc::new(HostMemory::new(descriptor.size)?)))
    }

    fn map_host_visible(&self, buffer: &GpuBuffer) -> Result<NonNull<u8>, GraphicsError> {
        host_memory(buffer)
            .map(HostMemory::as_ptr)
            .ok_or_else(|| GraphicsError::Internal("map of non-dummy buffer".to_string()))
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<GpuTimeline, GraphicsError> {
        Ok(GpuTimeline::Dummy(Arc::new(DummyTimeline::new(
            initial_value,
        ))))
    }

    fn create_binary_signal(&self) -> Result<GpuSignal, GraphicsError> {
        let id = self.next_signal_id.fetch_add(1, Ordering::Relaxed);
        Ok(GpuSignal::Dummy { id })
    }

    fn timeline_value(&self, timeline: &GpuTimeline) -> Result<u64, GraphicsError> {
        dummy_timeline(timeline).map(|t| t.value())
    }

    fn wait_timeline(&self, timeline: &GpuTimeline, value: u64) -> Result<(), GraphicsError> {
        dummy_timeline(timeline)?.wait(value);
        Ok(())
    }

    fn submit(&self, batch: SubmitBatch<'_>) -> Result<(), GraphicsError> {
        if self.queue.state.lock().reject_submissions {
            log::trace!("DummyBackend: rejected submission {:?}", batch.label);
            return Err(GraphicsError::DeviceLost);
        }

        let signal_timelines = batch
            .signal_timelines
            .iter()
            .map(|(timeline, value)| Ok((Arc::clone(dummy_timeline(timeline)?), *value)))
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        log::trace!(
            "DummyBackend: submit {:?} ({} commands, {} waits, {} signals, {} timeline signals)",
            batch.label,
            batch.commands.len(),
            batch.wait_signals.len(),
            batch.signal_signals.len(),
            signal_timelines.len()
        );

        let job = DummyJob {
            label: batch.label.map(str::to_owned),
            commands: batch.commands,
            signal_timelines,
        };

        if self.worker.is_none() {
            complete_job(&self.queue, job);
            return Ok(());
        }

        self.queue.state.lock().jobs.push_back(job);
        self.queue.work_ready.notify_one();
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let mut state = self.queue.state.lock();
        while !state.jobs.is_empty() || state.executing {
            if state.paused && !state.executing {
                return Err(GraphicsError::Internal(
                    "wait_idle on a paused dummy queue would never return".to_string(),
                ));
            }
            self.queue.idle.wait(&mut state);
        }
        Ok(())
    }
}

fn host_memory(buffer: &GpuBuffer) -> Option<&HostMemory> {
    match buffer {
        GpuBuffer::Dummy(memory) => Some(memory),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn dummy_timeline(timeline: &GpuTimeline) -> Result<&Arc<DummyTimeline>, GraphicsError> {
    match timeline {
        GpuTimeline::Dummy(timeline) => Ok(timeline),
        #[allow(unreachable_patterns)]
        _ => Err(GraphicsError::Internal(
            "non-dummy timeline passed to dummy backend".to_string(),
        )),
    }
}

fn run_queue(queue: Arc<DummyQueue>) {
    set_thread_name!("dummy-gpu-queue");

    loop {
        let job = {
            let mut state = queue.state.lock();
            loop {
                if !state.paused
                    && let Some(job) = state.jobs.pop_front()
                {
                    state.executing = true;
                    break job;
                }
                if state.shutdown {
                    return;
                }
                queue.work_ready.wait(&mut state);
            }
        };

        complete_job(&queue, job);
    }
}

/// Execute a job, then publish its stats and timeline signals.
fn complete_job(queue: &DummyQueue, job: DummyJob) {
    let stats = execute_commands(&job);

    let mut state = queue.state.lock();
    state.stats.accumulate(&stats);
    for (timeline, value) in &job.signal_timelines {
        timeline.signal(*value);
    }
    state.executing = false;
    queue.idle.notify_all();
}

fn execute_commands(job: &DummyJob) -> DummyStats {
    profile_scope!("dummy_execute");

    log::trace!(
        "DummyBackend: executing {:?} ({} commands)",
        job.label,
        job.commands.len()
    );

    let mut stats = DummyStats {
        submissions: 1,
        ..Default::default()
    };

    for command in &job.commands {
        match command {
            // The queue executes serially, so dependencies are already satisfied.
            BackendCommand::Barrier { .. } => stats.barriers += 1,
            BackendCommand::CopyBuffer { src, dst, region } => {
                let (Some(src), Some(dst)) = (host_memory(src), host_memory(dst)) else {
                    log::error!("DummyBackend: copy between non-dummy buffers skipped");
                    continue;
                };
                // SAFETY: ranges were bounds-checked at submission; ptr::copy
                // tolerates overlap within one buffer.
                unsafe {
                    std::ptr::copy(
                        src.as_ptr().as_ptr().add(region.src_offset as usize),
                        dst.as_ptr().as_ptr().add(region.dst_offset as usize),
                        region.size as usize,
                    );
                }
                stats.copies += 1;
                stats.bytes_copied += region.size;
            }
            BackendCommand::FillBuffer {
                dst,
                offset,
                size,
                value,
            } => {
                let Some(dst) = host_memory(dst) else {
                    log::error!("DummyBackend: fill of non-dummy buffer skipped");
                    continue;
                };
                let pattern = value.to_ne_bytes();
                // SAFETY: range was bounds-checked at submission.
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(
                        dst.as_ptr().as_ptr().add(*offset as usize),
                        *size as usize,
                    )
                };
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = pattern[i % pattern.len()];
                }
                stats.fills += 1;
            }
            BackendCommand::BindPipeline(pipeline) => {
                log::trace!("DummyBackend: bind pipeline {:?}", pipeline);
            }
            BackendCommand::Draw { .. } => stats.draws += 1,
            BackendCommand::Dispatch { .. } => stats.dispatches += 1,
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferCopyRegion, BufferUsage};
    use std::time::Duration;

    fn staging(backend: &DummyBackend, size: u64) -> Arc<GpuBuffer> {
        Arc::new(
            backend
                .create_buffer(&BufferDescriptor::new(size, BufferUsage::MAP_WRITE))
                .unwrap(),
        )
    }

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }

    #[test]
    fn test_buffers_start_zeroed() {
        let backend = DummyBackend::new();
        let buffer = staging(&backend, 64);
        let ptr = backend.map_host_visible(&buffer).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copy_then_signal() {
        let backend = DummyBackend::new();
        let src = staging(&backend, 16);
        let dst = staging(&backend, 16);
        let timeline = backend.create_timeline_semaphore(0).unwrap();

        let src_ptr = backend.map_host_visible(&src).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([7u8; 16].as_ptr(), src_ptr.as_ptr(), 16) };

        backend
            .submit(SubmitBatch {
                commands: vec![BackendCommand::CopyBuffer {
                    src: Arc::clone(&src),
                    dst: Arc::clone(&dst),
                    region: BufferCopyRegion::new(0, 0, 16),
                }],
                signal_timelines: vec![(&timeline, 1)],
                ..Default::default()
            })
            .unwrap();

        backend.wait_timeline(&timeline, 1).unwrap();
        assert_eq!(backend.timeline_value(&timeline).unwrap(), 1);

        let dst_ptr = backend.map_host_visible(&dst).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(dst_ptr.as_ptr(), 16) };
        assert_eq!(bytes, &[7u8; 16]);
        assert_eq!(backend.stats().bytes_copied, 16);
    }

    #[test]
    fn test_fill_pattern() {
        let backend = DummyBackend::new();
        let dst = staging(&backend, 8);
        backend
            .submit(SubmitBatch {
                commands: vec![BackendCommand::FillBuffer {
                    dst: Arc::clone(&dst),
                    offset: 0,
                    size: 8,
                    value: 0xAABB_CCDD,
                }],
                ..Default::default()
            })
            .unwrap();
        backend.wait_idle().unwrap();

        let ptr = backend.map_host_visible(&dst).unwrap();
        let words = unsafe { std::slice::from_raw_parts(ptr.as_ptr() as *const u32, 2) };
        assert_eq!(words, &[0xAABB_CCDD, 0xAABB_CCDD]);
    }

    #[test]
    fn test_pause_holds_timeline() {
        let backend = DummyBackend::new();
        let timeline = backend.create_timeline_semaphore(0).unwrap();

        backend.pause();
        backend
            .submit(SubmitBatch {
                signal_timelines: vec![(&timeline, 5)],
                ..Default::default()
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.timeline_value(&timeline).unwrap(), 0);
        assert_eq!(backend.pending_submissions(), 1);
        assert!(backend.wait_idle().is_err());

        backend.resume();
        backend.wait_timeline(&timeline, 5).unwrap();
        backend.wait_idle().unwrap();
        assert_eq!(backend.pending_submissions(), 0);
    }

    #[test]
    fn test_draw_and_dispatch_counted() {
        let backend = DummyBackend::new();
        backend
            .submit(SubmitBatch {
                commands: vec![
                    BackendCommand::Draw {
                        vertex_count: 3,
                        instance_count: 1,
                        first_vertex: 0,
                        first_instance: 0,
                    },
                    BackendCommand::Dispatch { x: 8, y: 8, z: 1 },
                    BackendCommand::Dispatch { x: 1, y: 1, z: 1 },
                ],
                ..Default::default()
            })
            .unwrap();
        backend.wait_idle().unwrap();

        let stats = backend.stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.dispatches, 2);
    }

    #[test]
    fn test_signal_ids_unique() {
        let backend = DummyBackend::new();
        let (GpuSignal::Dummy { id: a }, GpuSignal::Dummy { id: b }) = (
            backend.create_binary_signal().unwrap(),
            backend.create_binary_signal().unwrap(),
        ) else {
            unreachable!();
        };
        assert_ne!(a, b);
    }
}
