//! Transfer memory pool for streaming data to the GPU.
//!
//! The pool owns one host-visible buffer and hands out sub-allocations from it
//! in ring order. Each allocation stays claimed until the timeline value
//! recorded for it has been reached, so the CPU never overwrites bytes the GPU
//! may still read.
//!
//! # Ring Layout
//!
//! The claimed region is described by a start offset and a size and may wrap
//! around the end of the buffer:
//!
//! ```text
//! not wrapped:   [ free | claimed............ | free ]
//!                       ^start                ^tail
//!
//! wrapped:       [ claimed.. | free | claimed....... ]
//!                            ^tail  ^start
//! ```
//!
//! New allocations go after the tail. When the bytes between the tail and
//! the end of the buffer are too few, the allocation wraps to offset 0 and the
//! skipped tail bytes are claimed with it, so the claimed region stays
//! contiguous. Offset 0 is aligned for every power-of-two alignment.
//!
//! Claims are released in FIFO order: the oldest allocation whose timeline
//! value was reached is reclaimed first, and a younger allocation is never
//! reclaimed before an older one.
//!
//! # Example
//!
//! ```ignore
//! let pool = TransferMemoryPool::new(&device, 4 << 20, "uploads")?;
//!
//! let mut staging = pool.allocate_slice::<u32>(17)?;
//! staging.write_pod(&values);
//!
//! let mut encoder = device.create_command_encoder();
//! encoder.copy_from_transfer(&staging, result_buffer, 0);
//!
//! let (timeline, value) = pool.submission_signal();
//! device.submit(Submission::new(encoder.complete()).signal_timeline(&timeline, value))?;
//! ```

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::GraphicsDevice;
use crate::error::{AllocationError, GraphicsError};
use crate::profiling::{profile_function, profile_plot, profile_scope};
use crate::resources::{BufferId, HostAddress};
use crate::sync::TimelineSemaphore;
use crate::types::BufferDescriptor;

/// A claimed region of the pool's buffer.
struct LiveAllocation {
    /// Start of the claimed bytes, including padding and wrap waste.
    offset: u64,
    /// Claimed bytes, including padding and wrap waste.
    size: u64,
    /// Timeline value after which the GPU no longer reads the region.
    usage: Option<(TimelineSemaphore, u64)>,
}

struct PoolState {
    claimed_start: u64,
    claimed_size: u64,
    live: VecDeque<LiveAllocation>,
    /// Last value handed out by `submission_signal`.
    timeline_value: u64,
    failed_allocations: u64,
}

/// Ring-allocated host-visible memory for uploads.
///
/// # Thread Safety
///
/// `TransferMemoryPool` is `Send + Sync`; concurrent producers are serialized
/// by an internal mutex. Allocation never blocks on the GPU: when no space is
/// free it fails with [`AllocationError::Exhausted`].
pub struct TransferMemoryPool {
    device: Arc<GraphicsDevice>,
    buffer: BufferId,
    host_base: HostAddress,
    capacity: u64,
    label: String,
    timeline: TimelineSemaphore,
    state: Mutex<PoolState>,
}

impl TransferMemoryPool {
    /// Create a pool with a backing buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is zero or the buffer cannot be created.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        capacity: u64,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "transfer pool capacity cannot be zero".to_string(),
            ));
        }

        let buffer = device.create_buffer(&BufferDescriptor::staging(capacity).with_label(label))?;
        let Some(host_base) = device.host_address(buffer) else {
            device.destroy_buffer(buffer);
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "transfer pool '{label}' buffer is not host visible"
            )));
        };
        let timeline = device.create_timeline_semaphore(Some(&format!("{label}_timeline")))?;

        log::debug!("Created transfer pool '{}' ({} bytes)", label, capacity);

        Ok(Self {
            device: Arc::clone(device),
            buffer,
            host_base,
            capacity,
            label: label.to_string(),
            timeline,
            state: Mutex::new(PoolState {
                claimed_start: 0,
                claimed_size: 0,
                live: VecDeque::new(),
                timeline_value: 0,
                failed_allocations: 0,
            }),
        })
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// Reclaims allocations whose timelines were reached first. The returned
    /// memory is writable immediately; it must be tagged with
    /// [`record_usage`](Self::record_usage) (or
    /// [`submission_signal`](Self::submission_signal)) before it can ever be
    /// reused.
    ///
    /// A zero-size request returns an empty region at the current tail and
    /// claims nothing.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InvalidAlignment`] if `alignment` is not a non-zero power of 2
    /// - [`AllocationError::ExceedsCapacity`] if `size` is larger than the pool
    /// - [`AllocationError::Exhausted`] if the GPU has not released enough space yet
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<TransferAllocation<'_>, AllocationError> {
        profile_scope!("transfer_allocate");

        if !alignment.is_power_of_two() {
            return Err(AllocationError::InvalidAlignment(alignment));
        }
        if size > self.capacity {
            return Err(AllocationError::ExceedsCapacity {
                requested: size,
                capacity: self.capacity,
            });
        }

        let mut state = self.state.lock();
        self.reclaim(&mut state);

        if size == 0 {
            // Nothing is claimed, the offset is still aligned (clamped to the end).
            let tail = tail_offset(&state, self.capacity);
            let offset = if alignment > self.capacity {
                self.capacity
            } else {
                align_up(tail, alignment).min(self.capacity)
            };
            return Ok(self.allocation(offset, 0));
        }

        let Some((offset, claimed)) = find_space(&state, self.capacity, size, alignment) else {
            state.failed_allocations += 1;
            let available = self.capacity - state.claimed_size;
            log::trace!(
                "Transfer pool '{}': {} bytes requested, {} free, {} allocations in flight",
                self.label,
                size,
                available,
                state.live.len()
            );
            return Err(AllocationError::Exhausted {
                requested: size,
                available,
            });
        };

        let start = (state.claimed_start + state.claimed_size) % self.capacity;
        state.live.push_back(LiveAllocation {
            offset: start,
            size: claimed,
            usage: None,
        });
        state.claimed_size += claimed;
        profile_plot!("transfer_pool_claimed", state.claimed_size);

        log::trace!(
            "Transfer pool '{}': allocated {} bytes at offset {} (claimed {})",
            self.label,
            size,
            offset,
            state.claimed_size
        );

        Ok(self.allocation(offset, size))
    }

    /// Allocate room for `len` values of `T`, aligned for `T`.
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate); a byte size that does not fit in
    /// `u64` is reported as [`AllocationError::ExceedsCapacity`].
    pub fn allocate_slice<T: bytemuck::Pod>(
        &self,
        len: usize,
    ) -> Result<TransferAllocation<'_>, AllocationError> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or(AllocationError::ExceedsCapacity {
                requested: u64::MAX,
                capacity: self.capacity,
            })?;
        self.allocate(size, std::mem::align_of::<T>() as u64)
    }

    /// Attach a timeline value to every allocation made since the last call.
    ///
    /// Those allocations are reclaimed once `timeline` reaches `value`.
    pub fn record_usage(&self, timeline: &TimelineSemaphore, value: u64) {
        let mut state = self.state.lock();
        let tagged = tag_unrecorded(&mut state, timeline, value);
        log::trace!(
            "Transfer pool '{}': {} allocations released at {:?} = {}",
            self.label,
            tagged,
            timeline.label(),
            value
        );
    }

    /// Tag outstanding allocations with the next value of the pool's timeline.
    ///
    /// The returned pair must be signalled by the submission that reads the
    /// allocations, e.g. through
    /// [`Submission::signal_timeline`](crate::Submission::signal_timeline).
    pub fn submission_signal(&self) -> (TimelineSemaphore, u64) {
        let mut state = self.state.lock();
        state.timeline_value += 1;
        let value = state.timeline_value;
        tag_unrecorded(&mut state, &self.timeline, value);
        (self.timeline.clone(), value)
    }

    /// Release every allocation whose timeline value was reached.
    ///
    /// Called by [`allocate`](Self::allocate); never blocks.
    pub fn collect(&self) {
        profile_function!();
        let mut state = self.state.lock();
        self.reclaim(&mut state);
    }

    fn reclaim(&self, state: &mut PoolState) {
        let mut reclaimed = 0;
        while let Some(front) = state.live.front()
            && let Some((timeline, value)) = &front.usage
            && timeline.is_reached(*value)
        {
            debug_assert_eq!(front.offset, state.claimed_start);
            let size = front.size;
            state.claimed_start = (state.claimed_start + size) % self.capacity;
            state.claimed_size -= size;
            state.live.pop_front();
            reclaimed += size;
        }

        if state.live.is_empty() {
            debug_assert_eq!(state.claimed_size, 0);
            state.claimed_start = 0;
        }

        if reclaimed > 0 {
            log::debug!(
                "Transfer pool '{}': reclaimed {} bytes ({} still claimed)",
                self.label,
                reclaimed,
                state.claimed_size
            );
        }
    }

    fn allocation(&self, offset: u64, size: u64) -> TransferAllocation<'_> {
        TransferAllocation {
            pool: self,
            // SAFETY: offset + size never exceeds the capacity.
            host_address: unsafe { self.host_base.add(offset) },
            buffer_offset: offset,
            size,
        }
    }

    /// Size of the backing buffer in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes claimed by allocations the GPU may still read.
    pub fn claimed(&self) -> u64 {
        self.state.lock().claimed_size
    }

    /// Bytes not claimed by any allocation.
    ///
    /// Contiguous space may be smaller.
    pub fn available(&self) -> u64 {
        self.capacity - self.claimed()
    }

    /// Number of allocations not yet reclaimed.
    pub fn pending_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of allocation requests that failed with [`AllocationError::Exhausted`].
    pub fn failed_allocations(&self) -> u64 {
        self.state.lock().failed_allocations
    }

    /// The backing buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The pool's own timeline, signalled through [`submission_signal`](Self::submission_signal).
    pub fn timeline(&self) -> &TimelineSemaphore {
        &self.timeline
    }

    /// Last value handed out by [`submission_signal`](Self::submission_signal).
    pub fn timeline_value(&self) -> u64 {
        self.state.lock().timeline_value
    }

    /// The device the pool allocates from.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }
}

impl Drop for TransferMemoryPool {
    fn drop(&mut self) {
        log::debug!(
            "Destroying transfer pool '{}' ({} allocations pending)",
            self.label,
            self.state.get_mut().live.len()
        );
        self.device.destroy_buffer(self.buffer);
    }
}

impl std::fmt::Debug for TransferMemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransferMemoryPool")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("claimed_start", &state.claimed_start)
            .field("claimed_size", &state.claimed_size)
            .field("pending", &state.live.len())
            .finish()
    }
}

fn tag_unrecorded(state: &mut PoolState, timeline: &TimelineSemaphore, value: u64) -> usize {
    let mut tagged = 0;
    for live in state.live.iter_mut().rev() {
        if live.usage.is_some() {
            break;
        }
        live.usage = Some((timeline.clone(), value));
        tagged += 1;
    }
    tagged
}

fn tail_offset(state: &PoolState, capacity: u64) -> u64 {
    let end = state.claimed_start + state.claimed_size;
    if end > capacity { end - capacity } else { end }
}

/// Find room for `size` bytes. Returns the allocation offset and the number of
/// bytes claimed for it (padding and wrap waste included).
fn find_space(state: &PoolState, capacity: u64, size: u64, alignment: u64) -> Option<(u64, u64)> {
    let end = state.claimed_start + state.claimed_size;

    if end <= capacity {
        let padding = align_up(end, alignment) - end;
        let right_space = capacity - end;
        if padding + size <= right_space {
            return Some((end + padding, padding + size));
        }

        let left_space = state.claimed_start;
        if size <= left_space {
            return Some((0, right_space + size));
        }

        None
    } else {
        let tail = end - capacity;
        let padding = align_up(tail, alignment) - tail;
        let middle_space = state.claimed_start - tail;
        (padding + size <= middle_space).then_some((tail + padding, padding + size))
    }
}

/// Align a value up to the given alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A region of a [`TransferMemoryPool`], writable from the CPU.
///
/// Write the data before submitting the commands that read it; the region may
/// be handed out again once the recorded timeline value is reached.
pub struct TransferAllocation<'a> {
    pool: &'a TransferMemoryPool,
    host_address: NonNull<u8>,
    buffer_offset: u64,
    size: u64,
}

impl TransferAllocation<'_> {
    /// CPU address of the first byte.
    pub fn host_address(&self) -> NonNull<u8> {
        self.host_address
    }

    /// Byte offset of the region in the pool's buffer.
    pub fn buffer_offset(&self) -> u64 {
        self.buffer_offset
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The pool's backing buffer.
    pub fn buffer(&self) -> BufferId {
        self.pool.buffer
    }

    pub(crate) fn device(&self) -> &Arc<GraphicsDevice> {
        &self.pool.device
    }

    /// Copy `data` to the start of the region.
    ///
    /// # Panics
    ///
    /// Panics if `data` is larger than the region.
    pub fn write_bytes(&mut self, data: &[u8]) {
        assert!(
            data.len() as u64 <= self.size,
            "write of {} bytes into a transfer allocation of {} bytes",
            data.len(),
            self.size
        );
        // SAFETY: the region is claimed for this allocation and in bounds.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.host_address.as_ptr(), data.len());
        }
    }

    /// Copy a slice of plain-old-data values to the start of the region.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, data: &[T]) {
        self.write_bytes(bytemuck::cast_slice(data));
    }
}

impl std::fmt::Debug for TransferAllocation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferAllocation")
            .field("pool", &self.pool.label)
            .field("buffer_offset", &self.buffer_offset)
            .field("size", &self.size)
            .finish()
    }
}
