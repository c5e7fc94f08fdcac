//! Monotonic fences backed by a native timeline.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{GpuTimeline, QueueSubmission, TimelinePoint};
use crate::device::Device;
use crate::error::RhiError;
use crate::profiling::profile_scope;

/// A CPU/GPU synchronization point with a monotonically increasing value.
///
/// [`increment`](Fence::increment) hands out pending values; the native
/// timeline records which of them have been signaled. `increment` is atomic
/// and may be called from any thread.
pub struct Fence {
    timeline: GpuTimeline,
    pending: AtomicU64,
}

impl Fence {
    /// Create a fence whose completed and pending values are zero.
    pub fn new(device: &Device) -> Result<Self, RhiError> {
        Ok(Self {
            timeline: device.create_timeline(0)?,
            pending: AtomicU64::new(0),
        })
    }

    /// Reserve the next value. Never returns the same value twice.
    pub fn increment(&self) -> u64 {
        self.pending.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Highest value handed out so far.
    pub fn pending_value(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Highest value the native timeline has reached.
    pub fn completed_value(&self) -> u64 {
        self.timeline.completed_value()
    }

    /// Whether `value` has been reached.
    pub fn is_signaled(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// The native timeline.
    pub fn timeline(&self) -> &GpuTimeline {
        &self.timeline
    }

    /// Signal the pending value from the host.
    pub fn signal_from_cpu(&self) -> Result<(), RhiError> {
        self.signal_from_cpu_value(self.pending_value())
    }

    /// Signal `value` from the host.
    pub fn signal_from_cpu_value(&self, value: u64) -> Result<(), RhiError> {
        self.pending.fetch_max(value, Ordering::AcqRel);
        self.timeline.signal(value)
    }

    /// Signal the pending value when `submission` completes on its queue.
    /// Returns the value.
    pub fn signal_from_gpu(&self, submission: &mut QueueSubmission) -> u64 {
        let value = self.pending_value();
        self.signal_from_gpu_value(submission, value);
        value
    }

    /// Signal `value` when `submission` completes on its queue.
    pub fn signal_from_gpu_value(&self, submission: &mut QueueSubmission, value: u64) {
        self.pending.fetch_max(value, Ordering::AcqRel);
        submission
            .signal_points
            .push(TimelinePoint::new(self.timeline.clone(), value));
    }

    /// Block until the pending value is reached.
    pub fn wait_on_cpu(&self) -> Result<(), RhiError> {
        self.wait_on_cpu_value(self.pending_value())
    }

    /// Block until `value` is reached.
    pub fn wait_on_cpu_value(&self, value: u64) -> Result<(), RhiError> {
        if self.is_signaled(value) {
            return Ok(());
        }
        profile_scope!("fence_wait");
        log::trace!("Fence: waiting for {value}");
        self.timeline.wait(value)
    }

    /// Make `submission` wait on the GPU until `value` is reached.
    pub fn wait_on_gpu(&self, submission: &mut QueueSubmission, value: u64) {
        submission
            .wait_points
            .push(TimelinePoint::new(self.timeline.clone(), value));
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("pending", &self.pending_value())
            .field("completed", &self.completed_value())
            .finish()
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);
