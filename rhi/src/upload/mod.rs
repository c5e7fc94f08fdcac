//! Asynchronous uploads into device resources.
//!
//! [`AsyncUploadQueue`] owns a dedicated thread and hardware queue. Callers
//! queue [`BufferStreamRequest`]s and [`ImageExpandRequest`]s from any thread
//! and receive a fence value to poll or wait on.
//!
//! ```text
//!  caller threads          upload thread                 copy queue
//!  ──────────────          ─────────────                 ──────────
//!  queue_*_upload ──mpsc──► stage into packet[i] ──submit──► copies
//!        │                  (waits if packet[i]             │
//!        │                   is still in flight)            ▼
//!        └──── fence value ◄──────────────────────── upload fence
//! ```

mod queue;
mod request;
mod worker;

pub use queue::AsyncUploadQueue;
pub use request::{BufferStreamRequest, ImageExpandRequest, ImageMipSlice, UploadCallback};

use crate::types::HardwareQueueClass;

/// Default number of staging frame packets.
pub const DEFAULT_UPLOAD_FRAME_COUNT: u32 = 3;

/// Default size of each staging buffer.
pub const DEFAULT_STAGING_SIZE_IN_BYTES: u64 = 32 * 1024 * 1024;

/// Configuration of an [`AsyncUploadQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncUploadQueueDescriptor {
    /// Number of staging buffers in the ring.
    pub frame_count: u32,
    /// Size of each staging buffer.
    pub staging_size_in_bytes: u64,
    /// Queue the uploads execute on.
    pub queue_class: HardwareQueueClass,
}

impl Default for AsyncUploadQueueDescriptor {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_UPLOAD_FRAME_COUNT,
            staging_size_in_bytes: DEFAULT_STAGING_SIZE_IN_BYTES,
            queue_class: HardwareQueueClass::Copy,
        }
    }
}
