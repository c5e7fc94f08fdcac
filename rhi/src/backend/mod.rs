//! GPU backend abstraction layer.
//!
//! The RHI core is backend agnostic. A backend creates native objects behind
//! the backend-tagged handle enums in this module and executes
//! [`QueueSubmission`]s on its hardware queues.
//!
//! # Available Backends
//!
//! - `dummy` (always compiled): host-memory "GPU" with one worker thread per
//!   hardware queue class, so every synchronization rule is observable in tests
//! - `vulkan-backend`: native Vulkan backend using ash and gpu-allocator

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;

#[cfg(feature = "vulkan-backend")]
use ash::vk;

use crate::command_list::{CommandList, NativeCommandList};
use crate::error::RhiError;
use crate::memory::MemoryAllocation;
use crate::parameters::{BackendType, DeviceParameters};
use crate::resources::TileMappingRequest;
use crate::types::{
    BufferDescriptor, CommandListLevel, HardwareQueueClass, ImageDescriptor, SemaphoreHandle,
};

/// Native buffer object.
pub enum GpuBuffer {
    /// Dummy backend buffer living in the host heap.
    Dummy { memory: MemoryAllocation },
    /// Vulkan buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        memory: MemoryAllocation,
    },
}

impl GpuBuffer {
    /// The memory backing the buffer.
    pub fn memory(&self) -> &MemoryAllocation {
        match self {
            Self::Dummy { memory } => memory,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { memory, .. } => memory,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { memory } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("memory", memory)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, memory, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("memory", memory)
                .finish_non_exhaustive(),
        }
    }
}

/// Native image object.
pub enum GpuImage {
    /// Dummy backend image stored in the packed linear layout.
    Dummy { memory: MemoryAllocation },
    /// Vulkan image. Reserved images have no memory until tiles are mapped.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        memory: Option<MemoryAllocation>,
    },
}

impl GpuImage {
    /// The memory backing the image, if it is bound as a whole.
    pub fn memory(&self) -> Option<&MemoryAllocation> {
        match self {
            Self::Dummy { memory } => Some(memory),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { memory, .. } => memory.as_ref(),
        }
    }
}

impl std::fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { memory } => f
                .debug_struct("GpuImage::Dummy")
                .field("memory", memory)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { image, memory, .. } => f
                .debug_struct("GpuImage::Vulkan")
                .field("image", image)
                .field("memory", memory)
                .finish_non_exhaustive(),
        }
    }
}

/// Native memory heap that reserved image tiles are mapped into.
#[derive(Debug)]
pub enum GpuTileHeap {
    /// Dummy backend heap (bookkeeping only).
    Dummy,
    /// Vulkan device memory.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { memory: MemoryAllocation },
}

/// Native timeline synchronization primitive: a monotonically increasing
/// 64-bit counter that queues and the host can signal and wait on.
#[derive(Clone)]
pub enum GpuTimeline {
    /// Host-side timeline (mutex + condvar).
    Dummy(Arc<dummy::DummyTimeline>),
    /// Vulkan timeline semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(Arc<vulkan::VulkanTimeline>),
}

impl GpuTimeline {
    /// Last value the timeline reached.
    pub fn completed_value(&self) -> u64 {
        match self {
            Self::Dummy(timeline) => timeline.completed_value(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(timeline) => timeline.completed_value(),
        }
    }

    /// Signal the timeline from the host. Values at or below the current
    /// value are ignored.
    pub fn signal(&self, value: u64) -> Result<(), RhiError> {
        match self {
            Self::Dummy(timeline) => {
                timeline.signal(value);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(timeline) => timeline.signal(value),
        }
    }

    /// Whether both handles refer to the same native timeline.
    pub fn same_timeline(&self, other: &GpuTimeline) -> bool {
        match (self, other) {
            (Self::Dummy(a), Self::Dummy(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "vulkan-backend")]
            (Self::Vulkan(a), Self::Vulkan(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "vulkan-backend")]
            _ => false,
        }
    }

    /// Block the calling thread until the timeline reaches `value`.
    pub fn wait(&self, value: u64) -> Result<(), RhiError> {
        match self {
            Self::Dummy(timeline) => {
                timeline.wait(value);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(timeline) => timeline.wait(value),
        }
    }
}

impl std::fmt::Debug for GpuTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(timeline) => f
                .debug_tuple("GpuTimeline::Dummy")
                .field(&timeline.completed_value())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(timeline) => f
                .debug_tuple("GpuTimeline::Vulkan")
                .field(&timeline.semaphore())
                .finish(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

// The memory field is dropped (and freed) after the handle is destroyed.

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan { device, buffer, .. } = self {
            unsafe { device.destroy_buffer(*buffer, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuImage {
    fn drop(&mut self) {
        if let GpuImage::Vulkan { device, image, .. } = self {
            unsafe { device.destroy_image(*image, None) };
        }
    }
}

/// A timeline together with the value to wait for or signal.
#[derive(Debug, Clone)]
pub struct TimelinePoint {
    /// The timeline.
    pub timeline: GpuTimeline,
    /// The value.
    pub value: u64,
}

impl TimelinePoint {
    /// Create a timeline point.
    pub fn new(timeline: GpuTimeline, value: u64) -> Self {
        Self { timeline, value }
    }
}

/// One batch of work handed to a hardware queue.
///
/// The queue waits for every wait point and semaphore, executes the command
/// lists in order, then signals every signal point and semaphore. Semaphores
/// are forwarded to the native API unmodified.
#[derive(Debug, Default)]
pub struct QueueSubmission {
    /// Primary command lists in execution order. Must have been ended.
    pub command_lists: Vec<CommandList>,
    /// Timeline values to wait for before execution.
    pub wait_points: Vec<TimelinePoint>,
    /// Timeline values to signal after execution.
    pub signal_points: Vec<TimelinePoint>,
    /// Binary semaphores to wait for.
    pub wait_semaphores: Vec<SemaphoreHandle>,
    /// Binary semaphores to signal.
    pub signal_semaphores: Vec<SemaphoreHandle>,
}

impl QueueSubmission {
    /// Create an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command list.
    pub fn with_command_list(mut self, command_list: CommandList) -> Self {
        self.command_lists.push(command_list);
        self
    }
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, RhiError>;

    /// Create an image. Reserved images get no backing memory.
    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, RhiError>;

    /// Allocate memory for `tile_count` reserved-image tiles.
    fn allocate_tile_memory(&self, tile_count: u32) -> Result<GpuTileHeap, RhiError>;

    /// Create a timeline starting at `initial_value`.
    fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, RhiError>;

    /// Create a native command list for the given queue class.
    fn create_command_list(
        &self,
        queue: HardwareQueueClass,
        level: CommandListLevel,
    ) -> Result<NativeCommandList, RhiError>;

    /// Hand a submission to a hardware queue. Returns once the work is queued.
    fn submit(&self, queue: HardwareQueueClass, submission: QueueSubmission)
    -> Result<(), RhiError>;

    /// Queue tile mapping updates for a reserved image, ordered by the given
    /// wait and signal points.
    fn update_tile_mappings(
        &self,
        queue: HardwareQueueClass,
        request: TileMappingRequest,
        wait_points: Vec<TimelinePoint>,
        signal_points: Vec<TimelinePoint>,
    ) -> Result<(), RhiError>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<(), RhiError>;
}

/// Create the backend requested by the parameters.
///
/// [`BackendType::Auto`] tries Vulkan first and falls back to the dummy
/// backend.
pub fn create_backend(params: &DeviceParameters) -> Result<Arc<dyn GpuBackend>, RhiError> {
    match params.backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()?))
        }
        BackendType::Vulkan => create_vulkan_backend(params),
        BackendType::Auto => match create_vulkan_backend(params) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {e}");
                log::info!("Using dummy backend");
                Ok(Arc::new(dummy::DummyBackend::new()?))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan_backend(params: &DeviceParameters) -> Result<Arc<dyn GpuBackend>, RhiError> {
    let backend = vulkan::VulkanBackend::new(params)?;
    log::info!("Using Vulkan backend (ash)");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan_backend(_params: &DeviceParameters) -> Result<Arc<dyn GpuBackend>, RhiError> {
    Err(RhiError::InitializationFailed(
        "Vulkan backend support is not compiled in".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}
