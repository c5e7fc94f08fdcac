//! # RedLilium RHI
//!
//! Frame-graph execution layer of the RedLilium renderer: the boundary where
//! draw lists and scopes become recorded command lists and queue submissions.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`DrawListContext`] - per-thread draw item collection merged per tag
//! - [`FrameGraphExecuteGroup`] / [`FrameGraphExecuteGroupSecondary`] -
//!   command-recording contexts under a serial or parallel job policy
//! - [`FrameGraphExecuter`] - ordered submission of execute groups
//! - [`AsyncUploadQueue`] - staged uploads on a dedicated queue and thread
//! - [`Fence`] / [`FenceSet`] - monotonic CPU/GPU synchronization
//! - [`MemoryAllocation`] - backend memory with explicit flush/invalidate
//! - Backends: Vulkan (ash + gpu-allocator) and Dummy (host memory, for tests)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_rhi::{BackendType, Device, DeviceParameters, DrawListContext};
//!
//! let device = Device::new(DeviceParameters::new().with_backend(BackendType::Auto))?;
//! let opaque = device.draw_list_tag_registry().acquire_tag("opaque");
//!
//! let mut context = DrawListContext::new(device.validation());
//! context.init([opaque].into_iter().collect());
//! // Producer threads: context.add_draw_packet(&packet, depth);
//! context.finalize_lists();
//! let list = context.get_list(opaque);
//! ```

pub mod backend;
pub mod command_list;
pub mod device;
pub mod draw;
pub mod error;
pub mod frame_graph;
pub mod memory;
pub mod parameters;
pub mod profiling;
pub mod resources;
pub mod sync;
pub mod types;
pub mod upload;
pub mod validation;

#[cfg(feature = "profiling")]
pub use tracy_client;

// Re-export main types for convenience
pub use backend::{GpuBackend, GpuTimeline, QueueSubmission, TimelinePoint, has_gpu_backend};
pub use command_list::{
    BufferImageCopyRegion, CommandList, CommandListState, InheritanceInfo, UploadBarrier,
};
pub use device::Device;
pub use draw::{
    DrawArguments, DrawItem, DrawItemProperties, DrawListContext, DrawListMask, DrawListSortType,
    DrawListTag, DrawListTagRegistry, DrawPacket, DrawPacketBuilder, DrawRequest,
    PipelineStateHandle, sort_draw_list,
};
pub use error::RhiError;
pub use frame_graph::{
    ExecuteGroup, FrameGraphExecuteContext, FrameGraphExecuteGroup,
    FrameGraphExecuteGroupSecondary, FrameGraphExecuter, JobPolicy, Scope, ScopeDescriptor,
    SubmitRange,
};
pub use memory::MemoryAllocation;
pub use parameters::{BackendType, DeviceParameters};
pub use resources::{Buffer, Image, TileHeap, TileMapping, TileMappingRequest};
pub use sync::{Fence, FenceSet};
pub use types::{
    BufferDescriptor, BufferUsage, CommandListLevel, HardwareQueueClass, HostMemoryAccess,
    ImageDescriptor, ImageFormat, ImageUsage, ScopeId, SemaphoreHandle, SwapChainId,
};
pub use upload::{
    AsyncUploadQueue, AsyncUploadQueueDescriptor, BufferStreamRequest, ImageExpandRequest,
    ImageMipSlice,
};
pub use validation::ValidationMode;

/// RHI library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static_assertions::assert_impl_all!(CommandList: Send);
static_assertions::assert_impl_all!(FrameGraphExecuteGroup: Send, Sync);
static_assertions::assert_impl_all!(FrameGraphExecuter: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_device() {
        let device = Device::new(DeviceParameters::new().with_backend(BackendType::Dummy)).unwrap();
        assert_eq!(device.backend_name(), "Dummy Backend");
    }
}
