//! GPU memory allocator integration using gpu-allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, MemoryLocation};

use crate::error::RhiError;

/// Block size of device-local memory blocks.
pub const DEVICE_MEMBLOCK_SIZE: u64 = 256 * 1024 * 1024;

/// Block size of host-visible memory blocks.
pub const HOST_MEMBLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, RhiError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: AllocationSizes::new(DEVICE_MEMBLOCK_SIZE, HOST_MEMBLOCK_SIZE),
    })
    .map_err(|e| RhiError::InitializationFailed(format!("Failed to create memory allocator: {e}")))
}

/// Size of the blocks the allocator carves allocations at `location` from.
pub fn memblock_size(location: MemoryLocation) -> u64 {
    match location {
        MemoryLocation::GpuOnly | MemoryLocation::Unknown => DEVICE_MEMBLOCK_SIZE,
        MemoryLocation::CpuToGpu | MemoryLocation::GpuToCpu => HOST_MEMBLOCK_SIZE,
    }
}
