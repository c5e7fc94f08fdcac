//! Type conversions between RHI types and Vulkan types.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::types::{BufferUsage, ImageFormat, ImageUsage};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    // MAP_READ and MAP_WRITE select the memory location instead
    result
}

/// Memory location for a buffer with the given usage.
pub fn buffer_memory_location(usage: BufferUsage) -> MemoryLocation {
    if usage.contains(BufferUsage::MAP_READ) {
        MemoryLocation::GpuToCpu
    } else if usage.contains(BufferUsage::MAP_WRITE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Convert ImageFormat to Vulkan format.
pub fn convert_image_format(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::R8Unorm => vk::Format::R8_UNORM,
        ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Convert ImageUsage flags to Vulkan image usage flags.
pub fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::RENDER_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_flags_select_location() {
        assert_eq!(
            buffer_memory_location(BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            buffer_memory_location(BufferUsage::MAP_READ | BufferUsage::COPY_DST),
            MemoryLocation::GpuToCpu
        );
        assert_eq!(
            buffer_memory_location(BufferUsage::VERTEX),
            MemoryLocation::GpuOnly
        );
        assert!(convert_buffer_usage(BufferUsage::MAP_WRITE).is_empty());
    }

    #[test]
    fn test_image_usage_conversion() {
        let flags = convert_image_usage(ImageUsage::COPY_DST | ImageUsage::SAMPLED);
        assert_eq!(
            flags,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
        );
        assert_eq!(
            convert_image_format(ImageFormat::Rgba8Unorm),
            vk::Format::R8G8B8A8_UNORM
        );
    }
}
