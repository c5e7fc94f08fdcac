//! Plain value types shared across the RHI.

use std::fmt;

use bitflags::bitflags;

/// Hardware queue classes a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HardwareQueueClass {
    /// Graphics queue (supports every command type).
    Graphics,
    /// Asynchronous compute queue.
    Compute,
    /// Copy / transfer queue.
    Copy,
}

impl HardwareQueueClass {
    /// Number of queue classes.
    pub const COUNT: usize = 3;

    /// Every queue class, in index order.
    pub const ALL: [HardwareQueueClass; Self::COUNT] = [Self::Graphics, Self::Compute, Self::Copy];

    /// Dense index of this queue class, usable for per-queue arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Copy => 2,
        }
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for HardwareQueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a frame graph scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(String);

impl ScopeId {
    /// Create a scope id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The scope name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ScopeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Direction of a host access to mapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostMemoryAccess {
    /// The host reads data the device wrote.
    Read,
    /// The host writes data the device will read.
    Write,
}

/// Level of a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandListLevel {
    /// Submitted directly to a queue.
    #[default]
    Primary,
    /// Executed from a primary list, inheriting its render pass.
    Secondary,
}

bitflags! {
    /// Buffer usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Host can map the buffer for reading.
        const MAP_READ = 1 << 0;
        /// Host can map the buffer for writing.
        const MAP_WRITE = 1 << 1;
        /// Buffer can be a copy source.
        const COPY_SRC = 1 << 2;
        /// Buffer can be a copy destination.
        const COPY_DST = 1 << 3;
        /// Index buffer.
        const INDEX = 1 << 4;
        /// Vertex buffer.
        const VERTEX = 1 << 5;
        /// Uniform buffer.
        const UNIFORM = 1 << 6;
        /// Storage buffer.
        const STORAGE = 1 << 7;
    }
}

impl BufferUsage {
    /// Whether the host can map memory with this usage.
    pub fn is_host_visible(self) -> bool {
        self.intersects(Self::MAP_READ | Self::MAP_WRITE)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Image texel formats supported by the upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Single 8-bit channel.
    R8Unorm,
    /// Four 8-bit channels.
    Rgba8Unorm,
    /// Four 16-bit float channels.
    Rgba16Float,
    /// Four 32-bit float channels.
    Rgba32Float,
}

impl ImageFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rgba8Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Image usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        /// Image can be a copy source.
        const COPY_SRC = 1 << 0;
        /// Image can be a copy destination.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in shaders.
        const SAMPLED = 1 << 2;
        /// Image can be used as a storage image.
        const STORAGE = 1 << 3;
        /// Image can be a render target.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Descriptor for creating a 2D image (optionally layered and mipmapped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Width of mip 0 in texels.
    pub width: u32,
    /// Height of mip 0 in texels.
    pub height: u32,
    /// Number of array layers.
    pub array_layers: u32,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// Texel format.
    pub format: ImageFormat,
    /// Usage flags.
    pub usage: ImageUsage,
    /// Reserved (tiled) images are created without backing memory; tiles are
    /// mapped explicitly.
    pub reserved: bool,
}

impl ImageDescriptor {
    /// Create a descriptor for a single-mip, single-layer 2D image.
    pub fn new_2d(width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            format,
            usage,
            reserved: false,
        }
    }

    /// Set the number of mip levels.
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Set the number of array layers.
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// Mark the image as reserved (tiled).
    pub fn with_reserved(mut self, reserved: bool) -> Self {
        self.reserved = reserved;
        self
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Extent of a mip level, clamped to one texel.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Bytes in one tightly packed row of a mip level.
    pub fn mip_row_pitch(&self, mip: u32) -> u64 {
        let (width, _) = self.mip_extent(mip);
        u64::from(width) * u64::from(self.format.bytes_per_pixel())
    }

    /// Bytes in one array layer of a mip level.
    pub fn mip_layer_size(&self, mip: u32) -> u64 {
        let (_, height) = self.mip_extent(mip);
        self.mip_row_pitch(mip) * u64::from(height)
    }

    /// Byte offset of a subresource in the packed linear layout
    /// (mip-major, then layer).
    pub fn subresource_offset(&self, mip: u32, array_layer: u32) -> u64 {
        let preceding: u64 = (0..mip)
            .map(|m| self.mip_layer_size(m) * u64::from(self.array_layers))
            .sum();
        preceding + self.mip_layer_size(mip) * u64::from(array_layer)
    }

    /// Total bytes of every subresource in the packed linear layout.
    pub fn total_size(&self) -> u64 {
        self.subresource_offset(self.mip_levels, 0)
    }
}

/// Opaque handle to a binary semaphore owned by the surrounding renderer
/// (for example a swap chain acquire semaphore). Forwarded to queue
/// submissions unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub u64);

/// Identifier of a swap chain owned by the surrounding renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_class_indices() {
        for (i, class) in HardwareQueueClass::ALL.iter().enumerate() {
            assert_eq!(class.index(), i);
        }
        assert_eq!(HardwareQueueClass::Copy.to_string(), "copy");
    }

    #[test]
    fn test_mip_layout() {
        let desc = ImageDescriptor::new_2d(8, 4, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED)
            .with_mip_levels(4)
            .with_array_layers(2);

        assert_eq!(desc.mip_extent(0), (8, 4));
        assert_eq!(desc.mip_extent(2), (2, 1));
        assert_eq!(desc.mip_extent(3), (1, 1));
        assert_eq!(desc.mip_row_pitch(1), 16);
        assert_eq!(desc.mip_layer_size(0), 128);

        // mip 0: 2 layers * 128, mip 1: 2 layers * 32
        assert_eq!(desc.subresource_offset(0, 1), 128);
        assert_eq!(desc.subresource_offset(1, 0), 256);
        assert_eq!(desc.subresource_offset(2, 0), 320);
        assert_eq!(desc.total_size(), 256 + 64 + 16 + 8);
    }

    #[test]
    fn test_buffer_usage_host_visibility() {
        assert!(BufferUsage::MAP_WRITE.is_host_visible());
        assert!((BufferUsage::COPY_DST | BufferUsage::MAP_READ).is_host_visible());
        assert!(!(BufferUsage::VERTEX | BufferUsage::COPY_DST).is_host_visible());
    }
}
