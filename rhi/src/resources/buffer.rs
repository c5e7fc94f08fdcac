//! GPU buffer resource.

use std::sync::{Arc, Weak};

use crate::backend::GpuBuffer;
use crate::device::Device;
use crate::error::RhiError;
use crate::memory::MemoryAllocation;
use crate::types::BufferDescriptor;

/// A GPU buffer resource.
///
/// Buffers are created by [`Device::create_buffer`] and are reference-counted.
/// Command lists that reference a buffer keep it alive until the queue has
/// finished with them.
///
/// # Example
///
/// ```ignore
/// let staging = device.create_buffer(&BufferDescriptor::new(
///     1024,
///     BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
/// ))?;
/// staging.write(0, &data)?;
/// ```
pub struct Buffer {
    device: Weak<Device>,
    descriptor: BufferDescriptor,
    native: GpuBuffer,
}

impl Buffer {
    /// Create a new buffer (called by Device).
    pub(crate) fn new(device: Weak<Device>, descriptor: BufferDescriptor, native: GpuBuffer) -> Self {
        Self {
            device,
            descriptor,
            native,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// The native buffer.
    pub fn native(&self) -> &GpuBuffer {
        &self.native
    }

    /// The memory backing the buffer.
    pub fn memory(&self) -> &MemoryAllocation {
        self.native.memory()
    }

    /// Write `data` at `offset` through a host mapping.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        self.check_range(offset, data.len() as u64)?;
        if self.memory().write_bytes(offset, data) {
            Ok(())
        } else {
            Err(RhiError::InvalidParameter(format!(
                "buffer {:?} is not host visible",
                self.label()
            )))
        }
    }

    /// Read `len` bytes at `offset` through a host mapping.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, RhiError> {
        self.check_range(offset, len as u64)?;
        self.memory().read_bytes(offset, len).ok_or_else(|| {
            RhiError::InvalidParameter(format!("buffer {:?} is not host visible", self.label()))
        })
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), RhiError> {
        if offset.checked_add(len).is_none_or(|end| end > self.size()) {
            return Err(RhiError::InvalidParameter(format!(
                "range {offset}+{len} exceeds buffer {:?} of size {}",
                self.label(),
                self.size()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostHeap;
    use crate::types::BufferUsage;

    fn host_buffer(size: u64) -> Buffer {
        let heap = HostHeap::new(4096);
        let native = GpuBuffer::Dummy {
            memory: MemoryAllocation::Host(heap.allocate(size)),
        };
        Buffer::new(
            Weak::new(),
            BufferDescriptor::new(size, BufferUsage::MAP_WRITE).with_label("test"),
            native,
        )
    }

    #[test]
    fn test_buffer_debug() {
        let buffer = host_buffer(1024);
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_buffer_write_read() {
        let buffer = host_buffer(64);
        buffer.write(4, &[1, 2, 3]).unwrap();
        assert_eq!(buffer.read(4, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(buffer.label(), Some("test"));
    }

    #[test]
    fn test_buffer_range_checked() {
        let buffer = host_buffer(16);
        assert!(matches!(
            buffer.write(10, &[0u8; 8]),
            Err(RhiError::InvalidParameter(_))
        ));
        assert!(buffer.read(u64::MAX, 2).is_err());
    }
}
