//! Device memory allocations.
//!
//! [`MemoryAllocation`] wraps the backend allocation behind a buffer or image.
//! Offsets and block sizes are always queried from the owning allocator since
//! allocators may move allocations during compaction.
//!
//! Mapping follows the direction of the host access: a read map invalidates
//! host caches before returning the pointer, and unmapping a write map flushes
//! host caches so the device sees the data.

mod host;

use std::ptr::NonNull;

pub use host::{DEFAULT_HOST_BLOCK_SIZE, HostAllocation, HostHeap, HostHeapStats};

#[cfg(feature = "vulkan-backend")]
pub use crate::backend::vulkan::VulkanMemoryAllocation;

use crate::types::HostMemoryAccess;

/// A backend memory allocation.
#[derive(Debug)]
pub enum MemoryAllocation {
    /// Host-memory allocation (dummy backend).
    Host(HostAllocation),
    /// Vulkan allocation managed by gpu-allocator.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(VulkanMemoryAllocation),
}

impl MemoryAllocation {
    /// Offset of the allocation inside its memory block.
    pub fn offset(&self) -> u64 {
        match self {
            Self::Host(allocation) => allocation.offset(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(allocation) => allocation.offset(),
        }
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Host(allocation) => allocation.size(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(allocation) => allocation.size(),
        }
    }

    /// Size of the memory block holding the allocation.
    pub fn block_size(&self) -> u64 {
        match self {
            Self::Host(allocation) => allocation.block_size(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(allocation) => allocation.block_size(),
        }
    }

    /// Map the allocation for host access.
    ///
    /// Returns `None` when the memory is not host visible or the native call
    /// fails; the failure is logged.
    pub fn map(&self, access: HostMemoryAccess) -> Option<NonNull<u8>> {
        match self {
            Self::Host(allocation) => allocation.map(access),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(allocation) => allocation.map(access),
        }
    }

    /// End a host access started with [`map`](Self::map).
    pub fn unmap(&self, access: HostMemoryAccess) {
        match self {
            Self::Host(allocation) => allocation.unmap(access),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(allocation) => allocation.unmap(access),
        }
    }

    /// Copy `data` into the allocation at `offset`.
    ///
    /// Returns `false` if the memory could not be mapped.
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> bool {
        debug_assert!(offset + data.len() as u64 <= self.size());
        let Some(ptr) = self.map(HostMemoryAccess::Write) else {
            return false;
        };
        // SAFETY: the mapping covers `size()` bytes and the range was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        self.unmap(HostMemoryAccess::Write);
        true
    }

    /// Read `len` bytes from the allocation at `offset`.
    pub fn read_bytes(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        debug_assert!(offset + len as u64 <= self.size());
        let ptr = self.map(HostMemoryAccess::Read)?;
        let mut out = vec![0u8; len];
        // SAFETY: the mapping covers `size()` bytes and the range was checked.
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                len,
            );
        }
        self.unmap(HostMemoryAccess::Read);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allocation_roundtrip_counts_cache_ops() {
        let heap = HostHeap::new(1024);
        let allocation = MemoryAllocation::Host(heap.allocate(64));

        assert!(allocation.write_bytes(8, &[1, 2, 3, 4]));
        assert_eq!(allocation.read_bytes(8, 4), Some(vec![1, 2, 3, 4]));
        assert_eq!(allocation.size(), 64);
        assert_eq!(allocation.block_size(), 1024);

        let stats = heap.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.invalidations, 1);
    }

    #[test]
    fn test_offset_is_queried_after_compaction() {
        let heap = HostHeap::new(1024);
        let spacer = heap.allocate(128);
        let allocation = MemoryAllocation::Host(heap.allocate(32));
        assert!(allocation.write_bytes(0, &[9u8; 32]));
        assert_eq!(allocation.offset(), 128);

        drop(spacer);
        heap.compact();

        assert_eq!(allocation.offset(), 0);
        assert_eq!(allocation.read_bytes(0, 32), Some(vec![9u8; 32]));
    }
}
