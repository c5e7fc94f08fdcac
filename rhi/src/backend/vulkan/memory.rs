//! gpu-allocator backed memory allocations.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::types::HostMemoryAccess;

use super::allocator::memblock_size;

/// A Vulkan memory allocation owned by a buffer, image or tile heap.
///
/// Offsets are read from the allocator's record on every call. Mapping is
/// persistent; `map` invalidates non-coherent memory before reads and
/// `unmap` flushes it after writes.
pub struct VulkanMemoryAllocation {
    name: String,
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    allocation: Mutex<Option<Allocation>>,
    location: MemoryLocation,
    non_coherent_atom_size: u64,
}

impl VulkanMemoryAllocation {
    /// `name` must be unique among the allocator's live allocations.
    pub(crate) fn new(
        name: String,
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        allocation: Allocation,
        location: MemoryLocation,
        non_coherent_atom_size: u64,
    ) -> Self {
        Self {
            name,
            device,
            allocator,
            allocation: Mutex::new(Some(allocation)),
            location,
            non_coherent_atom_size: non_coherent_atom_size.max(1),
        }
    }

    /// Device memory object the allocation lives in.
    pub fn memory(&self) -> vk::DeviceMemory {
        self.allocation
            .lock()
            .as_ref()
            .map_or(vk::DeviceMemory::null(), |allocation| unsafe {
                allocation.memory()
            })
    }

    /// Offset inside the device memory object.
    pub fn offset(&self) -> u64 {
        self.allocation
            .lock()
            .as_ref()
            .map_or(0, |allocation| allocation.offset())
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.allocation
            .lock()
            .as_ref()
            .map_or(0, |allocation| allocation.size())
    }

    /// Size of the memory block the allocation currently lives in, looked up
    /// in the allocator's report. Dedicated allocations own their block.
    pub fn block_size(&self) -> u64 {
        let Some((offset, size)) = self
            .allocation
            .lock()
            .as_ref()
            .map(|allocation| (allocation.offset(), allocation.size()))
        else {
            return 0;
        };

        let report = self.allocator.lock().generate_report();
        let block = report.blocks.iter().find(|block| {
            report
                .allocations
                .get(block.allocations.clone())
                .is_some_and(|allocations| {
                    allocations.iter().any(|allocation| {
                        allocation.name == self.name
                            && allocation.offset == offset
                            && allocation.size == size
                    })
                })
        });
        match block {
            Some(block) => block.size,
            None => {
                log::warn!("Allocation {:?} is missing from the allocator report", self.name);
                memblock_size(self.location).max(size)
            }
        }
    }

    /// Memory location the allocation was requested for.
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    fn mapped_range(&self, allocation: &Allocation) -> vk::MappedMemoryRange<'static> {
        let atom = self.non_coherent_atom_size;
        let start = allocation.offset() / atom * atom;
        let end = (allocation.offset() + allocation.size()).div_ceil(atom) * atom;
        vk::MappedMemoryRange::default()
            .memory(unsafe { allocation.memory() })
            .offset(start)
            .size(end - start)
    }

    /// Map the allocation for host access.
    pub fn map(&self, access: HostMemoryAccess) -> Option<NonNull<u8>> {
        let guard = self.allocation.lock();
        let allocation = guard.as_ref()?;
        let Some(ptr) = allocation.mapped_ptr() else {
            log::error!("Allocation at {:?} is not host visible", self.location);
            return None;
        };

        let coherent = allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        if access == HostMemoryAccess::Read && !coherent {
            let range = self.mapped_range(allocation);
            if let Err(e) = unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) } {
                log::error!("vkInvalidateMappedMemoryRanges failed: {e:?}");
                return None;
            }
        }

        Some(ptr.cast::<u8>())
    }

    /// End a host access started with [`map`](Self::map).
    pub fn unmap(&self, access: HostMemoryAccess) {
        if access != HostMemoryAccess::Write {
            return;
        }
        let guard = self.allocation.lock();
        let Some(allocation) = guard.as_ref() else {
            return;
        };
        if allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return;
        }
        let range = self.mapped_range(allocation);
        if let Err(e) = unsafe { self.device.flush_mapped_memory_ranges(&[range]) } {
            log::error!("vkFlushMappedMemoryRanges failed: {e:?}");
        }
    }
}

impl std::fmt::Debug for VulkanMemoryAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanMemoryAllocation")
            .field("name", &self.name)
            .field("offset", &self.offset())
            .field("size", &self.size())
            .field("location", &self.location)
            .finish()
    }
}

impl Drop for VulkanMemoryAllocation {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.get_mut().take()
            && let Err(e) = self.allocator.lock().free(allocation)
        {
            log::error!("Failed to free allocation: {e}");
        }
    }
}

