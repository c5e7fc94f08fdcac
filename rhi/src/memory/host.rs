//! Host-memory heap backing the dummy backend.
//!
//! Allocations are sub-ranges of large blocks. [`HostHeap::compact`] repacks
//! every block that has no mapped allocation, which moves allocations; their
//! offsets must therefore always be queried from the heap, never cached.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::HostMemoryAccess;

/// Alignment of every host allocation.
const HOST_ALLOCATION_ALIGNMENT: u64 = 16;

/// Default size of a heap block.
pub const DEFAULT_HOST_BLOCK_SIZE: u64 = 16 * 1024 * 1024;

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

struct HostBlock {
    ptr: NonNull<u8>,
    size: u64,
    cursor: u64,
}

impl HostBlock {
    fn new(size: u64) -> Self {
        let storage = vec![0u8; size as usize].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(storage)).cast::<u8>();
        Self {
            ptr,
            size,
            cursor: 0,
        }
    }

    fn try_bump(&mut self, size: u64) -> Option<u64> {
        let offset = align_up(self.cursor, HOST_ALLOCATION_ALIGNMENT);
        if offset + size > self.size {
            return None;
        }
        self.cursor = offset + size;
        Some(offset)
    }
}

impl Drop for HostBlock {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.size as usize);
        // SAFETY: `ptr` came from `Box::leak` of a boxed slice of exactly `size` bytes.
        drop(unsafe { Box::from_raw(slice) });
    }
}

#[derive(Debug, Clone, Copy)]
struct AllocationRecord {
    block: usize,
    offset: u64,
    size: u64,
    map_count: u32,
}

#[derive(Default)]
struct HeapState {
    blocks: Vec<Option<HostBlock>>,
    allocations: HashMap<u64, AllocationRecord>,
    next_id: u64,
}

impl HeapState {
    fn block_has_mapped(&self, block: usize) -> bool {
        self.allocations
            .values()
            .any(|record| record.block == block && record.map_count > 0)
    }

    fn insert_block(&mut self, block: HostBlock) -> usize {
        if let Some(slot) = self.blocks.iter().position(Option::is_none) {
            self.blocks[slot] = Some(block);
            slot
        } else {
            self.blocks.push(Some(block));
            self.blocks.len() - 1
        }
    }
}

/// Snapshot of heap usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostHeapStats {
    /// Live blocks.
    pub block_count: usize,
    /// Live allocations.
    pub allocation_count: usize,
    /// Bytes held by live allocations.
    pub allocated_bytes: u64,
    /// Cache invalidations issued before read maps.
    pub invalidations: u64,
    /// Cache flushes issued after write maps.
    pub flushes: u64,
}

/// A growable host heap made of fixed-size blocks.
pub struct HostHeap {
    block_size: u64,
    state: Mutex<HeapState>,
    invalidations: AtomicU64,
    flushes: AtomicU64,
}

// SAFETY: block pointers are owned by the heap and only handed out while an
// allocation is mapped; all bookkeeping is behind the mutex.
unsafe impl Send for HostHeap {}
unsafe impl Sync for HostHeap {}

impl std::fmt::Debug for HostHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHeap")
            .field("block_size", &self.block_size)
            .field("stats", &self.stats())
            .finish()
    }
}

impl HostHeap {
    /// Create a heap with the given block size.
    pub fn new(block_size: u64) -> Arc<Self> {
        Arc::new(Self {
            block_size: block_size.max(HOST_ALLOCATION_ALIGNMENT),
            state: Mutex::new(HeapState::default()),
            invalidations: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate(self: &Arc<Self>, size: u64) -> HostAllocation {
        let size = size.max(1);
        let mut state = self.state.lock();

        let placed = state
            .blocks
            .iter_mut()
            .enumerate()
            .find_map(|(index, block)| {
                let block = block.as_mut()?;
                block.try_bump(size).map(|offset| (index, offset))
            });

        let (block, offset) = match placed {
            Some(placed) => placed,
            None => {
                let mut block = HostBlock::new(self.block_size.max(size));
                let offset = block.try_bump(size).unwrap_or(0);
                (state.insert_block(block), offset)
            }
        };

        let id = state.next_id;
        state.next_id += 1;
        state.allocations.insert(
            id,
            AllocationRecord {
                block,
                offset,
                size,
                map_count: 0,
            },
        );
        log::trace!("HostHeap: allocated {size} bytes (id {id}, block {block}, offset {offset})");

        HostAllocation {
            heap: Arc::clone(self),
            id,
            size,
        }
    }

    fn free(&self, id: u64) {
        let mut state = self.state.lock();
        let Some(record) = state.allocations.remove(&id) else {
            return;
        };
        let block_empty = !state
            .allocations
            .values()
            .any(|other| other.block == record.block);
        if block_empty {
            state.blocks[record.block] = None;
        }
    }

    fn record(&self, id: u64) -> Option<AllocationRecord> {
        self.state.lock().allocations.get(&id).copied()
    }

    fn block_size_of(&self, id: u64) -> u64 {
        let state = self.state.lock();
        state
            .allocations
            .get(&id)
            .and_then(|record| state.blocks[record.block].as_ref())
            .map_or(0, |block| block.size)
    }

    fn map(&self, id: u64, access: HostMemoryAccess) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        let record = state.allocations.get_mut(&id)?;
        record.map_count += 1;
        let (block, offset) = (record.block, record.offset);
        let base = state.blocks[block].as_ref()?.ptr;

        if access == HostMemoryAccess::Read {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        // SAFETY: the record lies inside its block.
        Some(unsafe { base.add(offset as usize) })
    }

    fn unmap(&self, id: u64, access: HostMemoryAccess) {
        let mut state = self.state.lock();
        let Some(record) = state.allocations.get_mut(&id) else {
            return;
        };
        if record.map_count == 0 {
            log::error!("HostHeap: unmap of allocation {id} which is not mapped");
            return;
        }
        record.map_count -= 1;
        if access == HostMemoryAccess::Write {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Repack every block without a mapped allocation.
    ///
    /// Returns the number of allocations that moved.
    pub fn compact(&self) -> usize {
        let mut state = self.state.lock();

        let movable: Vec<usize> = (0..state.blocks.len())
            .filter(|&block| state.blocks[block].is_some() && !state.block_has_mapped(block))
            .collect();
        if movable.is_empty() {
            return 0;
        }

        let mut ids: Vec<u64> = state
            .allocations
            .iter()
            .filter(|(_, record)| movable.contains(&record.block))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        let old_blocks: Vec<(usize, HostBlock)> = movable
            .iter()
            .filter_map(|&index| state.blocks[index].take().map(|block| (index, block)))
            .collect();

        let mut moved = 0;
        let mut target: Option<usize> = None;
        for id in ids {
            let Some(record) = state.allocations.get(&id).copied() else {
                continue;
            };
            let Some((_, source)) = old_blocks.iter().find(|(index, _)| *index == record.block)
            else {
                continue;
            };

            let placed = target.and_then(|index| {
                state.blocks[index]
                    .as_mut()
                    .and_then(|block| block.try_bump(record.size))
                    .map(|offset| (index, offset))
            });
            let (block, offset) = match placed {
                Some(placed) => placed,
                None => {
                    let mut block = HostBlock::new(self.block_size.max(record.size));
                    let offset = block.try_bump(record.size).unwrap_or(0);
                    let index = state.insert_block(block);
                    target = Some(index);
                    (index, offset)
                }
            };

            if let Some(destination) = state.blocks[block].as_ref() {
                // SAFETY: source and destination are distinct live blocks and both
                // ranges are in bounds.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        source.ptr.as_ptr().add(record.offset as usize),
                        destination.ptr.as_ptr().add(offset as usize),
                        record.size as usize,
                    );
                }
            }

            if (block, offset) != (record.block, record.offset) {
                moved += 1;
            }
            if let Some(record) = state.allocations.get_mut(&id) {
                record.block = block;
                record.offset = offset;
            }
        }

        log::debug!(
            "HostHeap: compacted {} blocks, moved {} allocations",
            old_blocks.len(),
            moved
        );
        moved
    }

    /// Current usage counters.
    pub fn stats(&self) -> HostHeapStats {
        let state = self.state.lock();
        HostHeapStats {
            block_count: state.blocks.iter().flatten().count(),
            allocation_count: state.allocations.len(),
            allocated_bytes: state.allocations.values().map(|record| record.size).sum(),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// A live allocation in a [`HostHeap`]. Freed on drop.
pub struct HostAllocation {
    heap: Arc<HostHeap>,
    id: u64,
    size: u64,
}

impl std::fmt::Debug for HostAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAllocation")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl HostAllocation {
    /// Current offset inside the owning block.
    pub fn offset(&self) -> u64 {
        self.heap.record(self.id).map_or(0, |record| record.offset)
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size of the block currently holding the allocation.
    pub fn block_size(&self) -> u64 {
        self.heap.block_size_of(self.id)
    }

    /// Map the allocation. The pointer stays valid until the matching unmap.
    pub fn map(&self, access: HostMemoryAccess) -> Option<NonNull<u8>> {
        self.heap.map(self.id, access)
    }

    /// Unmap a previous mapping.
    pub fn unmap(&self, access: HostMemoryAccess) {
        self.heap.unmap(self.id, access);
    }

    /// The owning heap.
    pub fn heap(&self) -> &Arc<HostHeap> {
        &self.heap
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        self.heap.free(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(allocation: &HostAllocation, bytes: &[u8]) {
        let ptr = allocation.map(HostMemoryAccess::Write).unwrap();
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        allocation.unmap(HostMemoryAccess::Write);
    }

    fn read(allocation: &HostAllocation, len: usize) -> Vec<u8> {
        let ptr = allocation.map(HostMemoryAccess::Read).unwrap();
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), out.as_mut_ptr(), len) };
        allocation.unmap(HostMemoryAccess::Read);
        out
    }

    #[test]
    fn test_allocations_share_blocks() {
        let heap = HostHeap::new(1024);
        let a = heap.allocate(100);
        let b = heap.allocate(100);

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 112);
        assert_eq!(a.block_size(), 1024);
        assert_eq!(heap.stats().block_count, 1);

        let big = heap.allocate(4096);
        assert_eq!(big.block_size(), 4096);
        assert_eq!(heap.stats().block_count, 2);
    }

    #[test]
    fn test_compact_moves_unmapped_allocations() {
        let heap = HostHeap::new(256);
        let first = heap.allocate(64);
        let second = heap.allocate(64);
        write(&second, &[7u8; 64]);
        drop(first);

        assert_eq!(second.offset(), 64);
        assert_eq!(heap.compact(), 1);
        assert_eq!(second.offset(), 0);
        assert_eq!(read(&second, 64), vec![7u8; 64]);
    }

    #[test]
    fn test_compact_skips_mapped_blocks() {
        let heap = HostHeap::new(256);
        let first = heap.allocate(64);
        let second = heap.allocate(64);
        drop(first);

        let _ptr = second.map(HostMemoryAccess::Write).unwrap();
        assert_eq!(heap.compact(), 0);
        assert_eq!(second.offset(), 64);
        second.unmap(HostMemoryAccess::Write);
    }

    #[test]
    fn test_flush_and_invalidate_counters() {
        let heap = HostHeap::new(256);
        let allocation = heap.allocate(16);
        write(&allocation, &[1u8; 16]);
        let _ = read(&allocation, 16);

        let stats = heap.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.allocated_bytes, 16);
    }

    #[test]
    fn test_free_releases_empty_blocks() {
        let heap = HostHeap::new(256);
        let allocation = heap.allocate(32);
        drop(allocation);
        assert_eq!(heap.stats(), HostHeapStats::default());
    }
}
