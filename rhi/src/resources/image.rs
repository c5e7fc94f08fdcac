//! GPU image resource.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{GpuImage, TimelinePoint};
use crate::device::Device;
use crate::error::RhiError;
use crate::memory::MemoryAllocation;
use crate::types::ImageDescriptor;

use super::tiles::TileMapping;

/// Size of one reserved-image tile in bytes.
pub const TILE_SIZE_IN_BYTES: u64 = 64 * 1024;

/// A GPU image resource.
///
/// Images track a resident mip: mips at or above it hold valid data. A new
/// image has nothing resident (`resident_mip() == mip_levels`); streaming
/// uploads lower the resident mip as finer mips arrive.
pub struct Image {
    device: Weak<Device>,
    descriptor: ImageDescriptor,
    native: GpuImage,
    resident_mip: AtomicU32,
    tiles: Option<Mutex<TileTable>>,
}

/// Tile residency of a reserved image. Mappings queued on a hardware queue
/// wait in `pending` until the queue reaches their completion point.
struct TileTable {
    mapped: Vec<bool>,
    pending: VecDeque<(TimelinePoint, Vec<TileMapping>)>,
}

impl TileTable {
    /// Apply every queued update whose completion point has been reached,
    /// in queue order.
    fn settle(&mut self) {
        while let Some((point, _)) = self.pending.front()
            && point.timeline.completed_value() >= point.value
        {
            let Some((_, mappings)) = self.pending.pop_front() else {
                break;
            };
            for mapping in &mappings {
                if let Some(state) = self.mapped.get_mut(mapping.tile_index as usize) {
                    *state = mapping.binding.is_some();
                }
            }
        }
    }
}

impl Image {
    /// Create a new image (called by Device).
    pub(crate) fn new(device: Weak<Device>, descriptor: ImageDescriptor, native: GpuImage) -> Self {
        let tiles = descriptor.reserved.then(|| {
            let tile_count = descriptor.total_size().div_ceil(TILE_SIZE_IN_BYTES);
            Mutex::new(TileTable {
                mapped: vec![false; tile_count as usize],
                pending: VecDeque::new(),
            })
        });
        Self {
            device,
            resident_mip: AtomicU32::new(descriptor.mip_levels),
            descriptor,
            native,
            tiles,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    /// Get the image descriptor.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Get the image label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// The native image.
    pub fn native(&self) -> &GpuImage {
        &self.native
    }

    /// The memory bound to the whole image, if any.
    pub fn memory(&self) -> Option<&MemoryAllocation> {
        self.native.memory()
    }

    /// Most detailed mip holding valid data.
    pub fn resident_mip(&self) -> u32 {
        self.resident_mip.load(Ordering::Acquire)
    }

    /// Record that mips `[mip, mip_levels)` hold valid data.
    pub fn set_resident_mip(&self, mip: u32) {
        debug_assert!(mip <= self.descriptor.mip_levels);
        self.resident_mip.store(mip, Ordering::Release);
    }

    /// Number of tiles of a reserved image (zero otherwise).
    pub fn tile_count(&self) -> u32 {
        self.tiles
            .as_ref()
            .map_or(0, |tiles| tiles.lock().mapped.len() as u32)
    }

    /// Whether a tile of a reserved image is mapped to memory.
    ///
    /// Reflects the mappings the queues have applied so far, not the ones
    /// still waiting in a queue.
    pub fn is_tile_mapped(&self, tile_index: u32) -> bool {
        self.tiles.as_ref().is_some_and(|tiles| {
            let mut tiles = tiles.lock();
            tiles.settle();
            tiles
                .mapped
                .get(tile_index as usize)
                .copied()
                .unwrap_or(false)
        })
    }

    /// Number of mapped tiles.
    pub fn mapped_tile_count(&self) -> u32 {
        self.tiles.as_ref().map_or(0, |tiles| {
            let mut tiles = tiles.lock();
            tiles.settle();
            tiles.mapped.iter().filter(|mapped| **mapped).count() as u32
        })
    }

    /// Track mappings that take effect once `completion` is reached.
    pub(crate) fn queue_tile_mappings(&self, completion: TimelinePoint, mappings: &[TileMapping]) {
        let Some(tiles) = self.tiles.as_ref() else {
            return;
        };
        tiles.lock().pending.push_back((completion, mappings.to_vec()));
    }

    /// Drop tracked mappings the queue rejected.
    pub(crate) fn cancel_tile_mappings(&self, completion: &TimelinePoint) {
        let Some(tiles) = self.tiles.as_ref() else {
            return;
        };
        tiles.lock().pending.retain(|(point, _)| {
            point.value != completion.value || !point.timeline.same_timeline(&completion.timeline)
        });
    }

    /// Read one subresource back through a host mapping.
    ///
    /// Only images with host-visible memory (dummy backend) can be read.
    pub fn read_subresource(&self, mip: u32, array_layer: u32) -> Result<Vec<u8>, RhiError> {
        if mip >= self.descriptor.mip_levels || array_layer >= self.descriptor.array_layers {
            return Err(RhiError::InvalidParameter(format!(
                "subresource mip {mip} layer {array_layer} is out of range"
            )));
        }
        let offset = self.descriptor.subresource_offset(mip, array_layer);
        let size = self.descriptor.mip_layer_size(mip) as usize;
        self.memory()
            .and_then(|memory| memory.read_bytes(offset, size))
            .ok_or_else(|| {
                RhiError::InvalidParameter(format!(
                    "image {:?} memory is not host visible",
                    self.label()
                ))
            })
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("mip_levels", &self.descriptor.mip_levels)
            .field("format", &self.descriptor.format)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Image: Send, Sync);
