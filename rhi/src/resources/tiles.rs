//! Tile memory for reserved images.

use std::sync::{Arc, Weak};

use crate::backend::GpuTileHeap;
use crate::device::Device;

use super::image::Image;

/// A heap of device memory that reserved-image tiles are mapped into.
pub struct TileHeap {
    device: Weak<Device>,
    tile_count: u32,
    native: GpuTileHeap,
}

impl TileHeap {
    pub(crate) fn new(device: Weak<Device>, tile_count: u32, native: GpuTileHeap) -> Self {
        Self {
            device,
            tile_count,
            native,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    /// Number of tiles the heap holds.
    pub fn tile_count(&self) -> u32 {
        self.tile_count
    }

    /// The native heap.
    pub fn native(&self) -> &GpuTileHeap {
        &self.native
    }
}

impl std::fmt::Debug for TileHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileHeap")
            .field("tile_count", &self.tile_count)
            .finish_non_exhaustive()
    }
}

/// Location inside a tile heap.
#[derive(Debug, Clone)]
pub struct TileBinding {
    /// The heap.
    pub heap: Arc<TileHeap>,
    /// Tile index inside the heap.
    pub heap_tile: u32,
}

/// Mapping of one image tile. A missing binding unmaps the tile.
#[derive(Debug, Clone)]
pub struct TileMapping {
    /// Tile index inside the image.
    pub tile_index: u32,
    /// Heap location, or `None` to unmap.
    pub binding: Option<TileBinding>,
}

impl TileMapping {
    /// Map an image tile to a heap tile.
    pub fn map(tile_index: u32, heap: Arc<TileHeap>, heap_tile: u32) -> Self {
        Self {
            tile_index,
            binding: Some(TileBinding { heap, heap_tile }),
        }
    }

    /// Unmap an image tile.
    pub fn unmap(tile_index: u32) -> Self {
        Self {
            tile_index,
            binding: None,
        }
    }
}

/// A batch of tile mapping updates for one reserved image.
#[derive(Debug, Clone)]
pub struct TileMappingRequest {
    /// The reserved image.
    pub image: Arc<Image>,
    /// Tile updates, applied in order.
    pub mappings: Vec<TileMapping>,
}
