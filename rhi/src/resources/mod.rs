//! GPU resources.
//!
//! This module contains the GPU resource types that are created by [`Device`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Image`] - GPU image with resident-mip tracking
//! - [`TileHeap`] - memory that reserved-image tiles are mapped into
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//! Each resource holds a weak reference back to its parent device.
//!
//! [`Device`]: crate::Device
//! [`Arc`]: std::sync::Arc

mod buffer;
mod image;
mod tiles;

pub use buffer::Buffer;
pub use image::{Image, TILE_SIZE_IN_BYTES};
pub use tiles::{TileBinding, TileHeap, TileMapping, TileMappingRequest};
