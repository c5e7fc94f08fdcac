//! CPU/GPU synchronization.

mod fence;
mod fence_set;

pub use fence::Fence;
pub use fence_set::FenceSet;
