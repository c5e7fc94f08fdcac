//! Draw items, draw packets and per-tag draw list collection.

mod context;
mod item;
mod sort;
mod tag;

pub use context::DrawListContext;
pub use item::{
    DrawArguments, DrawItem, DrawItemProperties, DrawPacket, DrawPacketBuilder, DrawRequest,
    IndexBufferView, IndexFormat, PipelineStateHandle, VertexBufferView,
};
pub use sort::{DrawListSortType, sort_draw_list};
pub use tag::{DrawListMask, DrawListTag, DrawListTagRegistry, MAX_DRAW_LIST_TAGS};
