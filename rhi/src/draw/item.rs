//! Draw items and draw packets.

use std::sync::Arc;

use crate::resources::Buffer;

use super::tag::{DrawListMask, DrawListTag};

/// Native pipeline state object handle. Zero means "keep the bound pipeline".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineStateHandle(pub u64);

/// Index element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

/// Index buffer binding.
#[derive(Debug, Clone)]
pub struct IndexBufferView {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub format: IndexFormat,
}

/// Vertex buffer binding.
#[derive(Debug, Clone)]
pub struct VertexBufferView {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
}

/// Draw call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawArguments {
    /// Non-indexed draw.
    Linear { vertex_count: u32, first_vertex: u32 },
    /// Indexed draw.
    Indexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

/// A renderable unit: pipeline state plus geometry.
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub pipeline_state: PipelineStateHandle,
    pub arguments: DrawArguments,
    pub stencil_ref: u8,
    pub instance_count: u32,
    pub index_buffer: Option<IndexBufferView>,
    pub vertex_buffers: Vec<VertexBufferView>,
}

impl DrawItem {
    /// Create a single-instance draw item without bound geometry.
    pub fn new(pipeline_state: PipelineStateHandle, arguments: DrawArguments) -> Self {
        Self {
            pipeline_state,
            arguments,
            stencil_ref: 0,
            instance_count: 1,
            index_buffer: None,
            vertex_buffers: Vec::new(),
        }
    }

    pub fn with_instance_count(mut self, instance_count: u32) -> Self {
        self.instance_count = instance_count;
        self
    }

    pub fn with_stencil_ref(mut self, stencil_ref: u8) -> Self {
        self.stencil_ref = stencil_ref;
        self
    }

    pub fn with_index_buffer(mut self, view: IndexBufferView) -> Self {
        self.index_buffer = Some(view);
        self
    }

    pub fn with_vertex_buffer(mut self, view: VertexBufferView) -> Self {
        self.vertex_buffers.push(view);
        self
    }
}

/// A draw item as placed in a draw list.
#[derive(Debug, Clone)]
pub struct DrawItemProperties {
    /// The shared draw item.
    pub item: Arc<DrawItem>,
    /// Primary sort key.
    pub sort_key: u64,
    /// View depth, set when the item is added to a draw list context.
    pub depth: f32,
    /// Filter bits matched against the view's filter mask.
    pub draw_filter_mask: u32,
}

impl DrawItemProperties {
    /// Properties with a zero sort key and depth that pass every filter.
    pub fn new(item: Arc<DrawItem>) -> Self {
        Self {
            item,
            sort_key: 0,
            depth: 0.0,
            draw_filter_mask: u32::MAX,
        }
    }

    pub fn with_sort_key(mut self, sort_key: u64) -> Self {
        self.sort_key = sort_key;
        self
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_draw_filter_mask(mut self, draw_filter_mask: u32) -> Self {
        self.draw_filter_mask = draw_filter_mask;
        self
    }
}

/// One draw item to add to a packet.
#[derive(Debug, Clone)]
pub struct DrawRequest {
    /// Draw list the item goes to.
    pub list_tag: DrawListTag,
    /// The item.
    pub item: DrawItem,
    /// Sort key within the list.
    pub sort_key: u64,
}

impl DrawRequest {
    pub fn new(list_tag: DrawListTag, item: DrawItem) -> Self {
        Self {
            list_tag,
            item,
            sort_key: 0,
        }
    }

    pub fn with_sort_key(mut self, sort_key: u64) -> Self {
        self.sort_key = sort_key;
        self
    }
}

/// An immutable group of draw items, each bound for one draw list.
#[derive(Debug, Clone, Default)]
pub struct DrawPacket {
    entries: Vec<(DrawListTag, DrawItemProperties)>,
    draw_list_mask: DrawListMask,
    draw_filter_mask: u32,
}

impl DrawPacket {
    /// Number of draw items.
    pub fn draw_item_count(&self) -> usize {
        self.entries.len()
    }

    /// Union of the tags of every item.
    pub fn draw_list_mask(&self) -> DrawListMask {
        self.draw_list_mask
    }

    /// Filter mask applied to every item.
    pub fn draw_filter_mask(&self) -> u32 {
        self.draw_filter_mask
    }

    /// Items with their target tags, in insertion order.
    pub fn draw_items(&self) -> impl Iterator<Item = (DrawListTag, &DrawItemProperties)> {
        self.entries.iter().map(|(tag, properties)| (*tag, properties))
    }
}

/// Builds a [`DrawPacket`].
///
/// # Example
///
/// ```ignore
/// let mut builder = DrawPacketBuilder::new();
/// builder.add_draw_item(DrawRequest::new(opaque_tag, item).with_sort_key(2));
/// let packet = builder.build();
/// ```
#[derive(Debug)]
pub struct DrawPacketBuilder {
    requests: Vec<DrawRequest>,
    draw_filter_mask: u32,
}

impl DrawPacketBuilder {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            draw_filter_mask: u32::MAX,
        }
    }

    /// Add a draw item. Requests with an invalid tag are dropped.
    pub fn add_draw_item(&mut self, request: DrawRequest) -> &mut Self {
        if request.list_tag.is_valid() {
            self.requests.push(request);
        } else {
            log::error!("DrawPacketBuilder: draw request with an invalid draw list tag");
        }
        self
    }

    pub fn set_draw_filter_mask(&mut self, draw_filter_mask: u32) -> &mut Self {
        self.draw_filter_mask = draw_filter_mask;
        self
    }

    /// Build the packet and reset the builder.
    pub fn build(&mut self) -> DrawPacket {
        let draw_filter_mask = self.draw_filter_mask;
        let entries: Vec<_> = self
            .requests
            .drain(..)
            .map(|request| {
                let properties = DrawItemProperties::new(Arc::new(request.item))
                    .with_sort_key(request.sort_key)
                    .with_draw_filter_mask(draw_filter_mask);
                (request.list_tag, properties)
            })
            .collect();
        self.draw_filter_mask = u32::MAX;

        DrawPacket {
            draw_list_mask: entries.iter().map(|(tag, _)| *tag).collect(),
            entries,
            draw_filter_mask,
        }
    }
}

impl Default for DrawPacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> DrawItem {
        DrawItem::new(
            PipelineStateHandle(7),
            DrawArguments::Linear {
                vertex_count: 3,
                first_vertex: 0,
            },
        )
    }

    #[test]
    fn test_builder_collects_mask_and_keys() {
        let mut builder = DrawPacketBuilder::new();
        builder
            .add_draw_item(DrawRequest::new(DrawListTag::new(1), item()).with_sort_key(9))
            .add_draw_item(DrawRequest::new(DrawListTag::new(4), item()))
            .add_draw_item(DrawRequest::new(DrawListTag::NULL, item()))
            .set_draw_filter_mask(0b10);
        let packet = builder.build();

        assert_eq!(packet.draw_item_count(), 2);
        assert_eq!(packet.draw_list_mask().count(), 2);
        assert_eq!(packet.draw_filter_mask(), 0b10);

        let (tag, properties) = packet.draw_items().next().unwrap();
        assert_eq!(tag, DrawListTag::new(1));
        assert_eq!(properties.sort_key, 9);
        assert_eq!(properties.draw_filter_mask, 0b10);
    }

    #[test]
    fn test_builder_resets_after_build() {
        let mut builder = DrawPacketBuilder::new();
        builder.add_draw_item(DrawRequest::new(DrawListTag::new(0), item()));
        let _ = builder.build();
        let empty = builder.build();
        assert_eq!(empty.draw_item_count(), 0);
        assert!(empty.draw_list_mask().is_empty());
    }
}
