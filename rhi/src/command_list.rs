//! Command lists.
//!
//! A [`CommandList`] maps 1:1 to a native command buffer. It is recorded by a
//! single thread between [`begin`](CommandList::begin) and
//! [`end`](CommandList::end) and then moved into a
//! [`QueueSubmission`](crate::backend::QueueSubmission). Every resource it
//! references is retained until the queue has executed it.

use std::ops::Range;
use std::sync::Arc;

use crate::backend::dummy::{DummyCommand, DummyCommandList};
#[cfg(feature = "vulkan-backend")]
use crate::backend::vulkan::VulkanCommandList;
use crate::draw::{DrawItem, DrawItemProperties};
use crate::error::RhiError;
use crate::frame_graph::SubmitRange;
use crate::resources::{Buffer, Image};
use crate::types::{CommandListLevel, HardwareQueueClass};
use crate::validation::ValidationMode;

/// Backend command buffer.
#[derive(Debug)]
pub enum NativeCommandList {
    /// Recorded command list replayed by a dummy queue.
    Dummy(DummyCommandList),
    /// Vulkan command buffer with its own pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(VulkanCommandList),
}

/// Recording state of a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    /// Created, never begun.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Ended and ready to submit or execute.
    Executable,
}

/// Render pass state a secondary command list inherits from its primary.
///
/// Handles are raw native values owned by the surrounding renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InheritanceInfo {
    /// Render pass handle.
    pub render_pass: u64,
    /// Subpass index inside the render pass.
    pub subpass: u32,
    /// Framebuffer handle.
    pub framebuffer: u64,
}

/// Which side of an upload an image barrier sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadBarrier {
    /// Make the mips writable by copies.
    BeginTransfer,
    /// Make the uploaded mips readable by shaders.
    EndTransfer,
}

/// Rows of one image subresource copied from a buffer. Buffer rows are
/// tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferImageCopyRegion {
    /// Offset of the first row in the source buffer.
    pub buffer_offset: u64,
    /// Destination mip.
    pub mip: u32,
    /// Destination array layer.
    pub array_layer: u32,
    /// First destination row.
    pub first_row: u32,
    /// Number of rows.
    pub row_count: u32,
}

#[derive(Debug)]
enum Retained {
    Buffer(Arc<Buffer>),
    Image(Arc<Image>),
    DrawItem(Arc<DrawItem>),
    CommandList(CommandList),
}

/// A command list for one hardware queue.
#[derive(Debug)]
pub struct CommandList {
    name: Option<String>,
    queue_class: HardwareQueueClass,
    level: CommandListLevel,
    state: CommandListState,
    validation: ValidationMode,
    submit_range: Option<SubmitRange>,
    draw_count: u32,
    label_depth: u32,
    retained: Vec<Retained>,
    native: NativeCommandList,
}

impl CommandList {
    pub(crate) fn new(
        native: NativeCommandList,
        queue_class: HardwareQueueClass,
        level: CommandListLevel,
        validation: ValidationMode,
    ) -> Self {
        Self {
            name: None,
            queue_class,
            level,
            state: CommandListState::Initial,
            validation,
            submit_range: None,
            draw_count: 0,
            label_depth: 0,
            retained: Vec::new(),
            native,
        }
    }

    /// Debug name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Queue class the list records for.
    pub fn queue_class(&self) -> HardwareQueueClass {
        self.queue_class
    }

    /// Primary or secondary.
    pub fn level(&self) -> CommandListLevel {
        self.level
    }

    /// Recording state.
    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// Whether the list is between `begin` and `end`.
    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }

    /// Draw items recorded since the last `begin`.
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// The backend command buffer.
    pub fn native(&self) -> &NativeCommandList {
        &self.native
    }

    /// Set the debug name, forwarded to the native object.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        match &mut self.native {
            NativeCommandList::Dummy(_) => {}
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.set_name(&name),
        }
        self.name = Some(name);
    }

    /// Start recording.
    ///
    /// Secondary lists must be given the render pass state they inherit.
    pub fn begin(&mut self, inheritance: Option<&InheritanceInfo>) -> Result<(), RhiError> {
        if self.is_recording() {
            log::error!("Command list {:?} is already recording", self.name);
            return Err(RhiError::InvalidParameter(
                "command list is already recording".to_string(),
            ));
        }
        if self.level == CommandListLevel::Secondary && inheritance.is_none() {
            log::error!(
                "Secondary command list {:?} begun without inheritance info",
                self.name
            );
            debug_assert!(false, "secondary command list requires inheritance info");
            return Err(RhiError::InvalidParameter(
                "secondary command list requires inheritance info".to_string(),
            ));
        }

        match &mut self.native {
            NativeCommandList::Dummy(native) => native.reset(),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.begin(self.level, inheritance)?,
        }

        self.retained.clear();
        self.draw_count = 0;
        self.label_depth = 0;
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> Result<(), RhiError> {
        if !self.is_recording() {
            log::error!("Command list {:?} ended while not recording", self.name);
            return Err(RhiError::InvalidParameter(
                "command list is not recording".to_string(),
            ));
        }
        if self.label_depth > 0 {
            log::warn!(
                "Command list {:?} ended with {} open debug labels",
                self.name,
                self.label_depth
            );
            while self.label_depth > 0 {
                self.end_debug_label();
            }
        }

        match &mut self.native {
            NativeCommandList::Dummy(_) => {}
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.end()?,
        }

        self.state = CommandListState::Executable;
        Ok(())
    }

    /// Restrict the submit indices accepted by draw submission.
    pub fn set_submit_range(&mut self, range: Option<SubmitRange>) {
        self.submit_range = range;
    }

    /// The active submit range, if any.
    pub fn submit_range(&self) -> Option<SubmitRange> {
        self.submit_range
    }

    /// Check a submit index against the active range.
    ///
    /// With validation disabled every index is accepted.
    pub fn validate_submit_index(&self, submit_index: u32) -> bool {
        if !self.validation.is_enabled() {
            return true;
        }
        match self.submit_range {
            Some(range) if !range.contains(submit_index) => {
                log::error!(
                    "Submit index {submit_index} is outside the range {range} of command list {:?}",
                    self.name
                );
                false
            }
            _ => true,
        }
    }

    fn check_recording(&self, operation: &str) -> bool {
        if self.validation.is_enabled() && !self.is_recording() {
            log::error!(
                "{operation} on command list {:?} which is not recording",
                self.name
            );
            return false;
        }
        true
    }

    /// Open a debug label region.
    pub fn begin_debug_label(&mut self, label: &str, color: [f32; 4]) {
        if !self.check_recording("begin_debug_label") {
            return;
        }
        match &mut self.native {
            NativeCommandList::Dummy(native) => {
                native.record(DummyCommand::BeginLabel(label.to_string()));
            }
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.begin_label(label, color),
        }
        let _ = color;
        self.label_depth += 1;
    }

    /// Close the innermost debug label region.
    pub fn end_debug_label(&mut self) {
        if self.label_depth == 0 {
            log::error!("end_debug_label without an open label on {:?}", self.name);
            return;
        }
        match &mut self.native {
            NativeCommandList::Dummy(native) => native.record(DummyCommand::EndLabel),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.end_label(),
        }
        self.label_depth -= 1;
    }

    /// Record a draw item.
    ///
    /// Returns `false` when validation rejects the submit index or the list
    /// is not recording.
    pub fn submit_draw_item(&mut self, properties: &DrawItemProperties, submit_index: u32) -> bool {
        if !self.check_recording("submit_draw_item") || !self.validate_submit_index(submit_index) {
            return false;
        }

        let item = Arc::clone(&properties.item);
        match &mut self.native {
            NativeCommandList::Dummy(native) => native.record(DummyCommand::Draw {
                item: Arc::clone(&item),
                submit_index,
            }),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.draw(&item),
        }
        self.retained.push(Retained::DrawItem(item));
        self.draw_count += 1;
        true
    }

    /// Copy `size` bytes between buffers.
    pub fn copy_buffer(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    ) {
        if !self.check_recording("copy_buffer") {
            return;
        }
        if self.validation.is_enabled()
            && (src_offset + size > src.size() || dst_offset + size > dst.size())
        {
            log::error!(
                "copy_buffer of {size} bytes exceeds {:?} or {:?}",
                src.label(),
                dst.label()
            );
            return;
        }

        match &mut self.native {
            NativeCommandList::Dummy(native) => native.record(DummyCommand::CopyBuffer {
                src: Arc::clone(src),
                src_offset,
                dst: Arc::clone(dst),
                dst_offset,
                size,
            }),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => {
                native.copy_buffer(src, src_offset, dst, dst_offset, size)
            }
        }
        self.retained.push(Retained::Buffer(Arc::clone(src)));
        self.retained.push(Retained::Buffer(Arc::clone(dst)));
    }

    /// Copy tightly packed rows from a buffer into an image subresource.
    pub fn copy_buffer_to_image(
        &mut self,
        src: &Arc<Buffer>,
        dst: &Arc<Image>,
        region: BufferImageCopyRegion,
    ) {
        if !self.check_recording("copy_buffer_to_image") {
            return;
        }
        if self.validation.is_enabled() {
            let descriptor = dst.descriptor();
            let (_, height) = descriptor.mip_extent(region.mip);
            let size = descriptor.mip_row_pitch(region.mip) * u64::from(region.row_count);
            if region.mip >= descriptor.mip_levels
                || region.array_layer >= descriptor.array_layers
                || region.first_row + region.row_count > height
                || region.buffer_offset + size > src.size()
            {
                log::error!(
                    "copy_buffer_to_image region {region:?} is out of range for {:?}",
                    dst.label()
                );
                return;
            }
        }

        match &mut self.native {
            NativeCommandList::Dummy(native) => native.record(DummyCommand::CopyBufferToImage {
                src: Arc::clone(src),
                dst: Arc::clone(dst),
                region,
            }),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.copy_buffer_to_image(src, dst, &region),
        }
        self.retained.push(Retained::Buffer(Arc::clone(src)));
        self.retained.push(Retained::Image(Arc::clone(dst)));
    }

    /// Transition mips of an image around an upload.
    pub fn image_upload_barrier(
        &mut self,
        image: &Arc<Image>,
        mips: Range<u32>,
        barrier: UploadBarrier,
    ) {
        if !self.check_recording("image_upload_barrier") {
            return;
        }
        match &mut self.native {
            NativeCommandList::Dummy(native) => native.record(DummyCommand::ImageBarrier {
                image: Arc::clone(image),
                mips,
                barrier,
            }),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => native.image_upload_barrier(image, mips, barrier),
        }
        self.retained.push(Retained::Image(Arc::clone(image)));
    }

    /// Execute recorded secondary lists from this primary list.
    pub fn execute_secondary(&mut self, lists: Vec<CommandList>) {
        if !self.check_recording("execute_secondary") {
            return;
        }
        debug_assert_eq!(
            self.level,
            CommandListLevel::Primary,
            "secondary lists can only be executed from a primary list"
        );
        let lists: Vec<CommandList> = lists
            .into_iter()
            .filter(|list| {
                let valid = list.level == CommandListLevel::Secondary
                    && list.state == CommandListState::Executable;
                if !valid {
                    log::error!(
                        "execute_secondary: skipping {:?} ({:?}, {:?})",
                        list.name,
                        list.level,
                        list.state
                    );
                }
                valid
            })
            .collect();
        if lists.is_empty() {
            return;
        }
        self.draw_count += lists.iter().map(|list| list.draw_count).sum::<u32>();

        match &mut self.native {
            NativeCommandList::Dummy(native) => native.record(DummyCommand::ExecuteSecondary(lists)),
            #[cfg(feature = "vulkan-backend")]
            NativeCommandList::Vulkan(native) => {
                native.execute_commands(&lists);
                self.retained
                    .extend(lists.into_iter().map(Retained::CommandList));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{DrawArguments, PipelineStateHandle};

    fn dummy_list(level: CommandListLevel) -> CommandList {
        CommandList::new(
            NativeCommandList::Dummy(DummyCommandList::default()),
            HardwareQueueClass::Graphics,
            level,
            ValidationMode::Enabled,
        )
    }

    fn draw_properties() -> DrawItemProperties {
        DrawItemProperties::new(Arc::new(DrawItem::new(
            PipelineStateHandle(1),
            DrawArguments::Linear {
                vertex_count: 3,
                first_vertex: 0,
            },
        )))
    }

    #[test]
    fn test_begin_end_state() {
        let mut list = dummy_list(CommandListLevel::Primary);
        assert_eq!(list.state(), CommandListState::Initial);
        list.begin(None).unwrap();
        assert!(list.is_recording());
        assert!(list.begin(None).is_err());
        list.end().unwrap();
        assert_eq!(list.state(), CommandListState::Executable);
        assert!(list.end().is_err());
    }

    #[test]
    fn test_submit_index_validation() {
        let mut list = dummy_list(CommandListLevel::Primary);
        list.begin(None).unwrap();
        list.set_submit_range(Some(SubmitRange::new(2, 5)));

        let props = draw_properties();
        assert!(!list.submit_draw_item(&props, 1));
        assert!(list.submit_draw_item(&props, 2));
        assert!(list.submit_draw_item(&props, 4));
        assert!(!list.submit_draw_item(&props, 5));
        assert_eq!(list.draw_count(), 2);
    }

    #[test]
    fn test_validation_disabled_accepts_any_index() {
        let mut list = CommandList::new(
            NativeCommandList::Dummy(DummyCommandList::default()),
            HardwareQueueClass::Graphics,
            CommandListLevel::Primary,
            ValidationMode::Disabled,
        );
        list.set_submit_range(Some(SubmitRange::new(0, 1)));
        assert!(list.validate_submit_index(10));
    }

    #[test]
    fn test_open_labels_closed_on_end() {
        let mut list = dummy_list(CommandListLevel::Primary);
        list.begin(None).unwrap();
        list.begin_debug_label("outer", [1.0, 0.0, 0.0, 1.0]);
        list.begin_debug_label("inner", [0.0, 1.0, 0.0, 1.0]);
        list.end_debug_label();
        list.end().unwrap();

        let NativeCommandList::Dummy(native) = list.native() else {
            unreachable!()
        };
        assert_eq!(native.command_count(), 4);
    }

    #[test]
    fn test_execute_secondary_accumulates_draws() {
        let inheritance = InheritanceInfo {
            render_pass: 1,
            subpass: 0,
            framebuffer: 2,
        };
        let mut secondary = dummy_list(CommandListLevel::Secondary);
        secondary.begin(Some(&inheritance)).unwrap();
        assert!(secondary.submit_draw_item(&draw_properties(), 0));
        secondary.end().unwrap();

        let mut primary = dummy_list(CommandListLevel::Primary);
        primary.begin(None).unwrap();
        primary.execute_secondary(vec![secondary]);
        primary.end().unwrap();
        assert_eq!(primary.draw_count(), 1);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "inheritance info"))]
    fn test_secondary_requires_inheritance() {
        let mut secondary = dummy_list(CommandListLevel::Secondary);
        assert!(secondary.begin(None).is_err());
    }
}
