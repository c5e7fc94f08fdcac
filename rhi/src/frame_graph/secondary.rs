//! Execute group recording secondary command lists inside a render pass.

use std::sync::Arc;

use crate::command_list::{CommandList, InheritanceInfo};
use crate::device::Device;
use crate::error::RhiError;
use crate::types::CommandListLevel;

use super::group::{ExecuteGroup, ExecuteGroupBase, JobPolicy, split_scope};
use super::scope::Scope;

/// Execute group whose contexts record secondary command lists that
/// inherit the render pass of a primary list.
///
/// [`set_render_context`](Self::set_render_context) must be called before any
/// context begins. The recorded lists are not submittable on their own; hand
/// them to [`CommandList::execute_secondary`] on the primary list.
#[derive(Debug)]
pub struct FrameGraphExecuteGroupSecondary {
    base: ExecuteGroupBase,
    render_context: Option<InheritanceInfo>,
}

impl FrameGraphExecuteGroupSecondary {
    /// `scope` split over `command_list_count` secondary lists.
    pub fn new(
        device: Arc<Device>,
        scope: Arc<dyn Scope>,
        command_list_count: u32,
        job_policy: JobPolicy,
    ) -> Self {
        let contexts = split_scope(scope, command_list_count);
        let count = contexts.len() as u32;
        Self {
            base: ExecuteGroupBase::new(
                device,
                job_policy,
                CommandListLevel::Secondary,
                contexts,
                count,
            ),
            render_context: None,
        }
    }

    /// Set the render pass, subpass and framebuffer the lists inherit.
    pub fn set_render_context(&mut self, inheritance: InheritanceInfo) {
        self.render_context = Some(inheritance);
    }

    pub fn render_context(&self) -> Option<&InheritanceInfo> {
        self.render_context.as_ref()
    }
}

impl ExecuteGroup for FrameGraphExecuteGroupSecondary {
    fn base(&self) -> &ExecuteGroupBase {
        &self.base
    }

    fn begin_context_internal(
        &self,
        index: u32,
        command_list: &mut Option<CommandList>,
    ) -> Result<(), RhiError> {
        let Some(inheritance) = self.render_context.as_ref() else {
            log::error!("Secondary execute group: context {index} begun without a render context");
            debug_assert!(false, "set_render_context must be called before begin_context");
            return Err(RhiError::InvalidParameter(
                "secondary execute group has no render context".to_string(),
            ));
        };

        let mut list = self.base.create_command_list(index)?;
        list.begin(Some(inheritance))?;
        *command_list = Some(list);
        Ok(())
    }

    fn end_context_internal(
        &self,
        _index: u32,
        command_list: &mut Option<CommandList>,
    ) -> Result<(), RhiError> {
        match command_list.as_mut() {
            Some(list) => list.end(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{DrawArguments, DrawItem, DrawItemProperties, PipelineStateHandle};
    use crate::frame_graph::{FrameGraphExecuteContext, ScopeDescriptor};
    use crate::parameters::{BackendType, DeviceParameters};
    use crate::types::HardwareQueueClass;

    struct DrawScope {
        descriptor: ScopeDescriptor,
        items: Vec<DrawItemProperties>,
    }

    impl Scope for DrawScope {
        fn descriptor(&self) -> &ScopeDescriptor {
            &self.descriptor
        }

        fn execute(&self, context: &mut FrameGraphExecuteContext<'_>) {
            context.submit_draw_list(&self.items);
        }
    }

    fn scope(item_count: u32) -> Arc<dyn Scope> {
        let item = Arc::new(DrawItem::new(
            PipelineStateHandle(1),
            DrawArguments::Linear {
                vertex_count: 3,
                first_vertex: 0,
            },
        ));
        Arc::new(DrawScope {
            descriptor: ScopeDescriptor::new("transparent", HardwareQueueClass::Graphics)
                .with_estimated_item_count(item_count),
            items: (0..item_count)
                .map(|_| DrawItemProperties::new(Arc::clone(&item)))
                .collect(),
        })
    }

    fn device() -> Arc<Device> {
        Device::new(DeviceParameters::new().with_backend(BackendType::Dummy)).unwrap()
    }

    #[test]
    fn test_secondary_lists_inherit_and_are_not_submittable() {
        let mut group = FrameGraphExecuteGroupSecondary::new(device(), scope(5), 2, JobPolicy::Parallel);
        group.set_render_context(InheritanceInfo {
            render_pass: 1,
            subpass: 0,
            framebuffer: 2,
        });

        group.begin().unwrap();
        for i in 0..2 {
            group.begin_context(i).unwrap();
            group.execute_context(i).unwrap();
            group.end_context(i).unwrap();
        }
        assert!(group.is_complete());
        assert!(!group.is_submittable());

        let lists = group.take_command_lists();
        assert_eq!(lists.len(), 2);
        assert!(lists.iter().all(|list| list.level() == CommandListLevel::Secondary));
        assert_eq!(lists.iter().map(CommandList::draw_count).sum::<u32>(), 5);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "set_render_context"))]
    fn test_missing_render_context() {
        let group = FrameGraphExecuteGroupSecondary::new(device(), scope(1), 1, JobPolicy::Serial);
        group.begin().unwrap();
        assert!(group.begin_context(0).is_err());
    }
}
