//! The per-context view handed to [`Scope::execute`](super::Scope::execute).

use crate::command_list::CommandList;
use crate::draw::DrawItemProperties;
use crate::types::ScopeId;

use super::scope::SubmitRange;

/// One command-recording target of an execute group.
///
/// Maps 1:1 to a native command list and covers a submit range of the
/// scope being recorded.
#[derive(Debug)]
pub struct FrameGraphExecuteContext<'a> {
    scope_id: &'a ScopeId,
    command_list_index: u32,
    command_list_count: u32,
    submit_range: SubmitRange,
    command_list: &'a mut CommandList,
}

impl<'a> FrameGraphExecuteContext<'a> {
    pub(crate) fn new(
        scope_id: &'a ScopeId,
        command_list_index: u32,
        command_list_count: u32,
        submit_range: SubmitRange,
        command_list: &'a mut CommandList,
    ) -> Self {
        Self {
            scope_id,
            command_list_index,
            command_list_count,
            submit_range,
            command_list,
        }
    }

    pub fn scope_id(&self) -> &ScopeId {
        self.scope_id
    }

    /// Index of this context's command list among the scope's lists.
    pub fn command_list_index(&self) -> u32 {
        self.command_list_index
    }

    /// Number of command lists the scope is split across.
    pub fn command_list_count(&self) -> u32 {
        self.command_list_count
    }

    /// Submit indices this context records.
    pub fn submit_range(&self) -> SubmitRange {
        self.submit_range
    }

    pub fn command_list(&mut self) -> &mut CommandList {
        self.command_list
    }

    /// Record the items of `list` that fall in this context's submit range,
    /// using each item's position in `list` as its submit index. Returns the
    /// number recorded.
    pub fn submit_draw_list(&mut self, list: &[DrawItemProperties]) -> u32 {
        let end = (self.submit_range.end as usize).min(list.len());
        let start = (self.submit_range.start as usize).min(end);
        let mut recorded = 0;
        for (index, properties) in list[start..end].iter().enumerate() {
            if self
                .command_list
                .submit_draw_item(properties, (start + index) as u32)
            {
                recorded += 1;
            }
        }
        recorded
    }
}
