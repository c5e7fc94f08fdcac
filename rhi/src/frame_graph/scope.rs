//! Scopes: units of GPU work recorded by execute groups.

use std::fmt;
use std::sync::Arc;

use crate::command_list::CommandList;
use crate::sync::Fence;
use crate::types::{HardwareQueueClass, ScopeId, SemaphoreHandle, SwapChainId};

use super::context::FrameGraphExecuteContext;

/// Half-open range `[start, end)` of submit indices recorded into one
/// command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubmitRange {
    pub start: u32,
    pub end: u32,
}

impl SubmitRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "submit range start {start} is after end {end}");
        Self { start, end }
    }

    /// Whether `index` lies inside the range.
    pub fn contains(&self, index: u32) -> bool {
        (self.start..self.end).contains(&index)
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Iterate the indices of the range.
    pub fn indices(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }
}

impl fmt::Display for SubmitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A fence value a scope waits for before executing.
#[derive(Debug, Clone)]
pub struct FenceWait {
    pub fence: Arc<Fence>,
    pub value: u64,
}

/// What the frame graph knows about a scope.
#[derive(Debug, Clone)]
pub struct ScopeDescriptor {
    /// Scope identifier, used for command list names.
    pub id: ScopeId,
    /// Queue the scope executes on.
    pub queue_class: HardwareQueueClass,
    /// Number of submit indices the scope records.
    pub estimated_item_count: u32,
    /// Swapchains presented after the scope.
    pub swapchains_to_present: Vec<SwapChainId>,
    /// Binary semaphores waited for before execution.
    pub wait_semaphores: Vec<SemaphoreHandle>,
    /// Binary semaphores signaled after execution.
    pub signal_semaphores: Vec<SemaphoreHandle>,
    /// Fence values waited for before execution.
    pub wait_fences: Vec<FenceWait>,
    /// Fences signaled at their pending value after execution.
    pub signal_fences: Vec<Arc<Fence>>,
}

impl ScopeDescriptor {
    pub fn new(id: impl Into<ScopeId>, queue_class: HardwareQueueClass) -> Self {
        Self {
            id: id.into(),
            queue_class,
            estimated_item_count: 0,
            swapchains_to_present: Vec::new(),
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
            wait_fences: Vec::new(),
            signal_fences: Vec::new(),
        }
    }

    pub fn with_estimated_item_count(mut self, count: u32) -> Self {
        self.estimated_item_count = count;
        self
    }

    pub fn with_present(mut self, swapchain: SwapChainId) -> Self {
        self.swapchains_to_present.push(swapchain);
        self
    }

    pub fn with_wait_semaphore(mut self, semaphore: SemaphoreHandle) -> Self {
        self.wait_semaphores.push(semaphore);
        self
    }

    pub fn with_signal_semaphore(mut self, semaphore: SemaphoreHandle) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }

    pub fn with_wait_fence(mut self, fence: Arc<Fence>, value: u64) -> Self {
        self.wait_fences.push(FenceWait { fence, value });
        self
    }

    pub fn with_signal_fence(mut self, fence: Arc<Fence>) -> Self {
        self.signal_fences.push(fence);
        self
    }
}

/// A unit of GPU work the frame graph records.
///
/// `execute` may run on several threads at once when the scope is split
/// across command lists of a [`Parallel`](super::JobPolicy::Parallel) group;
/// each call receives its own command list and submit range.
pub trait Scope: Send + Sync {
    /// The scope's descriptor.
    fn descriptor(&self) -> &ScopeDescriptor;

    /// Called once per context before `execute`. Opens a debug label named
    /// after the scope.
    fn begin(&self, command_list: &mut CommandList, _range: SubmitRange) {
        command_list.begin_debug_label(self.descriptor().id.as_str(), [0.2, 0.6, 1.0, 1.0]);
    }

    /// Record the scope's commands for the context's submit range.
    fn execute(&self, context: &mut FrameGraphExecuteContext<'_>);

    /// Called once per context after `execute`. Closes the label opened by
    /// `begin`.
    fn end(&self, command_list: &mut CommandList) {
        command_list.end_debug_label();
    }
}
