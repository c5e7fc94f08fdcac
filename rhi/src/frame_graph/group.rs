//! Execute groups: sets of command-recording contexts for one or more scopes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::command_list::CommandList;
use crate::device::Device;
use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::sync::Fence;
use crate::types::{CommandListLevel, HardwareQueueClass, SemaphoreHandle, SwapChainId};

use super::context::FrameGraphExecuteContext;
use super::scope::{FenceWait, Scope, SubmitRange};

/// Whether the contexts of a group may be recorded concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobPolicy {
    /// One context at a time.
    #[default]
    Serial,
    /// Any number of contexts at once, from any threads.
    Parallel,
}

/// Recording state of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Idle,
    Recording,
    Recorded,
}

impl ContextState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Recording,
            _ => Self::Recorded,
        }
    }
}

/// Static description of one context, fixed at group construction.
pub struct ContextInfo {
    /// Scope the context records.
    pub scope: Arc<dyn Scope>,
    /// Command list slot the context records into.
    pub command_list_index: u32,
    /// Number of command lists the scope is split across.
    pub command_list_count: u32,
    /// Submit indices the context records.
    pub submit_range: SubmitRange,
}

impl std::fmt::Debug for ContextInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextInfo")
            .field("scope", &self.scope.descriptor().id)
            .field("command_list_index", &self.command_list_index)
            .field("command_list_count", &self.command_list_count)
            .field("submit_range", &self.submit_range)
            .finish()
    }
}

/// State shared by every execute group implementation.
///
/// Holds the contexts, the command list slots they record into, the
/// active/completed counters guarding the job policy, and the queue
/// dependencies aggregated from the group's scopes.
#[derive(Debug)]
pub struct ExecuteGroupBase {
    device: Arc<Device>,
    job_policy: JobPolicy,
    level: CommandListLevel,
    queue_class: HardwareQueueClass,
    contexts: Vec<ContextInfo>,
    context_states: Vec<AtomicU8>,
    command_lists: Vec<Mutex<Option<CommandList>>>,
    active_count: AtomicU32,
    completed_count: AtomicU32,
    begun: AtomicBool,
    ended: AtomicBool,
    submittable: AtomicBool,
    swapchains_to_present: Vec<SwapChainId>,
    wait_semaphores: Vec<SemaphoreHandle>,
    signal_semaphores: Vec<SemaphoreHandle>,
    wait_fences: Vec<FenceWait>,
    signal_fences: Vec<Arc<Fence>>,
}

impl ExecuteGroupBase {
    /// Build the shared state for `contexts` recording into
    /// `command_list_count` slots.
    pub fn new(
        device: Arc<Device>,
        job_policy: JobPolicy,
        level: CommandListLevel,
        contexts: Vec<ContextInfo>,
        command_list_count: u32,
    ) -> Self {
        let queue_class = contexts
            .first()
            .map_or(HardwareQueueClass::Graphics, |context| {
                context.scope.descriptor().queue_class
            });

        let mut swapchains_to_present = Vec::new();
        let mut wait_semaphores = Vec::new();
        let mut signal_semaphores = Vec::new();
        let mut wait_fences = Vec::new();
        let mut signal_fences = Vec::new();

        // Each scope contributes its dependencies once
        let mut seen: Vec<&Arc<dyn Scope>> = Vec::new();
        for context in &contexts {
            if seen.iter().any(|scope| Arc::ptr_eq(scope, &context.scope)) {
                continue;
            }
            seen.push(&context.scope);

            let descriptor = context.scope.descriptor();
            if descriptor.queue_class != queue_class {
                log::error!(
                    "Scope {} runs on the {} queue but its group submits to {queue_class}",
                    descriptor.id,
                    descriptor.queue_class
                );
            }
            swapchains_to_present.extend_from_slice(&descriptor.swapchains_to_present);
            wait_semaphores.extend_from_slice(&descriptor.wait_semaphores);
            signal_semaphores.extend_from_slice(&descriptor.signal_semaphores);
            wait_fences.extend(descriptor.wait_fences.iter().cloned());
            signal_fences.extend(descriptor.signal_fences.iter().cloned());
        }

        Self {
            device,
            job_policy,
            level,
            queue_class,
            context_states: contexts.iter().map(|_| AtomicU8::new(0)).collect(),
            contexts,
            command_lists: (0..command_list_count).map(|_| Mutex::new(None)).collect(),
            active_count: AtomicU32::new(0),
            completed_count: AtomicU32::new(0),
            begun: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            submittable: AtomicBool::new(false),
            swapchains_to_present,
            wait_semaphores,
            signal_semaphores,
            wait_fences,
            signal_fences,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn job_policy(&self) -> JobPolicy {
        self.job_policy
    }

    /// Level of the command lists the group produces.
    pub fn level(&self) -> CommandListLevel {
        self.level
    }

    /// Queue the group's command lists are submitted to.
    pub fn queue_class(&self) -> HardwareQueueClass {
        self.queue_class
    }

    pub fn context_count(&self) -> u32 {
        self.contexts.len() as u32
    }

    pub fn context(&self, index: u32) -> Option<&ContextInfo> {
        self.contexts.get(index as usize)
    }

    pub fn context_state(&self, index: u32) -> Option<ContextState> {
        self.context_states
            .get(index as usize)
            .map(|state| ContextState::from_u8(state.load(Ordering::Acquire)))
    }

    /// Number of contexts currently recording.
    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::Acquire)
    }

    /// Number of contexts that finished recording.
    pub fn completed_count(&self) -> u32 {
        self.completed_count.load(Ordering::Acquire)
    }

    /// Whether [`ExecuteGroup::end`] has run to completion since the last
    /// begin. Set after the group's final hooks, so a group can be complete
    /// without being ended yet.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Number of command list slots.
    pub fn command_list_count(&self) -> u32 {
        self.command_lists.len() as u32
    }

    /// Command list slot `index`.
    pub fn command_list_slot(&self, index: u32) -> Option<&Mutex<Option<CommandList>>> {
        self.command_lists.get(index as usize)
    }

    pub fn swapchains_to_present(&self) -> &[SwapChainId] {
        &self.swapchains_to_present
    }

    pub fn wait_semaphores(&self) -> &[SemaphoreHandle] {
        &self.wait_semaphores
    }

    pub fn signal_semaphores(&self) -> &[SemaphoreHandle] {
        &self.signal_semaphores
    }

    pub fn wait_fences(&self) -> &[FenceWait] {
        &self.wait_fences
    }

    pub fn signal_fences(&self) -> &[Arc<Fence>] {
        &self.signal_fences
    }

    /// Create a command list for this group's queue and level, named after
    /// the context's scope.
    pub fn create_command_list(&self, context_index: u32) -> Result<CommandList, RhiError> {
        let mut command_list = self
            .device
            .create_command_list(self.queue_class, self.level)?;
        if let Some(context) = self.context(context_index) {
            command_list.set_name(format!(
                "{} [{}/{}]",
                context.scope.descriptor().id,
                context.command_list_index,
                context.command_list_count
            ));
        }
        Ok(command_list)
    }

    fn reset(&self) {
        for state in &self.context_states {
            state.store(ContextState::Idle as u8, Ordering::Release);
        }
        self.active_count.store(0, Ordering::Release);
        self.completed_count.store(0, Ordering::Release);
        self.ended.store(false, Ordering::Release);
        self.submittable.store(false, Ordering::Release);
    }

    fn transition(&self, index: u32, from: ContextState, to: ContextState) -> Result<(), RhiError> {
        let Some(state) = self.context_states.get(index as usize) else {
            log::error!(
                "Execute group: context {index} is out of range ({} contexts)",
                self.contexts.len()
            );
            return Err(RhiError::InvalidParameter(format!(
                "context index {index} is out of range"
            )));
        };
        state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                let actual = ContextState::from_u8(actual);
                log::error!("Execute group: context {index} is {actual:?}, expected {from:?}");
                RhiError::InvalidParameter(format!(
                    "context {index} is {actual:?}, expected {from:?}"
                ))
            })
    }

    fn mark_active(&self, index: u32) -> Result<(), RhiError> {
        if !self.begun.load(Ordering::Acquire) {
            log::error!("Execute group: begin_context({index}) before the group was begun");
            return Err(RhiError::InvalidParameter(
                "execute group has not been begun".to_string(),
            ));
        }
        self.transition(index, ContextState::Idle, ContextState::Recording)?;

        let active = self.active_count.fetch_add(1, Ordering::AcqRel) + 1;
        if self.job_policy == JobPolicy::Serial && active > 1 {
            log::error!(
                "Execute group: {active} contexts recording simultaneously under a serial job policy"
            );
            debug_assert!(
                false,
                "contexts are recording simultaneously under a serial job policy"
            );
        }
        Ok(())
    }

    fn unmark_active(&self, index: u32) {
        if self
            .transition(index, ContextState::Recording, ContextState::Idle)
            .is_ok()
        {
            self.active_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn mark_complete(&self, index: u32) -> Result<bool, RhiError> {
        self.transition(index, ContextState::Recording, ContextState::Recorded)?;
        self.active_count.fetch_sub(1, Ordering::AcqRel);
        let completed = self.completed_count.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(completed == self.context_count())
    }
}

/// A group of contexts recorded by the frame graph.
///
/// Implementations supply [`base`](Self::base) and the per-context hooks;
/// the provided methods drive the lifecycle:
///
/// ```text
/// begin ──► begin_context(i) ──► execute_context(i) ──► end_context(i)
///                 (for every context, in any order the policy allows)
///       ──► last end_context runs end ──► ExecuteGroupBase::is_ended
/// ```
///
/// [`is_complete`](Self::is_complete) turns true as soon as the last
/// context is counted; consumers that hand the command lists to a queue
/// wait for [`ExecuteGroupBase::is_ended`].
pub trait ExecuteGroup: Send + Sync {
    /// Shared state.
    fn base(&self) -> &ExecuteGroupBase;

    /// Called once by [`begin`](Self::begin).
    fn begin_internal(&self) -> Result<(), RhiError> {
        Ok(())
    }

    /// Prepare the command list of context `index` for recording.
    fn begin_context_internal(
        &self,
        index: u32,
        command_list: &mut Option<CommandList>,
    ) -> Result<(), RhiError>;

    /// Finish the command list of context `index`.
    fn end_context_internal(
        &self,
        index: u32,
        command_list: &mut Option<CommandList>,
    ) -> Result<(), RhiError>;

    /// Called once when the last context has ended.
    fn end_internal(&self) -> Result<(), RhiError> {
        Ok(())
    }

    /// Reset the counters and prepare the group for recording.
    fn begin(&self) -> Result<(), RhiError> {
        let base = self.base();
        base.reset();
        base.begun.store(true, Ordering::Release);
        self.begin_internal()?;
        if base.context_count() == 0 {
            self.end()?;
        }
        Ok(())
    }

    /// Start recording context `index`.
    fn begin_context(&self, index: u32) -> Result<(), RhiError> {
        profile_scope!("begin_context");

        let base = self.base();
        base.mark_active(index)?;
        let Some(context) = base.context(index) else {
            return Ok(());
        };
        let Some(slot) = base.command_list_slot(context.command_list_index) else {
            base.unmark_active(index);
            return Err(RhiError::Internal(format!(
                "context {index} has no command list slot"
            )));
        };

        let mut command_list = slot.lock();
        if let Err(e) = self.begin_context_internal(index, &mut command_list) {
            // The context can be begun again
            base.unmark_active(index);
            return Err(e);
        }
        if let Some(command_list) = command_list.as_mut() {
            command_list.set_submit_range(Some(context.submit_range));
            context.scope.begin(command_list, context.submit_range);
        }
        Ok(())
    }

    /// Let the scope of context `index` record its commands.
    fn execute_context(&self, index: u32) -> Result<(), RhiError> {
        let base = self.base();
        if base.context_state(index) != Some(ContextState::Recording) {
            log::error!("Execute group: execute_context({index}) outside begin/end");
            return Err(RhiError::InvalidParameter(format!(
                "context {index} is not recording"
            )));
        }
        let Some(context) = base.context(index) else {
            return Ok(());
        };
        let Some(slot) = base.command_list_slot(context.command_list_index) else {
            return Ok(());
        };

        let mut command_list = slot.lock();
        let Some(command_list) = command_list.as_mut() else {
            return Err(RhiError::Internal(format!(
                "context {index} has no command list"
            )));
        };
        let descriptor = context.scope.descriptor();
        let mut execute_context = FrameGraphExecuteContext::new(
            &descriptor.id,
            context.command_list_index,
            context.command_list_count,
            context.submit_range,
            command_list,
        );
        context.scope.execute(&mut execute_context);
        Ok(())
    }

    /// Finish recording context `index`. Ending the last context ends the
    /// group.
    fn end_context(&self, index: u32) -> Result<(), RhiError> {
        profile_scope!("end_context");

        let base = self.base();
        if let Some(context) = base.context(index)
            && base.context_state(index) == Some(ContextState::Recording)
            && let Some(slot) = base.command_list_slot(context.command_list_index)
        {
            let mut command_list = slot.lock();
            if let Some(list) = command_list.as_mut() {
                context.scope.end(list);
                list.set_submit_range(None);
            }
            self.end_context_internal(index, &mut command_list)?;
        }

        if base.mark_complete(index)? {
            self.end()?;
        }
        Ok(())
    }

    /// Finish the group. Called by the last [`end_context`](Self::end_context).
    fn end(&self) -> Result<(), RhiError> {
        let base = self.base();
        if !self.is_complete() {
            log::error!(
                "Execute group ended with {} of {} contexts complete",
                base.completed_count(),
                base.context_count()
            );
            return Err(RhiError::InvalidParameter(
                "execute group ended before every context completed".to_string(),
            ));
        }
        self.end_internal()?;
        base.begun.store(false, Ordering::Release);
        base.submittable
            .store(base.level == CommandListLevel::Primary, Ordering::Release);
        base.ended.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether every context has ended.
    fn is_complete(&self) -> bool {
        let base = self.base();
        base.completed_count() == base.context_count()
    }

    /// Whether the group's command lists may be handed to a queue.
    fn is_submittable(&self) -> bool {
        self.is_complete() && self.base().submittable.load(Ordering::Acquire)
    }

    /// Take the recorded command lists in slot order.
    fn take_command_lists(&self) -> Vec<CommandList> {
        let base = self.base();
        if !self.is_complete() {
            log::error!("Execute group: command lists taken before the group completed");
            return Vec::new();
        }
        base.submittable.store(false, Ordering::Release);
        base.command_lists
            .iter()
            .filter_map(|slot| slot.lock().take())
            .collect()
    }
}

/// Execute group recording primary command lists.
///
/// Built either from several scopes sharing one command list
/// ([`merged`](Self::merged)) or from one scope split across several
/// ([`standard`](Self::standard)).
#[derive(Debug)]
pub struct FrameGraphExecuteGroup {
    base: ExecuteGroupBase,
    merged: bool,
}

impl FrameGraphExecuteGroup {
    /// One command list shared by `scopes`, recorded in order. Each context
    /// covers its scope's items from zero. The policy is always serial.
    pub fn merged(device: Arc<Device>, scopes: Vec<Arc<dyn Scope>>) -> Self {
        if scopes.is_empty() {
            log::error!("FrameGraphExecuteGroup::merged called without scopes");
            debug_assert!(false, "merged execute group requires at least one scope");
        }

        let contexts = scopes
            .into_iter()
            .map(|scope| {
                let item_count = scope.descriptor().estimated_item_count;
                ContextInfo {
                    scope,
                    command_list_index: 0,
                    command_list_count: 1,
                    submit_range: SubmitRange::new(0, item_count),
                }
            })
            .collect();

        Self {
            base: ExecuteGroupBase::new(
                device,
                JobPolicy::Serial,
                CommandListLevel::Primary,
                contexts,
                1,
            ),
            merged: true,
        }
    }

    /// `scope` split over `command_list_count` command lists. Context `i`
    /// covers `[i * total / n, (i + 1) * total / n)` of the scope's items.
    pub fn standard(
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
                CommandListLevel::Primary,
                contexts,
                count,
            ),
            merged: false,
        }
    }

    /// Whether the group shares one command list between several scopes.
    pub fn is_merged(&self) -> bool {
        self.merged
    }
}

/// Contexts for `scope` split evenly over `command_list_count` lists.
pub(crate) fn split_scope(scope: Arc<dyn Scope>, command_list_count: u32) -> Vec<ContextInfo> {
    if command_list_count == 0 {
        log::error!(
            "Execute group for scope {} requested zero command lists",
            scope.descriptor().id
        );
        debug_assert!(false, "execute group requires at least one command list");
    }
    let count = command_list_count.max(1);
    let total = u64::from(scope.descriptor().estimated_item_count);
    let boundary = |i: u32| ((u64::from(i) * total) / u64::from(count)) as u32;

    (0..count)
        .map(|i| ContextInfo {
            scope: Arc::clone(&scope),
            command_list_index: i,
            command_list_count: count,
            submit_range: SubmitRange::new(boundary(i), boundary(i + 1)),
        })
        .collect()
}

impl ExecuteGroup for FrameGraphExecuteGroup {
    fn base(&self) -> &ExecuteGroupBase {
        &self.base
    }

    fn begin_internal(&self) -> Result<(), RhiError> {
        if !self.merged {
            return Ok(());
        }
        let Some(slot) = self.base.command_list_slot(0) else {
            return Ok(());
        };
        let mut command_list = self.base.create_command_list(0)?;
        if let Some(context) = self.base.context(0) {
            command_list.set_name(format!("{} [merged]", context.scope.descriptor().id));
        }
        command_list.begin(None)?;
        *slot.lock() = Some(command_list);
        Ok(())
    }

    fn begin_context_internal(
        &self,
        index: u32,
        command_list: &mut Option<CommandList>,
    ) -> Result<(), RhiError> {
        if self.merged {
            if command_list.is_none() {
                return Err(RhiError::Internal(
                    "merged execute group was not begun".to_string(),
                ));
            }
            return Ok(());
        }
        let mut list = self.base.create_command_list(index)?;
        list.begin(None)?;
        *command_list = Some(list);
        Ok(())
    }

    fn end_context_internal(
        &self,
        _index: u32,
        command_list: &mut Option<CommandList>,
    ) -> Result<(), RhiError> {
        if self.merged {
            return Ok(());
        }
        match command_list.as_mut() {
            Some(list) => list.end(),
            None => Ok(()),
        }
    }

    fn end_internal(&self) -> Result<(), RhiError> {
        if !self.merged {
            return Ok(());
        }
        match self.base.command_list_slot(0) {
            Some(slot) => match slot.lock().as_mut() {
                Some(list) if list.is_recording() => list.end(),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}
