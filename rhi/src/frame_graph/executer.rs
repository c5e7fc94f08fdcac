//! Ordered recording and submission of execute groups.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::backend::{QueueSubmission, TimelinePoint};
use crate::device::Device;
use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::types::CommandListLevel;

use super::group::{ExecuteGroup, JobPolicy};

/// Records a frame's execute groups and submits them in frame order.
///
/// Groups may complete in any order; a completed group is submitted only
/// once every group added before it has been submitted. Fence waits and
/// signals aggregated from the group's scopes become timeline points of the
/// submission; semaphores are forwarded unchanged.
///
/// # Example
///
/// ```ignore
/// let mut executer = FrameGraphExecuter::new(device.clone());
/// executer.add_group(Box::new(FrameGraphExecuteGroup::standard(
///     device.clone(), forward_scope, 4, JobPolicy::Parallel,
/// )))?;
/// executer.execute_all(4)?;
/// ```
pub struct FrameGraphExecuter {
    device: Arc<Device>,
    groups: Vec<Box<dyn ExecuteGroup>>,
    next_submit: Mutex<usize>,
}

impl FrameGraphExecuter {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            groups: Vec::new(),
            next_submit: Mutex::new(0),
        }
    }

    /// Append a group in frame order and return its index.
    ///
    /// Secondary groups are recorded inside a primary list by the renderer
    /// and cannot be added.
    pub fn add_group(&mut self, group: Box<dyn ExecuteGroup>) -> Result<usize, RhiError> {
        if group.base().level() == CommandListLevel::Secondary {
            log::error!("FrameGraphExecuter: secondary execute groups cannot be submitted");
            return Err(RhiError::InvalidParameter(
                "secondary execute groups cannot be added to the executer".to_string(),
            ));
        }
        self.groups.push(group);
        Ok(self.groups.len() - 1)
    }

    pub fn group(&self, index: usize) -> Option<&dyn ExecuteGroup> {
        self.groups.get(index).map(|group| group.as_ref())
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of groups already handed to their queues.
    pub fn submitted_group_count(&self) -> usize {
        *self.next_submit.lock()
    }

    /// Whether every group has been submitted.
    pub fn is_finished(&self) -> bool {
        self.submitted_group_count() == self.groups.len()
    }

    /// Begin every group.
    pub fn begin(&self) -> Result<(), RhiError> {
        *self.next_submit.lock() = 0;
        for group in &self.groups {
            group.begin()?;
        }
        Ok(())
    }

    fn group_ref(&self, index: usize) -> Result<&dyn ExecuteGroup, RhiError> {
        self.group(index).ok_or_else(|| {
            RhiError::InvalidParameter(format!("execute group {index} does not exist"))
        })
    }

    /// Begin context `context` of group `group`.
    pub fn begin_context(&self, group: usize, context: u32) -> Result<(), RhiError> {
        self.group_ref(group)?.begin_context(context)
    }

    /// Let the scope of context `context` of group `group` record.
    pub fn execute_context(&self, group: usize, context: u32) -> Result<(), RhiError> {
        self.group_ref(group)?.execute_context(context)
    }

    /// End context `context` of group `group`, submitting every group that
    /// is ready.
    pub fn end_context(&self, group: usize, context: u32) -> Result<(), RhiError> {
        let execute_group = self.group_ref(group)?;
        execute_group.end_context(context)?;
        if execute_group.base().is_ended() {
            self.submit_ready_groups()?;
        }
        Ok(())
    }

    fn submit_ready_groups(&self) -> Result<(), RhiError> {
        let mut next = self.next_submit.lock();
        while let Some(group) = self.groups.get(*next) {
            // A complete group may still be inside end(); its owner submits
            // once end() returns
            if !group.base().is_ended() {
                break;
            }
            if group.is_submittable() {
                self.submit_group(group.as_ref())?;
            }
            *next += 1;
        }
        Ok(())
    }

    fn submit_group(&self, group: &dyn ExecuteGroup) -> Result<(), RhiError> {
        profile_scope!("submit_execute_group");

        let base = group.base();
        let mut submission = QueueSubmission::new();
        submission.command_lists = group.take_command_lists();
        submission.wait_points = base
            .wait_fences()
            .iter()
            .map(|wait| TimelinePoint::new(wait.fence.timeline().clone(), wait.value))
            .collect();
        for fence in base.signal_fences() {
            fence.signal_from_gpu(&mut submission);
        }
        submission.wait_semaphores = base.wait_semaphores().to_vec();
        submission.signal_semaphores = base.signal_semaphores().to_vec();

        if !base.swapchains_to_present().is_empty() {
            log::trace!(
                "FrameGraphExecuter: {} swapchains to present after submission",
                base.swapchains_to_present().len()
            );
        }
        log::debug!(
            "FrameGraphExecuter: submitting {} command lists to the {} queue",
            submission.command_lists.len(),
            base.queue_class()
        );
        self.device.submit(base.queue_class(), submission)
    }

    /// Record every context of every group and submit them.
    ///
    /// Contexts of parallel groups are spread over up to `thread_count`
    /// scoped threads; serial groups record on the calling thread.
    pub fn execute_all(&self, thread_count: usize) -> Result<(), RhiError> {
        profile_scope!("execute_all");

        self.begin()?;
        for (index, group) in self.groups.iter().enumerate() {
            let context_count = group.base().context_count();
            let workers = thread_count.min(context_count as usize);

            if group.base().job_policy() == JobPolicy::Parallel && workers > 1 {
                self.record_parallel(index, context_count, workers)?;
            } else {
                for context in 0..context_count {
                    self.record_context(index, context)?;
                }
            }
        }
        // Groups without contexts end inside begin()
        self.submit_ready_groups()
    }

    fn record_context(&self, group: usize, context: u32) -> Result<(), RhiError> {
        self.begin_context(group, context)?;
        self.execute_context(group, context)?;
        self.end_context(group, context)
    }

    fn record_parallel(
        &self,
        group: usize,
        context_count: u32,
        workers: usize,
    ) -> Result<(), RhiError> {
        let next_context = AtomicU32::new(0);
        let first_error: Mutex<Option<RhiError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let context = next_context.fetch_add(1, Ordering::AcqRel);
                        if context >= context_count {
                            break;
                        }
                        if let Err(e) = self.record_context(group, context) {
                            log::error!(
                                "FrameGraphExecuter: context {context} of group {group} failed: {e}"
                            );
                            first_error.lock().get_or_insert(e);
                            break;
                        }
                    }
                });
            }
        });

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop every group, ready for the next frame.
    pub fn clear(&mut self) {
        self.groups.clear();
        *self.next_submit.get_mut() = 0;
    }
}

impl std::fmt::Debug for FrameGraphExecuter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraphExecuter")
            .field("group_count", &self.groups.len())
            .field("submitted", &self.submitted_group_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use super::*;
    use crate::command_list::{CommandList, InheritanceInfo};
    use crate::frame_graph::ExecuteGroupBase;
    use crate::frame_graph::{
        FrameGraphExecuteContext, FrameGraphExecuteGroup, FrameGraphExecuteGroupSecondary, Scope,
        ScopeDescriptor,
    };
    use crate::parameters::{BackendType, DeviceParameters};
    use crate::sync::Fence;
    use crate::types::HardwareQueueClass;

    struct EmptyScope {
        descriptor: ScopeDescriptor,
    }

    impl Scope for EmptyScope {
        fn descriptor(&self) -> &ScopeDescriptor {
            &self.descriptor
        }

        fn execute(&self, _context: &mut FrameGraphExecuteContext<'_>) {}
    }

    fn device() -> Arc<Device> {
        Device::new(DeviceParameters::new().with_backend(BackendType::Dummy)).unwrap()
    }

    fn scope(descriptor: ScopeDescriptor) -> Arc<dyn Scope> {
        Arc::new(EmptyScope { descriptor })
    }

    #[test]
    fn test_groups_submit_in_order() {
        let device = device();
        let mut executer = FrameGraphExecuter::new(Arc::clone(&device));
        for name in ["first", "second"] {
            executer
                .add_group(Box::new(FrameGraphExecuteGroup::standard(
                    Arc::clone(&device),
                    scope(
                        ScopeDescriptor::new(name, HardwareQueueClass::Graphics)
                            .with_estimated_item_count(2),
                    ),
                    1,
                    JobPolicy::Serial,
                )))
                .unwrap();
        }

        executer.begin().unwrap();
        executer.begin_context(1, 0).unwrap();
        executer.end_context(1, 0).unwrap();
        assert_eq!(executer.submitted_group_count(), 0);

        executer.begin_context(0, 0).unwrap();
        executer.end_context(0, 0).unwrap();
        assert_eq!(executer.submitted_group_count(), 2);
        assert!(executer.is_finished());
    }

    #[test]
    fn test_signal_fence_reached_after_execute_all() {
        let device = device();
        let fence = Arc::new(Fence::new(&device).unwrap());
        let value = fence.increment();

        let mut executer = FrameGraphExecuter::new(Arc::clone(&device));
        executer
            .add_group(Box::new(FrameGraphExecuteGroup::standard(
                Arc::clone(&device),
                scope(
                    ScopeDescriptor::new("forward", HardwareQueueClass::Graphics)
                        .with_estimated_item_count(64)
                        .with_signal_fence(Arc::clone(&fence)),
                ),
                8,
                JobPolicy::Parallel,
            )))
            .unwrap();

        executer.execute_all(4).unwrap();
        assert!(executer.is_finished());
        fence.wait_on_cpu_value(value).unwrap();
    }

    /// Group whose final hook takes a while, leaving a window where it is
    /// complete but not yet ended.
    struct SlowEndGroup {
        inner: FrameGraphExecuteGroup,
        ending: Arc<AtomicBool>,
    }

    impl ExecuteGroup for SlowEndGroup {
        fn base(&self) -> &ExecuteGroupBase {
            self.inner.base()
        }

        fn begin_context_internal(
            &self,
            index: u32,
            command_list: &mut Option<CommandList>,
        ) -> Result<(), RhiError> {
            self.inner.begin_context_internal(index, command_list)
        }

        fn end_context_internal(
            &self,
            index: u32,
            command_list: &mut Option<CommandList>,
        ) -> Result<(), RhiError> {
            self.inner.end_context_internal(index, command_list)
        }

        fn end_internal(&self) -> Result<(), RhiError> {
            self.ending.store(true, Ordering::Release);
            std::thread::sleep(Duration::from_millis(50));
            self.inner.end_internal()
        }
    }

    #[test]
    fn test_group_ending_late_is_still_submitted() {
        let device = device();
        let first_fence = Arc::new(Fence::new(&device).unwrap());
        let second_fence = Arc::new(Fence::new(&device).unwrap());
        let first_value = first_fence.increment();
        let second_value = second_fence.increment();

        let group = |name: &str, fence: &Arc<Fence>| {
            FrameGraphExecuteGroup::standard(
                Arc::clone(&device),
                scope(
                    ScopeDescriptor::new(name, HardwareQueueClass::Graphics)
                        .with_estimated_item_count(1)
                        .with_signal_fence(Arc::clone(fence)),
                ),
                1,
                JobPolicy::Serial,
            )
        };
        let ending = Arc::new(AtomicBool::new(false));
        let mut executer = FrameGraphExecuter::new(Arc::clone(&device));
        executer
            .add_group(Box::new(SlowEndGroup {
                inner: group("first", &first_fence),
                ending: Arc::clone(&ending),
            }))
            .unwrap();
        executer
            .add_group(Box::new(group("second", &second_fence)))
            .unwrap();

        executer.begin().unwrap();
        executer.begin_context(0, 0).unwrap();
        executer.begin_context(1, 0).unwrap();

        std::thread::scope(|threads| {
            threads.spawn(|| executer.end_context(0, 0).unwrap());
            threads.spawn(|| {
                // End the second group while the first is inside end()
                while !ending.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                executer.end_context(1, 0).unwrap();
            });
        });

        assert!(executer.is_finished());
        assert!(!executer.group(0).unwrap().is_submittable());
        assert!(!executer.group(1).unwrap().is_submittable());
        first_fence.wait_on_cpu_value(first_value).unwrap();
        second_fence.wait_on_cpu_value(second_value).unwrap();
    }

    #[test]
    fn test_secondary_group_rejected() {
        let device = device();
        let mut executer = FrameGraphExecuter::new(Arc::clone(&device));
        let mut group = FrameGraphExecuteGroupSecondary::new(
            Arc::clone(&device),
            scope(ScopeDescriptor::new("ui", HardwareQueueClass::Graphics)),
            1,
            JobPolicy::Serial,
        );
        group.set_render_context(InheritanceInfo {
            render_pass: 1,
            subpass: 0,
            framebuffer: 1,
        });
        assert!(executer.add_group(Box::new(group)).is_err());
        assert_eq!(executer.group_count(), 0);
    }
}
