//! Dummy GPU backend for testing and development.
//!
//! This backend stores every resource in a [`HostHeap`] and runs one worker
//! thread per hardware queue class. Each worker executes submissions in queue
//! order: it waits for the wait points, replays recorded copy commands into
//! host memory and then signals the signal points. Synchronization therefore
//! behaves like a real device without requiring GPU hardware.

use std::ops::Range;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::command_list::{BufferImageCopyRegion, CommandList, NativeCommandList, UploadBarrier};
use crate::draw::DrawItem;
use crate::error::RhiError;
use crate::memory::{DEFAULT_HOST_BLOCK_SIZE, HostHeap, MemoryAllocation};
use crate::profiling::{profile_scope, set_thread_name};
use crate::resources::{Buffer, Image, TileMappingRequest};
use crate::types::{
    BufferDescriptor, CommandListLevel, HardwareQueueClass, ImageDescriptor,
};

use super::{
    GpuBackend, GpuBuffer, GpuImage, GpuTileHeap, GpuTimeline, QueueSubmission, TimelinePoint,
};

/// Host-side timeline: a counter guarded by a mutex with a condvar for waiters.
#[derive(Debug)]
pub struct DummyTimeline {
    value: Mutex<u64>,
    reached: Condvar,
}

impl DummyTimeline {
    /// Create a timeline starting at `initial_value`.
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            reached: Condvar::new(),
        }
    }

    /// Current value.
    pub fn completed_value(&self) -> u64 {
        *self.value.lock()
    }

    /// Advance the timeline to `value`. Lower values are ignored.
    pub fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        if value > *current {
            *current = value;
            self.reached.notify_all();
        }
    }

    /// Block until the timeline reaches `value`.
    pub fn wait(&self, value: u64) {
        let mut current = self.value.lock();
        while *current < value {
            self.reached.wait(&mut current);
        }
    }
}

/// A command recorded into a dummy command list.
#[derive(Debug)]
pub(crate) enum DummyCommand {
    BeginLabel(String),
    EndLabel,
    Draw {
        item: Arc<DrawItem>,
        submit_index: u32,
    },
    CopyBuffer {
        src: Arc<Buffer>,
        src_offset: u64,
        dst: Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: Arc<Buffer>,
        dst: Arc<Image>,
        region: BufferImageCopyRegion,
    },
    ImageBarrier {
        image: Arc<Image>,
        mips: Range<u32>,
        barrier: UploadBarrier,
    },
    ExecuteSecondary(Vec<CommandList>),
}

/// Dummy command list: a list of commands replayed by the queue worker.
#[derive(Debug, Default)]
pub struct DummyCommandList {
    pub(crate) commands: Vec<DummyCommand>,
}

impl DummyCommandList {
    pub(crate) fn record(&mut self, command: DummyCommand) {
        self.commands.push(command);
    }

    pub(crate) fn reset(&mut self) {
        self.commands.clear();
    }

    /// Number of recorded commands.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

enum DummyWork {
    Submit(QueueSubmission),
    TileMapping {
        request: TileMappingRequest,
        wait_points: Vec<TimelinePoint>,
        signal_points: Vec<TimelinePoint>,
    },
    Flush(mpsc::Sender<()>),
}

struct DummyQueue {
    class: HardwareQueueClass,
    sender: Mutex<Option<mpsc::Sender<DummyWork>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DummyQueue {
    fn spawn(class: HardwareQueueClass) -> Result<Self, RhiError> {
        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(format!("rhi-dummy-{class}"))
            .spawn(move || run_queue(class, receiver))
            .map_err(|e| {
                RhiError::InitializationFailed(format!(
                    "Failed to spawn dummy {class} queue thread: {e}"
                ))
            })?;

        Ok(Self {
            class,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, work: DummyWork) -> Result<(), RhiError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(RhiError::QueueShutDown);
        };
        sender.send(work).map_err(|_| RhiError::QueueShutDown)
    }

    fn flush(&self) -> Result<(), RhiError> {
        let (done, wait) = mpsc::channel();
        self.send(DummyWork::Flush(done))?;
        wait.recv().map_err(|_| RhiError::QueueShutDown)
    }

    fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            log::error!("Dummy {} queue thread panicked", self.class);
        }
    }
}

fn run_queue(class: HardwareQueueClass, receiver: mpsc::Receiver<DummyWork>) {
    set_thread_name!("rhi dummy queue");
    log::debug!("Dummy {class} queue started");

    while let Ok(work) = receiver.recv() {
        match work {
            DummyWork::Submit(submission) => execute_submission(class, submission),
            DummyWork::TileMapping {
                request,
                wait_points,
                signal_points,
            } => {
                wait_for_points(&wait_points);
                log::trace!(
                    "Dummy {class} queue: applied {} tile mappings",
                    request.mappings.len()
                );
                signal_points_now(&signal_points);
            }
            DummyWork::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    log::debug!("Dummy {class} queue stopped");
}

fn wait_for_points(points: &[TimelinePoint]) {
    for point in points {
        if let Err(e) = point.timeline.wait(point.value) {
            log::error!("Dummy queue: wait for timeline value {} failed: {e}", point.value);
        }
    }
}

fn signal_points_now(points: &[TimelinePoint]) {
    for point in points {
        if let Err(e) = point.timeline.signal(point.value) {
            log::error!("Dummy queue: signal of timeline value {} failed: {e}", point.value);
        }
    }
}

fn execute_submission(class: HardwareQueueClass, submission: QueueSubmission) {
    profile_scope!("dummy_execute_submission");

    wait_for_points(&submission.wait_points);
    if !submission.wait_semaphores.is_empty() || !submission.signal_semaphores.is_empty() {
        log::trace!(
            "Dummy {class} queue: ignoring {} wait and {} signal semaphores",
            submission.wait_semaphores.len(),
            submission.signal_semaphores.len()
        );
    }

    for command_list in &submission.command_lists {
        replay(class, command_list);
    }

    signal_points_now(&submission.signal_points);
}

fn replay(class: HardwareQueueClass, command_list: &CommandList) {
    let NativeCommandList::Dummy(native) = command_list.native() else {
        log::error!("Dummy {class} queue: received a non-dummy command list");
        return;
    };

    for command in &native.commands {
        match command {
            DummyCommand::BeginLabel(label) => log::trace!("[{class}] begin label {label}"),
            DummyCommand::EndLabel => log::trace!("[{class}] end label"),
            DummyCommand::Draw { item, submit_index } => log::trace!(
                "[{class}] draw #{submit_index} with pipeline {:?}",
                item.pipeline_state
            ),
            DummyCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let Some(data) = src.memory().read_bytes(*src_offset, *size as usize) else {
                    log::error!("[{class}] copy source is not readable");
                    continue;
                };
                if !dst.memory().write_bytes(*dst_offset, &data) {
                    log::error!("[{class}] copy destination is not writable");
                }
            }
            DummyCommand::CopyBufferToImage { src, dst, region } => {
                copy_buffer_to_image(class, src, dst, region);
            }
            DummyCommand::ImageBarrier {
                image,
                mips,
                barrier,
            } => log::trace!(
                "[{class}] {barrier:?} barrier on {:?} mips {mips:?}",
                image.label()
            ),
            DummyCommand::ExecuteSecondary(lists) => {
                for list in lists {
                    replay(class, list);
                }
            }
        }
    }
}

fn copy_buffer_to_image(
    class: HardwareQueueClass,
    src: &Buffer,
    dst: &Image,
    region: &BufferImageCopyRegion,
) {
    let descriptor = dst.descriptor();
    let row_pitch = descriptor.mip_row_pitch(region.mip);
    let size = row_pitch * u64::from(region.row_count);
    let dst_offset = descriptor.subresource_offset(region.mip, region.array_layer)
        + row_pitch * u64::from(region.first_row);

    let Some(memory) = dst.memory() else {
        log::error!("[{class}] image {:?} has no memory", dst.label());
        return;
    };
    let Some(data) = src.memory().read_bytes(region.buffer_offset, size as usize) else {
        log::error!("[{class}] copy source is not readable");
        return;
    };
    if !memory.write_bytes(dst_offset, &data) {
        log::error!("[{class}] image {:?} is not writable", dst.label());
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    heap: Arc<HostHeap>,
    queues: Vec<DummyQueue>,
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("heap", &self.heap)
            .finish_non_exhaustive()
    }
}

impl DummyBackend {
    /// Create a new dummy backend and start its queue threads.
    pub fn new() -> Result<Self, RhiError> {
        let queues = HardwareQueueClass::ALL
            .iter()
            .map(|&class| DummyQueue::spawn(class))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            heap: HostHeap::new(DEFAULT_HOST_BLOCK_SIZE),
            queues,
        })
    }

    /// The heap every dummy resource lives in.
    pub fn heap(&self) -> &Arc<HostHeap> {
        &self.heap
    }

    fn queue(&self, class: HardwareQueueClass) -> &DummyQueue {
        &self.queues[class.index()]
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, RhiError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Dummy {
            memory: MemoryAllocation::Host(self.heap.allocate(descriptor.size)),
        })
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, RhiError> {
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}, {} mips, {} layers)",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.mip_levels,
            descriptor.array_layers
        );
        Ok(GpuImage::Dummy {
            memory: MemoryAllocation::Host(self.heap.allocate(descriptor.total_size())),
        })
    }

    fn allocate_tile_memory(&self, tile_count: u32) -> Result<GpuTileHeap, RhiError> {
        log::trace!("DummyBackend: allocating {tile_count} tiles");
        Ok(GpuTileHeap::Dummy)
    }

    fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, RhiError> {
        Ok(GpuTimeline::Dummy(Arc::new(DummyTimeline::new(
            initial_value,
        ))))
    }

    fn create_command_list(
        &self,
        _queue: HardwareQueueClass,
        _level: CommandListLevel,
    ) -> Result<NativeCommandList, RhiError> {
        Ok(NativeCommandList::Dummy(DummyCommandList::default()))
    }

    fn submit(
        &self,
        queue: HardwareQueueClass,
        submission: QueueSubmission,
    ) -> Result<(), RhiError> {
        if let Some(list) = submission
            .command_lists
            .iter()
            .find(|list| !matches!(list.native(), NativeCommandList::Dummy(_)))
        {
            return Err(RhiError::InvalidParameter(format!(
                "command list {:?} was not created by the dummy backend",
                list.name()
            )));
        }
        self.queue(queue).send(DummyWork::Submit(submission))
    }

    fn update_tile_mappings(
        &self,
        queue: HardwareQueueClass,
        request: TileMappingRequest,
        wait_points: Vec<TimelinePoint>,
        signal_points: Vec<TimelinePoint>,
    ) -> Result<(), RhiError> {
        self.queue(queue).send(DummyWork::TileMapping {
            request,
            wait_points,
            signal_points,
        })
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        for queue in &self.queues {
            queue.flush()?;
        }
        Ok(())
    }
}

impl Drop for DummyBackend {
    fn drop(&mut self) {
        for queue in &self.queues {
            queue.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    #[test]
    fn test_timeline_is_monotonic() {
        let timeline = DummyTimeline::new(5);
        timeline.signal(3);
        assert_eq!(timeline.completed_value(), 5);
        timeline.signal(9);
        assert_eq!(timeline.completed_value(), 9);
        timeline.wait(9);
    }

    #[test]
    fn test_timeline_wakes_waiter() {
        let timeline = Arc::new(DummyTimeline::new(0));
        let waiter = {
            let timeline = Arc::clone(&timeline);
            std::thread::spawn(move || timeline.wait(2))
        };
        timeline.signal(1);
        timeline.signal(2);
        waiter.join().unwrap();
    }

    #[test]
    fn test_submission_waits_then_signals() {
        let backend = DummyBackend::new().unwrap();
        let gate = backend.create_timeline(0).unwrap();
        let done = backend.create_timeline(0).unwrap();

        let submission = QueueSubmission {
            wait_points: vec![TimelinePoint::new(gate.clone(), 1)],
            signal_points: vec![TimelinePoint::new(done.clone(), 1)],
            ..QueueSubmission::default()
        };
        backend
            .submit(HardwareQueueClass::Copy, submission)
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(done.completed_value(), 0);

        gate.signal(1).unwrap();
        done.wait(1).unwrap();
        backend.wait_idle().unwrap();
        assert_eq!(done.completed_value(), 1);
    }

    #[test]
    fn test_buffers_live_in_host_heap() {
        let backend = DummyBackend::new().unwrap();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::COPY_DST))
            .unwrap();
        assert_eq!(buffer.memory().size(), 256);
        assert_eq!(backend.heap().stats().allocation_count, 1);
        drop(buffer);
        assert_eq!(backend.heap().stats().allocation_count, 0);
    }
}
