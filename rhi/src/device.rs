//! Render device.
//!
//! The [`Device`] is the handle every RHI component is constructed from. It
//! owns the backend, the creation parameters, and the draw list tag registry.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::backend::{self, GpuBackend, GpuTimeline, QueueSubmission, TimelinePoint};
use crate::command_list::{CommandList, CommandListState};
use crate::draw::DrawListTagRegistry;
use crate::error::RhiError;
use crate::parameters::DeviceParameters;
use crate::profiling::{profile_function, profile_scope};
use crate::resources::{Buffer, Image, TileHeap, TileMappingRequest};
use crate::types::{BufferDescriptor, CommandListLevel, HardwareQueueClass, ImageDescriptor};
use crate::validation::ValidationMode;

/// A render device.
///
/// # Thread Safety
///
/// `Device` is `Send + Sync`. Resource creation and submission may be called
/// from any thread.
///
/// # Example
///
/// ```ignore
/// let device = Device::new(DeviceParameters::new().with_backend(BackendType::Dummy))?;
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::COPY_DST))?;
/// ```
pub struct Device {
    self_ref: Weak<Device>,
    backend: Arc<dyn GpuBackend>,
    parameters: DeviceParameters,
    draw_list_tags: DrawListTagRegistry,
    // Weak references for resource statistics
    buffers: RwLock<Vec<Weak<Buffer>>>,
    images: RwLock<Vec<Weak<Image>>>,
    /// Per queue class: timeline signaled as tile mapping updates complete,
    /// plus its last handed-out value.
    tile_timelines: [Mutex<(GpuTimeline, u64)>; HardwareQueueClass::COUNT],
}

impl Device {
    /// Create a device on the backend selected by `parameters`.
    pub fn new(parameters: DeviceParameters) -> Result<Arc<Self>, RhiError> {
        let backend = backend::create_backend(&parameters)?;
        log::info!(
            "Created device on {} (validation: {:?})",
            backend.name(),
            parameters.validation
        );
        let tile_timelines = [
            Mutex::new((backend.create_timeline(0)?, 0)),
            Mutex::new((backend.create_timeline(0)?, 0)),
            Mutex::new((backend.create_timeline(0)?, 0)),
        ];
        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            backend,
            parameters,
            draw_list_tags: DrawListTagRegistry::new(),
            buffers: RwLock::new(Vec::new()),
            images: RwLock::new(Vec::new()),
            tile_timelines,
        }))
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The creation parameters.
    pub fn parameters(&self) -> &DeviceParameters {
        &self.parameters
    }

    /// Hot-path validation mode.
    pub fn validation(&self) -> ValidationMode {
        self.parameters.validation
    }

    /// Registry of draw list tag names.
    pub fn draw_list_tag_registry(&self) -> &DrawListTagRegistry {
        &self.draw_list_tags
    }

    /// Create a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or the backend fails to allocate.
    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Arc<Buffer>, RhiError> {
        if descriptor.size == 0 {
            return Err(RhiError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let native = self.backend.create_buffer(descriptor)?;
        let buffer = Arc::new(Buffer::new(
            self.self_ref.clone(),
            descriptor.clone(),
            native,
        ));
        self.buffers.write().push(Arc::downgrade(&buffer));

        log::trace!(
            "Device: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(buffer)
    }

    /// Create an image.
    ///
    /// Reserved images start with no memory; map tiles with
    /// [`update_tile_mappings`](Self::update_tile_mappings).
    pub fn create_image(&self, descriptor: &ImageDescriptor) -> Result<Arc<Image>, RhiError> {
        if descriptor.width == 0
            || descriptor.height == 0
            || descriptor.array_layers == 0
            || descriptor.mip_levels == 0
        {
            return Err(RhiError::InvalidParameter(format!(
                "image {:?} has a zero dimension",
                descriptor.label
            )));
        }
        let max_mips = 32 - descriptor.width.max(descriptor.height).leading_zeros();
        if descriptor.mip_levels > max_mips {
            return Err(RhiError::InvalidParameter(format!(
                "image {:?} has {} mips, at most {max_mips} allowed",
                descriptor.label, descriptor.mip_levels
            )));
        }

        let native = self.backend.create_image(descriptor)?;
        let image = Arc::new(Image::new(
            self.self_ref.clone(),
            descriptor.clone(),
            native,
        ));
        self.images.write().push(Arc::downgrade(&image));

        log::trace!(
            "Device: created image {:?}, {}x{}",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        Ok(image)
    }

    /// Allocate a heap of `tile_count` tiles for reserved images.
    pub fn create_tile_heap(&self, tile_count: u32) -> Result<Arc<TileHeap>, RhiError> {
        if tile_count == 0 {
            return Err(RhiError::InvalidParameter(
                "tile heap cannot be empty".to_string(),
            ));
        }
        let native = self.backend.allocate_tile_memory(tile_count)?;
        Ok(Arc::new(TileHeap::new(
            self.self_ref.clone(),
            tile_count,
            native,
        )))
    }

    /// Create a timeline starting at `initial_value`.
    pub fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, RhiError> {
        self.backend.create_timeline(initial_value)
    }

    /// Create a command list for a hardware queue.
    pub fn create_command_list(
        &self,
        queue: HardwareQueueClass,
        level: CommandListLevel,
    ) -> Result<CommandList, RhiError> {
        let native = self.backend.create_command_list(queue, level)?;
        Ok(CommandList::new(native, queue, level, self.validation()))
    }

    /// Submit work to a hardware queue.
    ///
    /// Every command list must be a primary list that has been ended.
    pub fn submit(
        &self,
        queue: HardwareQueueClass,
        submission: QueueSubmission,
    ) -> Result<(), RhiError> {
        profile_scope!("device_submit");

        if let Some(list) = submission.command_lists.iter().find(|list| {
            list.state() != CommandListState::Executable
                || list.level() != CommandListLevel::Primary
        }) {
            log::error!(
                "Device: command list {:?} is not an ended primary list",
                list.name()
            );
            return Err(RhiError::InvalidParameter(format!(
                "command list {:?} cannot be submitted in state {:?}",
                list.name(),
                list.state()
            )));
        }

        log::trace!(
            "Device: submitting {} command lists to {queue} queue",
            submission.command_lists.len()
        );
        self.backend.submit(queue, submission)
    }

    /// Update tile mappings of a reserved image on a hardware queue.
    ///
    /// The image reports the new mappings once the queue has applied them.
    pub fn update_tile_mappings(
        &self,
        queue: HardwareQueueClass,
        request: TileMappingRequest,
        wait_points: Vec<TimelinePoint>,
        signal_points: Vec<TimelinePoint>,
    ) -> Result<(), RhiError> {
        let tile_count = request.image.tile_count();
        if !request.image.descriptor().reserved {
            return Err(RhiError::InvalidParameter(format!(
                "image {:?} is not reserved",
                request.image.label()
            )));
        }
        for mapping in &request.mappings {
            if mapping.tile_index >= tile_count {
                return Err(RhiError::InvalidParameter(format!(
                    "tile {} is out of range for image {:?} with {tile_count} tiles",
                    mapping.tile_index,
                    request.image.label()
                )));
            }
            if let Some(binding) = &mapping.binding
                && binding.heap_tile >= binding.heap.tile_count()
            {
                return Err(RhiError::InvalidParameter(format!(
                    "heap tile {} is out of range",
                    binding.heap_tile
                )));
            }
        }

        // Held across the backend call so values reach the queue in order
        let mut tile_timeline = self.tile_timelines[queue.index()].lock();
        let completion = TimelinePoint::new(tile_timeline.0.clone(), tile_timeline.1 + 1);
        let image = Arc::clone(&request.image);
        image.queue_tile_mappings(completion.clone(), &request.mappings);
        // First, so the image sees the update before any caller signal
        let mut signal_points = signal_points;
        signal_points.insert(0, completion.clone());
        if let Err(e) = self
            .backend
            .update_tile_mappings(queue, request, wait_points, signal_points)
        {
            image.cancel_tile_mappings(&completion);
            return Err(e);
        }
        tile_timeline.1 = completion.value;
        Ok(())
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        profile_function!();
        self.backend.wait_idle()
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .read()
            .iter()
            .filter(|buffer| buffer.strong_count() > 0)
            .count()
    }

    /// Number of live images.
    pub fn image_count(&self) -> usize {
        self.images
            .read()
            .iter()
            .filter(|image| image.strong_count() > 0)
            .count()
    }

    /// Drop bookkeeping for resources that no longer exist.
    pub fn cleanup_dead_resources(&self) {
        self.buffers.write().retain(|buffer| buffer.strong_count() > 0);
        self.images.write().retain(|image| image.strong_count() > 0);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("validation", &self.parameters.validation)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Device: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::BackendType;
    use crate::resources::TileMapping;
    use crate::types::{BufferUsage, ImageFormat, ImageUsage};

    fn create_test_device() -> Arc<Device> {
        Device::new(
            DeviceParameters::new()
                .with_backend(BackendType::Dummy)
                .with_validation(ValidationMode::Enabled),
        )
        .unwrap()
    }

    #[test]
    fn test_backend_name() {
        let device = create_test_device();
        assert_eq!(device.backend_name(), "Dummy Backend");
    }

    #[test]
    fn test_create_buffer() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::COPY_DST))
            .unwrap();
        assert_eq!(buffer.size(), 1024);
        assert!(buffer.device().is_some());
        assert_eq!(device.buffer_count(), 1);
    }

    #[test]
    fn test_create_buffer_zero_size() {
        let device = create_test_device();
        let result = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::COPY_DST));
        assert!(result.is_err());
    }

    #[test]
    fn test_create_image_rejects_too_many_mips() {
        let device = create_test_device();
        let descriptor = ImageDescriptor::new_2d(8, 8, ImageFormat::R8Unorm, ImageUsage::SAMPLED);
        assert!(device.create_image(&descriptor.clone().with_mip_levels(4)).is_ok());
        assert!(device.create_image(&descriptor.with_mip_levels(5)).is_err());
    }

    #[test]
    fn test_resource_cleanup() {
        let device = create_test_device();
        let image = device
            .create_image(&ImageDescriptor::new_2d(
                4,
                4,
                ImageFormat::Rgba8Unorm,
                ImageUsage::SAMPLED,
            ))
            .unwrap();
        assert_eq!(device.image_count(), 1);
        drop(image);
        device.cleanup_dead_resources();
        assert_eq!(device.image_count(), 0);
    }

    #[test]
    fn test_submit_rejects_recording_list() {
        let device = create_test_device();
        let mut list = device
            .create_command_list(HardwareQueueClass::Graphics, CommandListLevel::Primary)
            .unwrap();
        list.begin(None).unwrap();
        let result = device.submit(
            HardwareQueueClass::Graphics,
            QueueSubmission::new().with_command_list(list),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_tile_mappings_validated() {
        let device = create_test_device();
        let image = device
            .create_image(
                &ImageDescriptor::new_2d(256, 256, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED)
                    .with_reserved(true),
            )
            .unwrap();
        let heap = device.create_tile_heap(2).unwrap();

        let out_of_range = TileMappingRequest {
            image: Arc::clone(&image),
            mappings: vec![TileMapping::map(7, Arc::clone(&heap), 0)],
        };
        assert!(
            device
                .update_tile_mappings(HardwareQueueClass::Copy, out_of_range, vec![], vec![])
                .is_err()
        );

        let request = TileMappingRequest {
            image: Arc::clone(&image),
            mappings: vec![
                TileMapping::map(0, Arc::clone(&heap), 0),
                TileMapping::map(1, Arc::clone(&heap), 1),
            ],
        };
        device
            .update_tile_mappings(HardwareQueueClass::Copy, request, vec![], vec![])
            .unwrap();
        device.wait_idle().unwrap();
        assert_eq!(image.mapped_tile_count(), 2);
    }

    #[test]
    fn test_tile_mappings_visible_once_applied() {
        let device = create_test_device();
        let image = device
            .create_image(
                &ImageDescriptor::new_2d(256, 256, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED)
                    .with_reserved(true),
            )
            .unwrap();
        let heap = device.create_tile_heap(1).unwrap();
        let gate = device.create_timeline(0).unwrap();
        let done = device.create_timeline(0).unwrap();

        let request = TileMappingRequest {
            image: Arc::clone(&image),
            mappings: vec![TileMapping::map(3, Arc::clone(&heap), 0)],
        };
        device
            .update_tile_mappings(
                HardwareQueueClass::Copy,
                request,
                vec![TimelinePoint::new(gate.clone(), 1)],
                vec![TimelinePoint::new(done.clone(), 1)],
            )
            .unwrap();

        // The queue is still waiting on the gate
        assert!(!image.is_tile_mapped(3));
        assert_eq!(image.mapped_tile_count(), 0);

        gate.signal(1).unwrap();
        done.wait(1).unwrap();
        assert!(image.is_tile_mapped(3));
        assert_eq!(image.mapped_tile_count(), 1);
    }
}
