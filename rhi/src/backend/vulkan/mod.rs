//! Native Vulkan backend implementation using ash.
//!
//! This backend provides:
//! - Validation layers when requested by the device parameters
//! - gpu-allocator for memory management
//! - One queue per hardware queue class (sharing families when the device
//!   has no dedicated compute or transfer family)
//! - Timeline semaphores for every [`GpuTimeline`]
//! - Sparse binding for reserved image tiles when supported
//! - Retirement of submitted command lists through an [`ObjectCollector`]

mod allocator;
mod collector;
mod command;
mod conversion;
mod debug;
mod device;
mod instance;
mod memory;
mod sync;

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::command_list::NativeCommandList;
use crate::error::RhiError;
use crate::memory::MemoryAllocation;
use crate::parameters::DeviceParameters;
use crate::profiling::profile_scope;
use crate::resources::{TILE_SIZE_IN_BYTES, TileMappingRequest};
use crate::types::{
    BufferDescriptor, CommandListLevel, HardwareQueueClass, ImageDescriptor, SemaphoreHandle,
};

use super::{
    GpuBackend, GpuBuffer, GpuImage, GpuTileHeap, GpuTimeline, QueueSubmission, TimelinePoint,
};

pub use collector::ObjectCollector;
pub use command::VulkanCommandList;
pub use device::QueueFamilies;
pub use memory::VulkanMemoryAllocation;
pub use sync::VulkanTimeline;

use self::conversion::{
    buffer_memory_location, convert_buffer_usage, convert_image_format, convert_image_usage,
};
use self::instance::VulkanInstance;

static NEXT_ALLOCATION_ID: AtomicU64 = AtomicU64::new(0);

/// Work held until the queue's internal timeline passes it.
enum InFlight {
    Submission {
        _submission: QueueSubmission,
    },
    TileMapping {
        _request: TileMappingRequest,
        _points: Vec<TimelinePoint>,
    },
}

/// One native queue and its retirement state.
struct VulkanQueue {
    family: u32,
    device: ash::Device,
    /// Native queue plus the last value signaled on `timeline`. Submission to
    /// a queue must be externally synchronized.
    state: Mutex<(vk::Queue, u64)>,
    timeline: vk::Semaphore,
    collector: ObjectCollector<InFlight>,
}

impl VulkanQueue {
    fn new(device: &ash::Device, family: u32) -> Result<Self, RhiError> {
        let queue = unsafe { device.get_device_queue(family, 0) };
        let timeline = sync::create_timeline_semaphore(device, 0)?;
        Ok(Self {
            family,
            device: device.clone(),
            state: Mutex::new((queue, 0)),
            timeline,
            collector: ObjectCollector::new(),
        })
    }

    fn retire_completed(&self) {
        match unsafe { self.device.get_semaphore_counter_value(self.timeline) } {
            Ok(completed) => {
                let released = self.collector.collect(completed);
                if released > 0 {
                    log::trace!(
                        "Vulkan queue family {}: retired {released} submissions",
                        self.family
                    );
                }
            }
            Err(e) => log::error!("vkGetSemaphoreCounterValue failed: {e:?}"),
        }
    }
}

impl Drop for VulkanQueue {
    fn drop(&mut self) {
        self.collector.collect_all();
        unsafe { self.device.destroy_semaphore(self.timeline, None) };
    }
}

/// Semaphores and values gathered for one submission.
#[derive(Default)]
struct SemaphoreList {
    semaphores: Vec<vk::Semaphore>,
    values: Vec<u64>,
}

impl SemaphoreList {
    fn push_points(&mut self, points: &[TimelinePoint]) -> Result<(), RhiError> {
        for point in points {
            let GpuTimeline::Vulkan(timeline) = &point.timeline else {
                return Err(RhiError::InvalidParameter(
                    "timeline was not created by the Vulkan backend".to_string(),
                ));
            };
            self.semaphores.push(timeline.semaphore());
            self.values.push(point.value);
        }
        Ok(())
    }

    // Binary semaphores ignore their value
    fn push_binary(&mut self, semaphores: &[SemaphoreHandle]) {
        for semaphore in semaphores {
            self.semaphores.push(vk::Semaphore::from_raw(semaphore.0));
            self.values.push(0);
        }
    }
}

/// Vulkan-based GPU backend using ash.
pub struct VulkanBackend {
    instance: VulkanInstance,
    device_debug_utils: Option<ash::ext::debug_utils::Device>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    families: QueueFamilies,
    /// Queues indexed like `families.unique()`.
    queues: Vec<VulkanQueue>,
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    non_coherent_atom_size: u64,
    sparse_binding: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("families", &self.families)
            .field("sparse_binding", &self.sparse_binding)
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create a new Vulkan backend.
    ///
    /// This initializes the Vulkan instance, selects a physical device,
    /// creates a logical device with one queue per distinct family, and sets
    /// up the memory allocator.
    pub fn new(params: &DeviceParameters) -> Result<Self, RhiError> {
        let instance = VulkanInstance::new(params.gpu_validation_layers)?;
        let raw = instance.raw();

        let (physical_device, families) = match device::select_physical_device(raw).and_then(
            |physical| device::find_queue_families(raw, physical).map(|families| (physical, families)),
        ) {
            Ok(selection) => selection,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(e);
            }
        };

        let (device, sparse_binding) =
            match device::create_logical_device(raw, physical_device, &families) {
                Ok(created) => created,
                Err(e) => {
                    unsafe { instance.destroy() };
                    return Err(e);
                }
            };

        let properties = unsafe { raw.get_physical_device_properties(physical_device) };
        let destroy_device = |device: &ash::Device| unsafe {
            device.destroy_device(None);
            instance.destroy();
        };

        let allocator = match allocator::create_allocator(raw, physical_device, device.clone()) {
            Ok(allocator) => allocator,
            Err(e) => {
                destroy_device(&device);
                return Err(e);
            }
        };

        let queues = match families
            .unique()
            .into_iter()
            .map(|family| VulkanQueue::new(&device, family))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(queues) => queues,
            Err(e) => {
                drop(allocator);
                destroy_device(&device);
                return Err(e);
            }
        };

        let device_debug_utils = instance
            .has_debug_utils()
            .then(|| ash::ext::debug_utils::Device::new(raw, &device));

        log::info!(
            "Vulkan backend initialized (validation layers: {}, sparse binding: {})",
            instance.has_debug_utils(),
            sparse_binding
        );

        Ok(Self {
            instance,
            device_debug_utils,
            physical_device,
            device,
            families,
            queues,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            sparse_binding,
        })
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        self.instance.raw()
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue families in use.
    pub fn queue_families(&self) -> &QueueFamilies {
        &self.families
    }

    /// Whether reserved images are supported.
    pub fn supports_sparse_binding(&self) -> bool {
        self.sparse_binding
    }

    fn queue_for_family(&self, family: u32) -> &VulkanQueue {
        self.queues
            .iter()
            .find(|queue| queue.family == family)
            .unwrap_or(&self.queues[0])
    }

    fn queue(&self, class: HardwareQueueClass) -> &VulkanQueue {
        self.queue_for_family(self.families.family(class))
    }

    fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let families = self.families.unique();
        if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<MemoryAllocation, RhiError> {
        // Unique so the allocation can be found in allocator reports
        let unique_name = format!(
            "{name}#{}",
            NEXT_ALLOCATION_ID.fetch_add(1, Ordering::Relaxed)
        );
        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: &unique_name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                log::error!("Failed to allocate {name}: {e}");
                RhiError::ResourceCreationFailed(format!("Failed to allocate {name}: {e}"))
            })?;

        Ok(MemoryAllocation::Vulkan(VulkanMemoryAllocation::new(
            unique_name,
            self.device.clone(),
            Arc::clone(&self.allocator),
            allocation,
            location,
            self.non_coherent_atom_size,
        )))
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, RhiError> {
        let (sharing_mode, families) = self.sharing();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| RhiError::vulkan("vkCreateBuffer", e))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate(
            descriptor.label.as_deref().unwrap_or("buffer"),
            requirements,
            buffer_memory_location(descriptor.usage),
            true,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let gpu_buffer = GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            memory,
        };
        // GpuBuffer owns the handle from here on, so failures clean up on drop
        let MemoryAllocation::Vulkan(allocation) = gpu_buffer.memory() else {
            return Err(RhiError::Internal("unexpected allocation type".to_string()));
        };
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| RhiError::vulkan("vkBindBufferMemory", e))?;

        if let (Some(debug_utils), Some(label)) = (&self.device_debug_utils, &descriptor.label) {
            debug::set_object_name(debug_utils, buffer, label);
        }

        Ok(gpu_buffer)
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, RhiError> {
        if descriptor.reserved && !self.sparse_binding {
            return Err(RhiError::ResourceCreationFailed(
                "reserved images require sparse binding support".to_string(),
            ));
        }

        let (sharing_mode, families) = self.sharing();
        let flags = if descriptor.reserved {
            vk::ImageCreateFlags::SPARSE_BINDING
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_image_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.width,
                height: descriptor.height,
                depth: 1,
            })
            .mip_levels(descriptor.mip_levels)
            .array_layers(descriptor.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(descriptor.usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| RhiError::vulkan("vkCreateImage", e))?;

        if let (Some(debug_utils), Some(label)) = (&self.device_debug_utils, &descriptor.label) {
            debug::set_object_name(debug_utils, image, label);
        }

        if descriptor.reserved {
            return Ok(GpuImage::Vulkan {
                device: self.device.clone(),
                image,
                memory: None,
            });
        }

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate(
            descriptor.label.as_deref().unwrap_or("image"),
            requirements,
            MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let gpu_image = GpuImage::Vulkan {
            device: self.device.clone(),
            image,
            memory: Some(memory),
        };
        let Some(MemoryAllocation::Vulkan(allocation)) = gpu_image.memory() else {
            return Err(RhiError::Internal("unexpected allocation type".to_string()));
        };
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| RhiError::vulkan("vkBindImageMemory", e))?;

        Ok(gpu_image)
    }

    fn allocate_tile_memory(&self, tile_count: u32) -> Result<GpuTileHeap, RhiError> {
        let requirements = vk::MemoryRequirements {
            size: u64::from(tile_count) * TILE_SIZE_IN_BYTES,
            alignment: TILE_SIZE_IN_BYTES,
            memory_type_bits: u32::MAX,
        };
        let memory = self.allocate("tile heap", requirements, MemoryLocation::GpuOnly, false)?;
        Ok(GpuTileHeap::Vulkan { memory })
    }

    fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, RhiError> {
        Ok(GpuTimeline::Vulkan(Arc::new(VulkanTimeline::new(
            self.device.clone(),
            initial_value,
        )?)))
    }

    fn create_command_list(
        &self,
        queue: HardwareQueueClass,
        level: CommandListLevel,
    ) -> Result<NativeCommandList, RhiError> {
        Ok(NativeCommandList::Vulkan(VulkanCommandList::new(
            self.device.clone(),
            self.device_debug_utils.clone(),
            self.families.family(queue),
            level,
        )?))
    }

    fn submit(
        &self,
        queue: HardwareQueueClass,
        submission: QueueSubmission,
    ) -> Result<(), RhiError> {
        profile_scope!("vulkan_submit");

        let queue = self.queue(queue);
        queue.retire_completed();

        let mut command_buffers = Vec::with_capacity(submission.command_lists.len());
        for list in &submission.command_lists {
            let NativeCommandList::Vulkan(native) = list.native() else {
                return Err(RhiError::InvalidParameter(format!(
                    "command list {:?} was not created by the Vulkan backend",
                    list.name()
                )));
            };
            command_buffers.push(native.command_buffer());
        }

        let mut waits = SemaphoreList::default();
        waits.push_points(&submission.wait_points)?;
        waits.push_binary(&submission.wait_semaphores);
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.semaphores.len()];

        let mut signals = SemaphoreList::default();
        signals.push_points(&submission.signal_points)?;
        signals.push_binary(&submission.signal_semaphores);

        let mut state = queue.state.lock();
        let value = state.1 + 1;
        signals.semaphores.push(queue.timeline);
        signals.values.push(value);

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&waits.values)
            .signal_semaphore_values(&signals.values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&waits.semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signals.semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_submit(state.0, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| RhiError::vulkan("vkQueueSubmit", e))?;

        state.1 = value;
        queue.collector.push(
            value,
            InFlight::Submission {
                _submission: submission,
            },
        );
        Ok(())
    }

    fn update_tile_mappings(
        &self,
        _queue: HardwareQueueClass,
        request: TileMappingRequest,
        wait_points: Vec<TimelinePoint>,
        signal_points: Vec<TimelinePoint>,
    ) -> Result<(), RhiError> {
        let Some(sparse_family) = self.families.sparse.filter(|_| self.sparse_binding) else {
            return Err(RhiError::InvalidParameter(
                "sparse binding is not supported".to_string(),
            ));
        };
        let GpuImage::Vulkan { image, .. } = request.image.native() else {
            return Err(RhiError::InvalidParameter(
                "image was not created by the Vulkan backend".to_string(),
            ));
        };

        let mut binds = Vec::with_capacity(request.mappings.len());
        for mapping in &request.mappings {
            let (memory, memory_offset) = match &mapping.binding {
                Some(binding) => {
                    let GpuTileHeap::Vulkan {
                        memory: MemoryAllocation::Vulkan(allocation),
                    } = binding.heap.native()
                    else {
                        return Err(RhiError::InvalidParameter(
                            "tile heap was not created by the Vulkan backend".to_string(),
                        ));
                    };
                    (
                        allocation.memory(),
                        allocation.offset() + u64::from(binding.heap_tile) * TILE_SIZE_IN_BYTES,
                    )
                }
                None => (vk::DeviceMemory::null(), 0),
            };
            binds.push(
                vk::SparseMemoryBind::default()
                    .resource_offset(u64::from(mapping.tile_index) * TILE_SIZE_IN_BYTES)
                    .size(TILE_SIZE_IN_BYTES)
                    .memory(memory)
                    .memory_offset(memory_offset),
            );
        }
        let image_binds = [vk::SparseImageOpaqueMemoryBindInfo::default()
            .image(*image)
            .binds(&binds)];

        let mut waits = SemaphoreList::default();
        waits.push_points(&wait_points)?;
        let mut signals = SemaphoreList::default();
        signals.push_points(&signal_points)?;

        let queue = self.queue_for_family(sparse_family);
        queue.retire_completed();

        let mut state = queue.state.lock();
        let value = state.1 + 1;
        signals.semaphores.push(queue.timeline);
        signals.values.push(value);

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&waits.values)
            .signal_semaphore_values(&signals.values);
        let bind_info = vk::BindSparseInfo::default()
            .wait_semaphores(&waits.semaphores)
            .image_opaque_binds(&image_binds)
            .signal_semaphores(&signals.semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_bind_sparse(state.0, &[bind_info], vk::Fence::null())
        }
        .map_err(|e| RhiError::vulkan("vkQueueBindSparse", e))?;

        state.1 = value;
        let mut points = wait_points;
        points.extend(signal_points);
        queue.collector.push(
            value,
            InFlight::TileMapping {
                _request: request,
                _points: points,
            },
        );
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| RhiError::vulkan("vkDeviceWaitIdle", e))?;
        for queue in &self.queues {
            queue.retire_completed();
        }
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Releases in-flight command lists and their resources
            self.queues.clear();

            if Arc::strong_count(&self.allocator) > 1 {
                log::warn!("Vulkan backend dropped while allocations are still alive");
            }
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            self.instance.destroy();
        }
    }
}
