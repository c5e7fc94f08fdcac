//! Vulkan timeline semaphores.

use ash::vk;

use crate::error::RhiError;

/// Create a timeline semaphore starting at `initial_value`.
pub fn create_timeline_semaphore(
    device: &ash::Device,
    initial_value: u64,
) -> Result<vk::Semaphore, RhiError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

    unsafe { device.create_semaphore(&create_info, None) }
        .map_err(|e| RhiError::vulkan("vkCreateSemaphore", e))
}

/// A timeline semaphore shared between queues and the host.
pub struct VulkanTimeline {
    device: ash::Device,
    semaphore: vk::Semaphore,
}

impl VulkanTimeline {
    pub(crate) fn new(device: ash::Device, initial_value: u64) -> Result<Self, RhiError> {
        let semaphore = create_timeline_semaphore(&device, initial_value)?;
        Ok(Self { device, semaphore })
    }

    /// The native semaphore.
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Current counter value. Query failures are logged and read as zero.
    pub fn completed_value(&self) -> u64 {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }.unwrap_or_else(|e| {
            log::error!("vkGetSemaphoreCounterValue failed: {e:?}");
            0
        })
    }

    /// Signal from the host. Values at or below the counter are skipped since
    /// Vulkan requires a strictly greater value.
    pub fn signal(&self, value: u64) -> Result<(), RhiError> {
        if value <= self.completed_value() {
            return Ok(());
        }
        let info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.semaphore)
            .value(value);
        unsafe { self.device.signal_semaphore(&info) }
            .map_err(|e| RhiError::vulkan("vkSignalSemaphore", e))
    }

    /// Block until the counter reaches `value`.
    pub fn wait(&self, value: u64) -> Result<(), RhiError> {
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&info, u64::MAX) }
            .map_err(|e| RhiError::vulkan("vkWaitSemaphores", e))
    }
}

impl Drop for VulkanTimeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}
