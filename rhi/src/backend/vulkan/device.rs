//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::error::RhiError;
use crate::types::HardwareQueueClass;

/// Queue family chosen for each hardware queue class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family with graphics support.
    pub graphics: u32,
    /// Dedicated compute family, or the graphics family.
    pub compute: u32,
    /// Dedicated transfer family, or the best fallback.
    pub copy: u32,
    /// Family that supports sparse binding, if any.
    pub sparse: Option<u32>,
}

impl QueueFamilies {
    /// Family used for a queue class.
    pub fn family(&self, class: HardwareQueueClass) -> u32 {
        match class {
            HardwareQueueClass::Graphics => self.graphics,
            HardwareQueueClass::Compute => self.compute,
            HardwareQueueClass::Copy => self.copy,
        }
    }

    /// Distinct families, sorted.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.copy];
        families.extend(self.sparse);
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Select the best physical device.
///
/// Devices without timeline semaphore support are skipped. Discrete GPUs are
/// preferred over integrated GPUs.
pub fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to enumerate physical devices: {e:?}"))
    })?;

    if devices.is_empty() {
        return Err(RhiError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_12_features);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        if vulkan_12_features.timeline_semaphore == vk::FALSE {
            log::info!("Skipping GPU {device_name:?}: no timeline semaphore support");
            continue;
        }

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or_else(|| RhiError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Pick a queue family for every hardware queue class.
///
/// Compute and copy prefer dedicated families and fall back to the graphics
/// family.
pub fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilies, RhiError> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let find = |predicate: &dyn Fn(vk::QueueFlags) -> bool| {
        families
            .iter()
            .position(|family| family.queue_count > 0 && predicate(family.queue_flags))
            .map(|index| index as u32)
    };

    let graphics = find(&|flags| flags.contains(vk::QueueFlags::GRAPHICS)).ok_or_else(|| {
        RhiError::InitializationFailed("No graphics queue family found".to_string())
    })?;
    let compute = find(&|flags| {
        flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS)
    })
    .unwrap_or(graphics);
    let copy = find(&|flags| {
        flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    })
    .unwrap_or(compute);
    let sparse = if families[graphics as usize]
        .queue_flags
        .contains(vk::QueueFlags::SPARSE_BINDING)
    {
        Some(graphics)
    } else {
        find(&|flags| flags.contains(vk::QueueFlags::SPARSE_BINDING))
    };

    let families = QueueFamilies {
        graphics,
        compute,
        copy,
        sparse,
    };
    log::debug!("Vulkan queue families: {families:?}");
    Ok(families)
}

/// Create a logical device with one queue per distinct family.
///
/// Returns the device and whether sparse binding was enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> Result<(ash::Device, bool), RhiError> {
    let queue_priorities = [1.0f32];
    let unique_families = families.unique();
    let queue_create_infos: Vec<_> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    let supported = unsafe { instance.get_physical_device_features(physical_device) };
    let sparse_binding = families.sparse.is_some() && supported.sparse_binding == vk::TRUE;

    let features = vk::PhysicalDeviceFeatures::default().sparse_binding(sparse_binding);
    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features);

    let device =
        unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            RhiError::InitializationFailed(format!("Failed to create logical device: {e:?}"))
        })?;

    Ok((device, sparse_binding))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_families() {
        let families = QueueFamilies {
            graphics: 0,
            compute: 2,
            copy: 0,
            sparse: Some(0),
        };
        assert_eq!(families.unique(), vec![0, 2]);
        assert_eq!(families.family(HardwareQueueClass::Copy), 0);
        assert_eq!(families.family(HardwareQueueClass::Compute), 2);
    }
}
