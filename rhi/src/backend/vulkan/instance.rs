//! Headless Vulkan instance.

use std::ffi::{CStr, c_char};

use ash::vk;

use crate::error::RhiError;

use super::debug::DebugMessenger;

/// Lowest supported API version. Timeline semaphores are core in 1.2.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

const KHRONOS_VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";

/// The loaded entry points, the instance, and the validation messenger when
/// layers are active.
pub struct VulkanInstance {
    // Entry points stay loaded for the instance lifetime
    _entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<DebugMessenger>,
}

impl VulkanInstance {
    /// Load Vulkan and create an instance without surface extensions.
    ///
    /// When `validation_layers` is set but the Khronos layer is not
    /// installed, the instance is created without it.
    pub fn new(validation_layers: bool) -> Result<Self, RhiError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RhiError::InitializationFailed(format!("Failed to load Vulkan: {e}"))
        })?;

        let validation = validation_layers && has_layer(&entry, KHRONOS_VALIDATION);
        if validation_layers && !validation {
            log::warn!("{KHRONOS_VALIDATION:?} requested but not installed");
        }

        let mut extensions: Vec<*const c_char> = Vec::new();
        let mut layers: Vec<*const c_char> = Vec::new();
        let mut flags = vk::InstanceCreateFlags::empty();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(KHRONOS_VALIDATION.as_ptr());
        }
        if cfg!(target_os = "macos") {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"RedLilium RHI")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"RedLilium")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);
        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RhiError::vulkan("vkCreateInstance", e))?;

        let messenger = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::debug!(
            "Vulkan instance created ({} extensions, validation layers: {validation})",
            extensions.len()
        );
        Ok(Self {
            _entry: entry,
            instance,
            messenger,
        })
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    /// Whether validation messages are being forwarded, which also means
    /// debug-utils object naming is available.
    pub fn has_debug_utils(&self) -> bool {
        self.messenger.is_some()
    }

    /// Destroy the messenger and the instance. Every child object must
    /// already be destroyed and the instance must not be used afterwards.
    pub unsafe fn destroy(&self) {
        unsafe {
            if let Some(messenger) = &self.messenger {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn has_layer(entry: &ash::Entry, wanted: &CStr) -> bool {
    match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == wanted)),
        Err(e) => {
            log::warn!("vkEnumerateInstanceLayerProperties failed: {e:?}");
            false
        }
    }
}
