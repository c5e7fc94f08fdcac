//! Validation layer output routed into `log`, and debug object names.

use std::ffi::{CStr, CString, c_void};

use ash::vk;

use crate::error::RhiError;

/// A debug-utils messenger forwarding validation messages to `log`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Register the messenger on `instance`.
    ///
    /// Verbose driver chatter is not requested; info messages land at
    /// `debug` level.
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self, RhiError> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(forward_message));

        let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| RhiError::vulkan("vkCreateDebugUtilsMessengerEXT", e))?;
        Ok(Self { loader, handle })
    }

    /// Unregister the messenger. Must run before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.handle, None)
        };
    }
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

fn message_category(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// # Safety
///
/// `ptr` must be null or point to a nul-terminated string.
unsafe fn lossy_str(ptr: *const std::ffi::c_char) -> Option<String> {
    (!ptr.is_null()).then(|| {
        unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    })
}

unsafe extern "system" fn forward_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes null or a callback data struct valid for the
    // duration of the call, whose strings are null or nul-terminated.
    let (id, message) = match unsafe { callback_data.as_ref() } {
        Some(data) => unsafe {
            (
                lossy_str(data.p_message_id_name),
                lossy_str(data.p_message),
            )
        },
        None => (None, None),
    };

    log::log!(
        target: "redlilium_rhi::vulkan",
        severity_level(severity),
        "[{}] {}: {}",
        message_category(message_type),
        id.as_deref().unwrap_or("-"),
        message.as_deref().unwrap_or("(no message)")
    );
    vk::FALSE
}

/// Attach a debug name to a Vulkan object. Names with interior nul bytes are
/// skipped.
pub fn set_object_name<H: vk::Handle>(
    debug_utils: &ash::ext::debug_utils::Device,
    handle: H,
    name: &str,
) {
    let Ok(name) = CString::new(name) else {
        log::warn!("Debug name {name:?} contains a nul byte");
        return;
    };
    let info = vk::DebugUtilsObjectNameInfoEXT::default()
        .object_handle(handle)
        .object_name(&name);
    if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
        log::warn!("vkSetDebugUtilsObjectNameEXT failed: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_levels() {
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            log::Level::Error
        );
        assert_eq!(
            severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO),
            log::Level::Debug
        );
        assert_eq!(
            message_category(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            ),
            "validation"
        );
    }
}
