//! Device creation parameters.

use crate::upload::AsyncUploadQueueDescriptor;
use crate::validation::ValidationMode;

/// Which backend a device is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Try Vulkan, fall back to the dummy backend.
    #[default]
    Auto,
    /// Host-memory backend with software queues.
    Dummy,
    /// Native Vulkan backend via ash.
    Vulkan,
}

/// Parameters for creating a [`Device`](crate::Device).
///
/// # Example
///
/// ```ignore
/// let params = DeviceParameters::new()
///     .with_backend(BackendType::Dummy)
///     .with_validation(ValidationMode::Enabled);
/// let device = Device::new(params)?;
/// ```
#[derive(Debug, Clone)]
pub struct DeviceParameters {
    /// Backend to create.
    pub backend: BackendType,
    /// Hot-path input validation.
    pub validation: ValidationMode,
    /// Enable native API validation layers (Vulkan only).
    pub gpu_validation_layers: bool,
    /// Default descriptor for upload queues created from the device.
    pub upload_queue: AsyncUploadQueueDescriptor,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            validation: ValidationMode::default(),
            gpu_validation_layers: cfg!(debug_assertions),
            upload_queue: AsyncUploadQueueDescriptor::default(),
        }
    }
}

impl DeviceParameters {
    /// Create parameters with defaults for the current build profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set hot-path validation.
    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    /// Enable or disable native validation layers.
    pub fn with_gpu_validation_layers(mut self, enabled: bool) -> Self {
        self.gpu_validation_layers = enabled;
        self
    }

    /// Set the default upload queue descriptor.
    pub fn with_upload_queue(mut self, descriptor: AsyncUploadQueueDescriptor) -> Self {
        self.upload_queue = descriptor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HardwareQueueClass;

    #[test]
    fn test_builder() {
        let params = DeviceParameters::new()
            .with_backend(BackendType::Dummy)
            .with_validation(ValidationMode::Disabled)
            .with_gpu_validation_layers(false)
            .with_upload_queue(AsyncUploadQueueDescriptor {
                frame_count: 2,
                staging_size_in_bytes: 1024,
                queue_class: HardwareQueueClass::Graphics,
            });

        assert_eq!(params.backend, BackendType::Dummy);
        assert_eq!(params.validation, ValidationMode::Disabled);
        assert!(!params.gpu_validation_layers);
        assert_eq!(params.upload_queue.frame_count, 2);
    }

    #[test]
    fn test_defaults() {
        let params = DeviceParameters::default();
        assert_eq!(params.backend, BackendType::Auto);
        assert_eq!(params.upload_queue, AsyncUploadQueueDescriptor::default());
    }
}
