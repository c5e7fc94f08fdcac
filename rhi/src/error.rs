//! RHI error types.

use std::fmt;

/// Errors that can occur in the render hardware interface.
///
/// Programmer-error invariants (recording a serial group from two threads,
/// initializing a draw list context twice) are not represented here; they are
/// debug assertions. This type only carries conditions a caller can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RhiError {
    /// Failed to initialize a backend or device.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// Out of GPU or staging memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// A native API call failed with the given result code.
    Native {
        /// Name of the failing native call.
        operation: &'static str,
        /// Raw result code reported by the native API.
        code: i32,
    },
    /// Handing work to a hardware queue failed.
    SubmissionFailed(String),
    /// The queue that should process the request has been shut down.
    QueueShutDown,
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for RhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::Native { operation, code } => {
                write!(f, "native call {operation} failed with code {code}")
            }
            Self::SubmissionFailed(msg) => write!(f, "queue submission failed: {msg}"),
            Self::QueueShutDown => write!(f, "queue has been shut down"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RhiError {}

#[cfg(feature = "vulkan-backend")]
impl RhiError {
    /// Convert a Vulkan result into an error, logging it at the failure site.
    pub(crate) fn vulkan(operation: &'static str, result: ash::vk::Result) -> Self {
        log::error!("{operation} failed: {result:?}");
        match result {
            ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfMemory,
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Native {
                operation,
                code: other.as_raw(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RhiError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = RhiError::InvalidParameter("frame count is zero".to_string());
        assert_eq!(err.to_string(), "invalid parameter: frame count is zero");

        let err = RhiError::Native {
            operation: "vkQueueSubmit",
            code: -4,
        };
        assert_eq!(err.to_string(), "native call vkQueueSubmit failed with code -4");
    }
}
