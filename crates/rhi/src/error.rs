//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device is exposed by the loader
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The selected device lacks a required capability
    #[error("Capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// No memory type matches the resource's requirements
    #[error("No suitable memory type (type bits {type_bits:#x}, flags {flags:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    /// Shader loading or module creation error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Whether the failure means the device ran out of a resource.
    ///
    /// Kept separate from [`RhiError::is_capability_missing`] so callers can
    /// tell "this GPU can never run us" from "this GPU is full right now".
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Self::NoSuitableMemoryType { .. } => true,
            Self::AllocatorError(gpu_allocator::AllocationError::OutOfMemory) => true,
            Self::VulkanError(result) => matches!(
                *result,
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | vk::Result::ERROR_OUT_OF_POOL_MEMORY
                    | vk::Result::ERROR_FRAGMENTED_POOL
            ),
            _ => false,
        }
    }

    /// Whether the failure means a required feature, queue, or extension is absent.
    pub fn is_capability_missing(&self) -> bool {
        match self {
            Self::CapabilityNotSupported(_) | Self::NoSuitableGpu => true,
            Self::VulkanError(result) => matches!(
                *result,
                vk::Result::ERROR_EXTENSION_NOT_PRESENT
                    | vk::Result::ERROR_FEATURE_NOT_PRESENT
                    | vk::Result::ERROR_LAYER_NOT_PRESENT
                    | vk::Result::ERROR_INCOMPATIBLE_DRIVER
            ),
            _ => false,
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_errors_are_exhaustion() {
        let err = RhiError::NoSuitableMemoryType {
            type_bits: 0b101,
            flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(err.is_resource_exhaustion());
        assert!(!err.is_capability_missing());

        let err = RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(err.is_resource_exhaustion());

        let err = RhiError::from(gpu_allocator::AllocationError::OutOfMemory);
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn test_capability_errors_are_not_exhaustion() {
        let err = RhiError::CapabilityNotSupported("no compute queue".into());
        assert!(err.is_capability_missing());
        assert!(!err.is_resource_exhaustion());

        let err = RhiError::from(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        assert!(err.is_capability_missing());
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn test_other_errors_are_neither() {
        let err = RhiError::ShaderError("bad magic".into());
        assert!(!err.is_capability_missing());
        assert!(!err.is_resource_exhaustion());
    }

    #[test]
    fn test_memory_type_message() {
        let err = RhiError::NoSuitableMemoryType {
            type_bits: 0x3,
            flags: vk::MemoryPropertyFlags::HOST_VISIBLE,
        };
        assert!(err.to_string().contains("0x3"));
    }
}
