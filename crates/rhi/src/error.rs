//! RHI-specific error types.

use raytracer_core::{ErrorCode, ErrorModule};
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The selected device lacks a capability the renderer depends on
    #[error("Missing required device capability: {0}")]
    MissingCapability(String),

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Shader load or module build error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Acceleration structure build ordering or input error
    #[error("Acceleration structure error: {0}")]
    AccelerationStructureError(String),

    /// Frame cycle called out of order
    #[error("Frame sequencing error: {0}")]
    FrameSequence(String),
}

impl RhiError {
    /// Fatal-channel code for this error.
    pub fn code(&self) -> ErrorCode {
        let (module, number) = match self {
            RhiError::ShaderError(_) => (ErrorModule::Shader, 0x00),
            RhiError::PipelineError(_) => (ErrorModule::Shader, 0x01),
            RhiError::LoadingError(_) => (ErrorModule::Device, 0x00),
            RhiError::NoSuitableGpu => (ErrorModule::Device, 0x01),
            RhiError::MissingCapability(_) => (ErrorModule::Device, 0x02),
            RhiError::InvalidHandle(_) => (ErrorModule::Device, 0x03),
            RhiError::AllocatorError(_) => (ErrorModule::Memory, 0x00),
            RhiError::SurfaceError(_) => (ErrorModule::Swapchain, 0x00),
            RhiError::SwapchainError(_) => (ErrorModule::Swapchain, 0x01),
            RhiError::Timeout(_) => (ErrorModule::Frame, 0x00),
            RhiError::FrameSequence(_) => (ErrorModule::Frame, 0x01),
            RhiError::AccelerationStructureError(_) => (ErrorModule::AccelerationStructure, 0x00),
            // Low byte of the raw result; all error results are negative.
            RhiError::VulkanError(result) => (ErrorModule::Vulkan, result.as_raw() as u8),
        };
        ErrorCode::new(module, number)
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;

    #[test]
    fn test_shader_error_code() {
        let code = RhiError::ShaderError("bad blob".into()).code();
        assert_eq!(code, ErrorCode::new(ErrorModule::Shader, 0x00));
        assert_eq!(code.value(), 0x0200);
    }

    #[test]
    fn test_vulkan_error_code_carries_result() {
        let code = RhiError::from(vk::Result::ERROR_DEVICE_LOST).code();
        assert_eq!(code.module, ErrorModule::Vulkan);
        assert_eq!(code.number, vk::Result::ERROR_DEVICE_LOST.as_raw() as u8);
    }

    #[test]
    fn test_timeout_is_frame_module() {
        assert_eq!(
            RhiError::Timeout("frame fence").code().module,
            ErrorModule::Frame
        );
    }
}
