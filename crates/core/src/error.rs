//! Error types for the renderer.

use std::fmt;

use thiserror::Error;

/// Subsystem that raised a fatal condition.
///
/// The discriminant forms the high byte of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorModule {
    Platform = 0x01,
    Shader = 0x02,
    Device = 0x03,
    Memory = 0x04,
    Swapchain = 0x05,
    Frame = 0x06,
    AccelerationStructure = 0x07,
    Vulkan = 0x08,
    Config = 0x09,
}

impl ErrorModule {
    /// Upper-case tag used in fatal log lines.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorModule::Platform => "PLATFORM",
            ErrorModule::Shader => "SHADER",
            ErrorModule::Device => "DEVICE",
            ErrorModule::Memory => "MEMORY",
            ErrorModule::Swapchain => "SWAPCHAIN",
            ErrorModule::Frame => "FRAME",
            ErrorModule::AccelerationStructure => "ACCELERATION STRUCTURE",
            ErrorModule::Vulkan => "VULKAN",
            ErrorModule::Config => "CONFIG",
        }
    }
}

/// Two-part identifier attached to every fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub module: ErrorModule,
    pub number: u8,
}

impl ErrorCode {
    pub const fn new(module: ErrorModule, number: u8) -> Self {
        Self { module, number }
    }

    /// Combined 16-bit value, module in the high byte.
    pub fn value(self) -> u16 {
        ((self.module as u16) << 8) | self.number as u16
    }

    /// Process exit status reported by [`crate::fatal`].
    ///
    /// Only the low byte of an exit status survives on Unix, so the module
    /// byte is used on its own. It is never zero.
    pub fn exit_status(self) -> i32 {
        i32::from(self.module as u8)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.value())
    }
}

/// Main error type for the renderer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Window event loop could not be created
    #[error("Event loop error: {0}")]
    EventLoop(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Fatal-channel code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::EventLoop(_) => ErrorCode::new(ErrorModule::Platform, 0x00),
            Error::Window(_) => ErrorCode::new(ErrorModule::Platform, 0x01),
            Error::Io(_) => ErrorCode::new(ErrorModule::Platform, 0x02),
            Error::Config(_) => ErrorCode::new(ErrorModule::Config, 0x00),
        }
    }
}

/// Result type alias using the renderer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_value_packs_module_high() {
        let code = ErrorCode::new(ErrorModule::Shader, 0x00);
        assert_eq!(code.value(), 0x0200);

        let code = ErrorCode::new(ErrorModule::Platform, 0x01);
        assert_eq!(code.value(), 0x0101);
    }

    #[test]
    fn test_error_code_display() {
        let code = ErrorCode::new(ErrorModule::AccelerationStructure, 0x1F);
        assert_eq!(code.to_string(), "0x071F");
    }

    #[test]
    fn test_exit_status_is_never_success() {
        let modules = [
            ErrorModule::Platform,
            ErrorModule::Shader,
            ErrorModule::Device,
            ErrorModule::Memory,
            ErrorModule::Swapchain,
            ErrorModule::Frame,
            ErrorModule::AccelerationStructure,
            ErrorModule::Vulkan,
            ErrorModule::Config,
        ];

        for module in modules {
            let status = ErrorCode::new(module, 0x00).exit_status();
            assert_ne!(status, 0, "{module:?}");
            assert_eq!(status & 0xFF, status);
        }
    }

    #[test]
    fn test_core_error_codes() {
        assert_eq!(
            Error::Window("no window".into()).code(),
            ErrorCode::new(ErrorModule::Platform, 0x01)
        );
        assert_eq!(Error::Config("bad".into()).code().module, ErrorModule::Config);
    }
}
