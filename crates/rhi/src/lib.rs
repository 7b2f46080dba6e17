//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps `ash` with owned, drop-ordered types. It covers:
//! - Instance, physical device selection and device creation
//! - Swapchain building, acquire and present
//! - Command recording and immediate (blocking) submission
//! - Buffers and images backed by `gpu-allocator`
//! - Deferred destruction through [`deletion_queue::DeletionQueue`]
//! - Bottom- and top-level acceleration structure builds
//! - Fences, semaphores and their timeouts

mod error;

pub mod acceleration;
pub mod buffer;
pub mod command;
pub mod deletion_queue;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
