//! Synchronization primitives for Vulkan.
//!
//! This module provides wrappers for Vulkan synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//!
//! Host waits are always bounded. An expired wait is reported as
//! [`RhiError::Timeout`], which callers treat as a lost device.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::sync::{FRAME_TIMEOUT_NS, Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
//! let image_acquired = Semaphore::new(device.clone())?;
//! let render_fence = Fence::new(device.clone(), true)?;
//!
//! render_fence.wait(FRAME_TIMEOUT_NS, "render fence")?;
//! render_fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Bound for per-frame fence waits and image acquisition (one second).
pub const FRAME_TIMEOUT_NS: u64 = 1_000_000_000;

/// Bound for blocking one-off submissions.
pub const IMMEDIATE_TIMEOUT_NS: u64 = 9_999_999_999;

/// Vulkan semaphore wrapper.
///
/// Binary semaphore used for queue-side ordering: image acquired before the
/// frame's submission runs, render complete before presentation.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
///
/// The only CPU-observable completion signal. Frame slots create theirs
/// signaled so the first wait on a fresh slot returns immediately.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence, optionally already signaled.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout_ns` expires.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] naming `what` when the bound expires,
    /// or the Vulkan error for anything else.
    pub fn wait(&self, timeout_ns: u64, what: &'static str) -> RhiResult<()> {
        let fences = [self.fence];
        match unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout_ns)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout(what)),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the fence to the unsignaled state.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}
