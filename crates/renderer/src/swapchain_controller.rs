//! Swapchain lifecycle: build, idle-then-rebuild, acquire and present.

use std::sync::Arc;

use ash::vk;
use raytracer_rhi::device::Device;
use raytracer_rhi::swapchain::{
    AcquireOutcome, SurfaceStatus, Swapchain, query_presentable_extent,
};
use raytracer_rhi::sync::FRAME_TIMEOUT_NS;
use raytracer_rhi::{RhiError, RhiResult};
use tracing::{debug, info};

use crate::frame_slot::FrameSlot;

/// Owns the current [`Swapchain`] for one surface.
///
/// A rebuild never overlaps two swapchains: the device is idled and the old
/// state torn down completely before the new one is built.
pub struct SwapchainController {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    swapchain: Option<Swapchain>,
    generation: u64,
}

impl SwapchainController {
    /// Builds the first swapchain for `surface`.
    pub fn new(
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(device.clone(), surface, extent, vsync)?;

        Ok(Self {
            device,
            surface,
            swapchain: Some(swapchain),
            generation: 0,
        })
    }

    /// Waits for the device to go idle, destroys the current swapchain and
    /// builds a new one for `extent`.
    ///
    /// Returns `false`, keeping the current swapchain, while the window or
    /// the surface has zero area.
    pub fn rebuild(&mut self, extent: vk::Extent2D, vsync: bool) -> RhiResult<bool> {
        if extent.width == 0 || extent.height == 0 {
            debug!("Window has zero area, swapchain rebuild deferred");
            return Ok(false);
        }

        self.device.wait_idle()?;

        if query_presentable_extent(&self.device, self.surface, extent)?.is_none() {
            debug!("Surface has zero area, swapchain rebuild deferred");
            return Ok(false);
        }

        // Full teardown before the new build
        self.swapchain = None;
        self.swapchain = Some(Swapchain::new(
            self.device.clone(),
            self.surface,
            extent,
            vsync,
        )?);
        self.generation += 1;

        info!(
            "Swapchain rebuilt (generation {}) at {}x{}",
            self.generation, extent.width, extent.height
        );

        Ok(true)
    }

    /// Requests the next image, signaling `frame`'s image-acquired
    /// semaphore.
    pub fn acquire_next_image(&self, frame: &FrameSlot) -> RhiResult<AcquireOutcome> {
        self.current()?
            .acquire_next_image(frame.image_acquired().handle(), FRAME_TIMEOUT_NS)
    }

    /// Presents `image_index` once `frame`'s render-complete semaphore
    /// signals.
    pub fn present(&self, frame: &FrameSlot, image_index: u32) -> RhiResult<SurfaceStatus> {
        let queue = self
            .device
            .present_queue()
            .ok_or_else(|| RhiError::SwapchainError("device has no present queue".into()))?;

        self.current()?
            .present(queue, image_index, frame.render_complete().handle())
    }

    /// The live swapchain.
    ///
    /// # Errors
    ///
    /// Only fails if a previous rebuild failed part-way.
    pub fn current(&self) -> RhiResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RhiError::SwapchainError("no swapchain built".into()))
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map(Swapchain::extent)
            .unwrap_or_default()
    }

    /// Number of completed rebuilds.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
