//! Swapchain state: presentable images, their views, and the acquire/present
//! calls against them.
//!
//! A [`Swapchain`] is never patched in place. Invalidation is handled by
//! dropping the whole state (its teardown queue destroys the views, then the
//! swapchain) and building a fresh one.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::swapchain::{AcquireOutcome, Swapchain};
//! use raytracer_rhi::sync::FRAME_TIMEOUT_NS;
//!
//! # fn example(device: Arc<Device>, surface: vk::SurfaceKHR, acquired: vk::Semaphore)
//! #     -> Result<(), raytracer_rhi::RhiError> {
//! let extent = vk::Extent2D { width: 1920, height: 1080 };
//! let swapchain = Swapchain::new(device, surface, extent, true)?;
//! match swapchain.acquire_next_image(acquired, FRAME_TIMEOUT_NS)? {
//!     AcquireOutcome::Acquired { image_index, .. } => { /* record, submit, present */ }
//!     AcquireOutcome::OutOfDate => { /* rebuild */ }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::deletion_queue::DeletionQueue;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Health of the presentation surface reported by acquire/present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    /// Still presentable, but no longer matches the surface exactly.
    Suboptimal,
    /// Unusable until the swapchain is rebuilt.
    OutOfDate,
}

impl SurfaceStatus {
    pub fn needs_rebuild(self) -> bool {
        self != SurfaceStatus::Optimal
    }
}

/// Result of a successful acquire call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// No image was acquired; the acquire semaphore is left unsignaled.
    OutOfDate,
}

impl AcquireOutcome {
    pub fn status(self) -> SurfaceStatus {
        match self {
            AcquireOutcome::Acquired {
                suboptimal: false, ..
            } => SurfaceStatus::Optimal,
            AcquireOutcome::Acquired {
                suboptimal: true, ..
            } => SurfaceStatus::Suboptimal,
            AcquireOutcome::OutOfDate => SurfaceStatus::OutOfDate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// One generation of presentable images.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    deletion_queue: DeletionQueue,
}

impl Swapchain {
    /// Builds a swapchain for `surface`.
    ///
    /// Presents with FIFO when `vsync` is set, otherwise with the lowest
    /// latency mode the surface offers.
    ///
    /// # Errors
    ///
    /// Fails on a headless device, on a surface with no formats or present
    /// modes, and on any Vulkan error.
    pub fn new(
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = device
            .swapchain_loader()
            .cloned()
            .ok_or_else(|| RhiError::SwapchainError("device was created headless".to_string()))?;

        let support = SwapchainSupportDetails::query(
            device.physical_device(),
            surface,
            device.instance().surface_loader(),
        )?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, vsync);
        let extent = presentable_extent(&support.capabilities, extent).ok_or_else(|| {
            RhiError::SwapchainError("surface has zero area".to_string())
        })?;
        let image_count = determine_image_count(&support.capabilities);

        let queue_families = device.queue_families();
        let graphics_family = queue_families
            .graphics_family
            .ok_or_else(|| RhiError::SwapchainError("no graphics queue".to_string()))?;
        let present_family = queue_families
            .present_family
            .ok_or_else(|| RhiError::SwapchainError("no present queue".to_string()))?;
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(swapchain_image_usage())
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let mut deletion_queue = DeletionQueue::new("swapchain");
        {
            let loader = swapchain_loader.clone();
            deletion_queue.push_function(move || unsafe {
                loader.destroy_swapchain(swapchain, None);
            });
        }

        let mut this = Self {
            device,
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
            deletion_queue,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain)? };
        this.create_image_views()?;

        info!(
            "Swapchain built: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            this.images.len()
        );

        Ok(this)
    }

    fn create_image_views(&mut self) -> RhiResult<()> {
        for (i, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let image_view = unsafe {
                self.device
                    .handle()
                    .create_image_view(&create_info, None)
                    .map_err(|e| {
                        RhiError::SwapchainError(format!("Failed to create image view {i}: {e}"))
                    })?
            };

            let device = self.device.clone();
            self.deletion_queue.push_function(move || unsafe {
                device.handle().destroy_image_view(image_view, None);
            });
            self.image_views.push(image_view);
        }

        debug!("Created {} swapchain image views", self.image_views.len());
        Ok(())
    }

    /// Requests the next presentable image, signaling `semaphore` when it is
    /// ready.
    ///
    /// # Errors
    ///
    /// Out-of-date and suboptimal are reported through [`AcquireOutcome`].
    /// An expired `timeout_ns` is [`RhiError::Timeout`]; any other result is
    /// returned as a Vulkan error.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Err(RhiError::Timeout("swapchain image"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<SurfaceStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(SurfaceStatus::Optimal),
            Ok(true) => Ok(SurfaceStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    #[inline]
    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.deletion_queue.flush();
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Swapchain images are blitted into and may be drawn over by an overlay.
pub fn swapchain_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::COLOR_ATTACHMENT
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = [vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_SRGB];

    for wanted in preferred {
        if let Some(&format) = formats
            .iter()
            .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        {
            return format;
        }
    }

    warn!(
        "Using first available surface format: {:?}",
        formats[0].format
    );
    formats[0]
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for mode in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if present_modes.contains(&mode) {
                return mode;
            }
        }
        debug!("No low-latency present mode available, falling back to FIFO");
    }

    // Always supported
    vk::PresentModeKHR::FIFO
}

/// Extent a swapchain built against `capabilities` would get, or `None`
/// while the surface has no area (a minimized window).
pub fn presentable_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> Option<vk::Extent2D> {
    let extent = choose_extent(capabilities, requested.width, requested.height);
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

/// Queries `surface` and returns its [`presentable_extent`].
pub fn query_presentable_extent(
    device: &Device,
    surface: vk::SurfaceKHR,
    requested: vk::Extent2D,
) -> RhiResult<Option<vk::Extent2D>> {
    let capabilities = unsafe {
        device
            .instance()
            .surface_loader()
            .get_physical_device_surface_capabilities(device.physical_device(), surface)?
    };

    Ok(presentable_extent(&capabilities, requested))
}

fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // max_image_count == 0 means no upper limit
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_unorm() {
        let formats = vec![
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];

        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_vsync_selects_fifo() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_no_vsync_prefers_mailbox() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_no_vsync_falls_back_to_immediate_then_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::IMMEDIATE
        );

        let modes = vec![vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 100);
    }

    #[test]
    fn test_minimized_surface_has_no_presentable_extent() {
        let requested = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let minimized = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            ..Default::default()
        };
        assert_eq!(presentable_extent(&minimized, requested), None);

        let visible = vk::SurfaceCapabilitiesKHR {
            current_extent: requested,
            ..Default::default()
        };
        assert_eq!(presentable_extent(&visible, requested), Some(requested));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_swapchain_image_usage_allows_blit_target() {
        assert!(swapchain_image_usage().contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_acquire_outcome_status() {
        let optimal = AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: false,
        };
        let suboptimal = AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        };

        assert_eq!(optimal.status(), SurfaceStatus::Optimal);
        assert!(!optimal.status().needs_rebuild());
        assert!(suboptimal.status().needs_rebuild());
        assert!(AcquireOutcome::OutOfDate.status().needs_rebuild());
    }
}
