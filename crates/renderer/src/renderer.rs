//! Main renderer orchestration.
//!
//! [`Renderer`] owns the device session, the frame slots, the swapchain and
//! the ray tracing scene, and exposes the frame cycle to the application.

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use raytracer_core::RendererConfig;
use raytracer_platform::{Surface, Window};
use raytracer_rhi::command::CommandBuffer;
use raytracer_rhi::deletion_queue::DeletionQueue;
use raytracer_rhi::device::Device;
use raytracer_rhi::image::{AllocatedImage, DRAW_IMAGE_FORMAT, draw_image_usage};
use raytracer_rhi::immediate::ImmediateSubmitter;
use raytracer_rhi::instance::Instance;
use raytracer_rhi::physical_device::{SurfaceQuery, select_physical_device};
use raytracer_rhi::swapchain::{AcquireOutcome, SurfaceStatus};
use raytracer_rhi::{RhiError, RhiResult};
use tracing::{debug, error, info};

use crate::frame_loop::{FRAME_OVERLAP, FrameBackend, FrameScheduler, FrameTicket};
use crate::frame_slot::FrameSlot;
use crate::ray_query_pass::{RAYTRACE_SHADER_PATH, RayQueryPass};
use crate::raytracing::RaytracingScene;
use crate::swapchain_controller::SwapchainController;

/// Records UI draw calls on top of the presented image.
///
/// Called once per frame after the render target has been copied, with the
/// swapchain image in `COLOR_ATTACHMENT_OPTIMAL`.
pub trait OverlayRecorder {
    fn record(&mut self, cmd: &CommandBuffer, target: vk::ImageView, extent: vk::Extent2D);
}

/// Region of the render target drawn this frame.
pub fn draw_extent(
    swapchain: vk::Extent2D,
    draw_image: vk::Extent2D,
    render_scale: f32,
) -> vk::Extent2D {
    let scale = |a: u32, b: u32| ((a.min(b) as f32 * render_scale) as u32).max(1);
    vk::Extent2D {
        width: scale(swapchain.width, draw_image.width),
        height: scale(swapchain.height, draw_image.height),
    }
}

/// The Vulkan side of the frame cycle.
struct VulkanFrameBackend {
    device: Arc<Device>,
    frames: Vec<FrameSlot>,
    swapchain: SwapchainController,
    draw_image: AllocatedImage,
    draw_extent: vk::Extent2D,
    render_scale: f32,
    // Window geometry used by the next rebuild
    target_extent: vk::Extent2D,
    vsync: bool,
    overlay: Option<Box<dyn OverlayRecorder>>,
}

impl FrameBackend for VulkanFrameBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frames[slot].wait()
    }

    fn reclaim_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.frames[slot].reclaim().map(|_| ())
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        self.swapchain.acquire_next_image(&self.frames[slot])
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.frames[slot].render_fence().reset()
    }

    fn begin_recording(&mut self, slot: usize, _image_index: u32) -> RhiResult<()> {
        self.draw_extent = draw_extent(
            self.swapchain.extent(),
            self.draw_image.extent(),
            self.render_scale,
        );

        let cmd = self.frames[slot].command_buffer();
        cmd.reset()?;
        cmd.begin()?;

        // Previous contents are not needed
        cmd.transition_image(
            self.draw_image.image(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );

        Ok(())
    }

    fn finish_recording(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let swapchain = self.swapchain.current()?;
        let cmd = self.frames[slot].command_buffer();
        let target = swapchain.image(image_index);
        let draw_image = self.draw_image.image();

        cmd.transition_image(
            draw_image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        cmd.transition_image(
            target,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        cmd.copy_image_to_image(draw_image, target, self.draw_extent, swapchain.extent());

        match self.overlay.as_mut() {
            Some(overlay) => {
                cmd.transition_image(
                    target,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                );
                overlay.record(cmd, swapchain.image_view(image_index), swapchain.extent());
                cmd.transition_image(
                    target,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                );
            }
            None => cmd.transition_image(
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        }

        cmd.end()
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let frame = &self.frames[slot];

        let wait_semaphores = [frame.image_acquired().handle()];
        // The first write to the swapchain image is a layout transition
        // recorded with ALL_COMMANDS
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let signal_semaphores = [frame.render_complete().handle()];
        let command_buffers = [frame.command_buffer().handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.render_fence().handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<SurfaceStatus> {
        self.swapchain.present(&self.frames[slot], image_index)
    }

    fn rebuild_surface(&mut self) -> RhiResult<bool> {
        self.swapchain.rebuild(self.target_extent, self.vsync)
    }
}

/// Main renderer that manages all Vulkan resources.
///
/// # Resource Destruction Order
///
/// 1. Wait for the device to go idle
/// 2. Flush the main deletion queue
/// 3. Drop fields top to bottom: pass, scene, frame slots, swapchain, draw
///    image, immediate submitter, surface
/// 4. The device (and through it the instance) goes last
pub struct Renderer {
    scheduler: FrameScheduler,
    pass: RayQueryPass,
    scene: RaytracingScene,
    backend: VulkanFrameBackend,
    immediate: ImmediateSubmitter,
    main_deletion_queue: DeletionQueue,
    surface: Surface,
    device: Arc<Device>,
}

impl Renderer {
    /// Creates a renderer for `window` using the default shader location.
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        Self::with_shader(window, config, Path::new(RAYTRACE_SHADER_PATH))
    }

    /// Creates a renderer for `window`, loading the ray query shader from
    /// `shader_path`.
    ///
    /// # Errors
    ///
    /// Fails when no GPU supports ray queries and presentation to the
    /// window, when the shader cannot be loaded, or on any Vulkan error.
    pub fn with_shader(
        window: &Window,
        config: &RendererConfig,
        shader_path: &Path,
    ) -> RhiResult<Self> {
        let extent = window.extent();
        info!(
            "Initializing ray tracer ({}x{}, render scale {})",
            extent.width, extent.height, config.render_scale
        );

        let extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let application_name = CString::new(config.window.title.as_str())
            .unwrap_or_else(|_| CString::from(c"Raytracer"));
        let instance = Arc::new(Instance::new(
            &application_name,
            config.debug_level,
            &extensions,
        )?);

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info = select_physical_device(
            instance.handle(),
            Some(SurfaceQuery {
                surface: surface.handle(),
                loader: instance.surface_loader(),
            }),
        )?;
        let device = Device::new(instance.clone(), &physical_device_info)?;

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or_else(|| RhiError::MissingCapability("graphics queue".to_string()))?;

        let swapchain =
            SwapchainController::new(device.clone(), surface.handle(), extent, window.vsync())?;

        let draw_image_extent = if window.is_zero_area() {
            vk::Extent2D {
                width: config.window.width,
                height: config.window.height,
            }
        } else {
            extent
        };
        let draw_image = AllocatedImage::new(
            device.clone(),
            "draw image",
            draw_image_extent,
            DRAW_IMAGE_FORMAT,
            draw_image_usage(),
        )?;

        let frames = (0..FRAME_OVERLAP)
            .map(|index| FrameSlot::new(device.clone(), index, graphics_family))
            .collect::<RhiResult<Vec<_>>>()?;

        let mut immediate = ImmediateSubmitter::new(device.clone())?;
        let scene = RaytracingScene::new(device.clone(), &mut immediate)?;
        let pass = RayQueryPass::new(device.clone(), shader_path)?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight",
            swapchain.current()?.image_count(),
            FRAME_OVERLAP
        );

        Ok(Self {
            scheduler: FrameScheduler::new(),
            pass,
            scene,
            backend: VulkanFrameBackend {
                device: device.clone(),
                frames,
                swapchain,
                draw_image,
                draw_extent: draw_image_extent,
                render_scale: config.render_scale,
                target_extent: extent,
                vsync: window.vsync(),
                overlay: None,
            },
            immediate,
            main_deletion_queue: DeletionQueue::new("main"),
            surface,
            device,
        })
    }

    /// Opens a frame: waits for and reclaims the slot, acquires an image and
    /// starts recording with the render target in `GENERAL` layout.
    ///
    /// Returns `None` when there is nothing to draw this tick: the window
    /// has no area, or the swapchain was out of date and has been rebuilt.
    pub fn begin_frame(&mut self, window: &mut Window) -> RhiResult<Option<FrameTicket>> {
        if window.is_zero_area() {
            return Ok(None);
        }

        self.sync_window(window);
        let rebuilds = self.scheduler.rebuild_count();
        let ticket = self
            .scheduler
            .begin_frame(&mut self.backend, window.should_invalidate_swapchain())?;
        self.acknowledge_rebuild(window, rebuilds);

        Ok(ticket)
    }

    /// Copies the render target to the acquired image, submits and
    /// presents, rebuilding the swapchain afterwards if needed.
    pub fn end_frame(&mut self, window: &mut Window, ticket: FrameTicket) -> RhiResult<()> {
        self.sync_window(window);
        let rebuilds = self.scheduler.rebuild_count();
        let status = self.scheduler.end_frame(
            &mut self.backend,
            ticket,
            window.should_invalidate_swapchain(),
        )?;
        if status != SurfaceStatus::Optimal {
            debug!("Present reported {:?}", status);
        }
        self.acknowledge_rebuild(window, rebuilds);

        Ok(())
    }

    /// Runs one full cycle that traces the scene into the render target.
    ///
    /// Returns whether an image was presented.
    pub fn draw(&mut self, window: &mut Window) -> RhiResult<bool> {
        let Some(ticket) = self.begin_frame(window)? else {
            return Ok(false);
        };

        let frame = &self.backend.frames[ticket.slot()];
        self.pass.record(
            frame.command_buffer(),
            frame.descriptor_pool(),
            self.backend.draw_image.image_view(),
            self.backend.draw_extent,
            self.scene.tlas_handle(),
        )?;

        self.end_frame(window, ticket)?;
        Ok(true)
    }

    fn sync_window(&mut self, window: &Window) {
        self.backend.target_extent = window.extent();
        self.backend.vsync = window.vsync();
    }

    fn acknowledge_rebuild(&self, window: &mut Window, rebuilds_before: u64) {
        if self.scheduler.rebuild_count() != rebuilds_before {
            window.swapchain_invalidated();
        }
    }

    /// Command buffer recording the frame opened by `ticket`.
    pub fn command_buffer(&self, ticket: &FrameTicket) -> &CommandBuffer {
        self.backend.frames[ticket.slot()].command_buffer()
    }

    /// Queue released once the frame opened by `ticket` has retired on the
    /// GPU.
    pub fn frame_deletion_queue(&mut self, ticket: &FrameTicket) -> &mut DeletionQueue {
        self.backend.frames[ticket.slot()].deletion_queue()
    }

    /// Registers a teardown action that runs when the renderer is dropped.
    pub fn plan_deletion<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.main_deletion_queue.push_function(action);
    }

    /// Records `work` and blocks until the GPU has executed it.
    pub fn immediate_submit<F>(&mut self, work: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        self.immediate.submit(work)
    }

    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRecorder>) {
        self.backend.overlay = Some(overlay);
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn draw_image(&self) -> &AllocatedImage {
        &self.backend.draw_image
    }

    /// Extent traced by the current (or last) frame.
    #[inline]
    pub fn draw_extent(&self) -> vk::Extent2D {
        self.backend.draw_extent
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.backend.swapchain.extent()
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.scheduler.frame_number()
    }

    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.scheduler.rebuild_count()
    }

    #[inline]
    pub fn scene(&self) -> &RaytracingScene {
        &self.scene
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }

        let flushed = self.main_deletion_queue.flush();
        info!(
            "Renderer destroyed after {} frames ({} planned deletion(s))",
            self.scheduler.frame_number(),
            flushed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_draw_extent_takes_smaller_side() {
        let result = draw_extent(extent(1280, 1440), extent(1920, 1080), 1.0);
        assert_eq!(result, extent(1280, 1080));
    }

    #[test]
    fn test_draw_extent_applies_render_scale() {
        let result = draw_extent(extent(1920, 1080), extent(1920, 1080), 0.5);
        assert_eq!(result, extent(960, 540));
    }

    #[test]
    fn test_draw_extent_never_zero() {
        let result = draw_extent(extent(1, 1), extent(1920, 1080), 0.1);
        assert_eq!(result, extent(1, 1));
    }
}
