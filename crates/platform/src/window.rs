//! Window management using winit.
//!
//! Besides owning the winit window, [`Window`] carries the swapchain
//! invalidation flag: resizes and vsync toggles set it, and the renderer
//! clears it once a new swapchain has been built.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window as WinitWindow, WindowAttributes};

use raytracer_core::{Error, Result, WindowProperties};

/// RAII wrapper for a Vulkan surface.
///
/// The caller must ensure the Vulkan instance outlives this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from ash_window::create_surface on the
        // instance the loader was built from, and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Drawable size, vsync preference and the swapchain invalidation flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentationState {
    extent: vk::Extent2D,
    vsync: bool,
    swapchain_invalidated: bool,
}

impl PresentationState {
    pub fn new(width: u32, height: u32, vsync: bool) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            vsync,
            swapchain_invalidated: false,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn is_zero_area(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            self.vsync = vsync;
            self.swapchain_invalidated = true;
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
        self.swapchain_invalidated = true;
    }

    pub fn should_invalidate_swapchain(&self) -> bool {
        self.swapchain_invalidated
    }

    pub fn swapchain_invalidated(&mut self) {
        self.swapchain_invalidated = false;
    }
}

/// A resizable window plus the state the frame loop reads from it.
pub struct Window {
    window: Arc<WinitWindow>,
    state: PresentationState,
}

impl Window {
    /// Opens a window described by `properties`.
    pub fn new(event_loop: &ActiveEventLoop, properties: &WindowProperties) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(properties.title.as_str())
            .with_inner_size(PhysicalSize::new(properties.width, properties.height))
            .with_resizable(true)
            .with_fullscreen(
                properties
                    .fullscreen
                    .then_some(Fullscreen::Borderless(None)),
            );

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        tracing::info!(
            "Window created: {}x{} (vsync: {})",
            size.width,
            size.height,
            properties.vsync
        );

        Ok(Self {
            window: Arc::new(window),
            state: PresentationState::new(size.width, size.height, properties.vsync),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current drawable size in physical pixels.
    pub fn extent(&self) -> vk::Extent2D {
        self.state.extent()
    }

    /// True when the window has no drawable area (e.g. minimized).
    pub fn is_zero_area(&self) -> bool {
        self.state.is_zero_area()
    }

    pub fn vsync(&self) -> bool {
        self.state.vsync()
    }

    /// Changes the vsync preference; takes effect with the next swapchain.
    pub fn set_vsync(&mut self, vsync: bool) {
        if self.state.vsync() != vsync {
            tracing::info!("Vsync {}", if vsync { "enabled" } else { "disabled" });
        }
        self.state.set_vsync(vsync);
    }

    /// Whether the swapchain must be rebuilt before the next present.
    pub fn should_invalidate_swapchain(&self) -> bool {
        self.state.should_invalidate_swapchain()
    }

    /// Acknowledges that the swapchain has been rebuilt.
    pub fn swapchain_invalidated(&mut self) {
        self.state.swapchain_invalidated();
    }

    /// Records a new drawable size (call this when handling resize events).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.state.resize(width, height);
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions the platform needs for surface creation.
    ///
    /// The returned pointers reference static strings owned by the loader.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| {
                Error::Window(format!("Failed to enumerate required extensions: {}", e))
            })?;

        tracing::debug!(
            "Required Vulkan extensions for surface: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns valid, null-terminated static strings.
                .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// `instance` must outlive the returned [`Surface`].
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: the handles come from a live winit window and the surface
        // is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Window(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}
