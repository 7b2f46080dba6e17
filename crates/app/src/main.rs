//! Ray tracer - main entry point.
//!
//! Opens a window, builds the acceleration structures once, then traces a
//! frame per redraw until the window is closed.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use raytracer_core::{FrameRateCounter, RendererConfig, Timer, fatal};
use raytracer_platform::{AppEvent, InputAction, InputState, Window};
use raytracer_renderer::Renderer;

const FRAME_RATE_WINDOW: Duration = Duration::from_secs(2);

struct Application {
    config: RendererConfig,
    // Renderer before window: the surface must go before the window it
    // was created for
    renderer: Option<Renderer>,
    window: Option<Window>,
    input: InputState,
    timer: Timer,
    frame_rate: FrameRateCounter,
}

impl Application {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            input: InputState::new(),
            timer: Timer::new(),
            frame_rate: FrameRateCounter::new(FRAME_RATE_WINDOW),
        }
    }

    fn dispatch(&mut self, event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            AppEvent::Resized { width, height } => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(width, height);
                }
            }
            AppEvent::RedrawRequested => self.redraw(),
            other => match self.input.handle(&other) {
                Some(InputAction::Close) => {
                    info!("Escape pressed, shutting down");
                    event_loop.exit();
                }
                Some(InputAction::ToggleVsync) => {
                    if let Some(window) = self.window.as_mut() {
                        let vsync = !window.vsync();
                        window.set_vsync(vsync);
                    }
                }
                None => {}
            },
        }
    }

    fn redraw(&mut self) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_mut()) else {
            return;
        };

        let delta = self.timer.tick();
        match renderer.draw(window) {
            Ok(true) => {
                if let Some(fps) = self.frame_rate.record(delta) {
                    info!(
                        "{:.1} fps (frame {}, {} swapchain rebuild(s))",
                        fps,
                        renderer.frame_number(),
                        renderer.rebuild_count()
                    );
                }
            }
            Ok(false) => debug!("Frame skipped"),
            Err(e) => fatal(e.code(), e),
        }
    }
}

impl ApplicationHandler for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => fatal(e.code(), e),
        };

        let renderer = match Renderer::new(&window, &self.config) {
            Ok(renderer) => renderer,
            Err(e) => fatal(e.code(), e),
        };

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(event) = AppEvent::from_window_event(&event) {
            self.dispatch(event_loop, event);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear the renderer down while the window still exists
        self.renderer = None;
    }
}

fn main() -> Result<()> {
    raytracer_core::init_logging();
    info!("Starting ray tracer");

    let config = match RendererConfig::from_env() {
        Ok(config) => config,
        Err(e) => fatal(e.code(), e),
    };
    info!(
        "Config: {}x{}, vsync {}, debug level {}, render scale {}",
        config.window.width,
        config.window.height,
        config.window.vsync,
        config.debug_level,
        config.render_scale
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = Application::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
