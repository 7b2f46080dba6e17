//! Platform abstraction layer for the ray tracer.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit, including the swapchain invalidation flag
//! - Typed application events and input bindings
//! - Vulkan surface creation and the instance extensions it needs

mod event;
mod input;
mod window;

pub use event::AppEvent;
pub use input::{InputAction, InputState, KeyCode, MouseButton};
pub use window::{PresentationState, Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::window::WindowId;
