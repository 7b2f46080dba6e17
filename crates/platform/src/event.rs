//! Typed application events converted from winit window events.

use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::input::MouseButton;

/// Events the application reacts to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppEvent {
    CloseRequested,
    Resized { width: u32, height: u32 },
    Key { code: KeyCode, pressed: bool },
    MouseMoved { x: f32, y: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    Focused(bool),
    RedrawRequested,
}

impl AppEvent {
    /// Converts a winit window event; events the application ignores map to
    /// `None`.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::CloseRequested => Some(AppEvent::CloseRequested),
            WindowEvent::Resized(size) => Some(AppEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::KeyboardInput { event, .. } => match event.physical_key {
                PhysicalKey::Code(code) => Some(AppEvent::Key {
                    code,
                    pressed: event.state == ElementState::Pressed,
                }),
                PhysicalKey::Unidentified(_) => None,
            },
            WindowEvent::CursorMoved { position, .. } => Some(AppEvent::MouseMoved {
                x: position.x as f32,
                y: position.y as f32,
            }),
            WindowEvent::MouseInput { state, button, .. } => Some(AppEvent::MouseButton {
                button: (*button).into(),
                pressed: *state == ElementState::Pressed,
            }),
            WindowEvent::Focused(focused) => Some(AppEvent::Focused(*focused)),
            WindowEvent::RedrawRequested => Some(AppEvent::RedrawRequested),
            _ => None,
        }
    }
}
