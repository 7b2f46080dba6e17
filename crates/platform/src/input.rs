//! Keyboard and mouse state, and the key bindings the application honors.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

use crate::event::AppEvent;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        match button {
            winit::event::MouseButton::Right => MouseButton::Right,
            winit::event::MouseButton::Middle => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// What a key press asks the application to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Close,
    ToggleVsync,
}

/// Tracks the current state of keyboard and mouse input.
#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    pressed_buttons: HashSet<MouseButton>,
    mouse_position: (f32, f32),
    focused: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            focused: true,
            ..Self::default()
        }
    }

    /// Folds `event` into the tracked state and returns the action bound to
    /// a fresh key press, if any. Key repeats do not retrigger actions.
    pub fn handle(&mut self, event: &AppEvent) -> Option<InputAction> {
        match *event {
            AppEvent::Key {
                code,
                pressed: true,
            } => {
                if self.pressed_keys.insert(code) {
                    return Self::binding(code);
                }
            }
            AppEvent::Key {
                code,
                pressed: false,
            } => {
                self.pressed_keys.remove(&code);
            }
            AppEvent::MouseButton {
                button,
                pressed: true,
            } => {
                self.pressed_buttons.insert(button);
            }
            AppEvent::MouseButton {
                button,
                pressed: false,
            } => {
                self.pressed_buttons.remove(&button);
            }
            AppEvent::MouseMoved { x, y } => self.mouse_position = (x, y),
            AppEvent::Focused(focused) => {
                self.focused = focused;
                if !focused {
                    // Releases are not delivered to unfocused windows
                    self.pressed_keys.clear();
                    self.pressed_buttons.clear();
                }
            }
            _ => {}
        }
        None
    }

    fn binding(code: KeyCode) -> Option<InputAction> {
        match code {
            KeyCode::Escape => Some(InputAction::Close),
            KeyCode::KeyV => Some(InputAction::ToggleVsync),
            _ => None,
        }
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.pressed_buttons.contains(&button)
    }

    pub fn mouse_position(&self) -> (f32, f32) {
        self.mouse_position
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }
}
