//! Core utilities for the ray tracing renderer.
//!
//! This crate provides foundational types and utilities used across the renderer:
//! - Error types, two-part error codes and the fatal-error channel
//! - Logging initialization
//! - Frame timing
//! - Configuration management

pub mod config;
mod error;
mod fatal;
mod logging;
mod timer;

pub use config::{DebugLevel, RendererConfig, WindowProperties};
pub use error::{Error, ErrorCode, ErrorModule, Result};
pub use fatal::fatal;
pub use logging::init_logging;
pub use timer::{FrameRateCounter, Timer};
