//! Startup configuration.
//!
//! Values come from [`RendererConfig::default`] and may be overridden through
//! `RAYTRACER_*` environment variables with [`RendererConfig::from_env`].

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Validation-layer verbosity.
///
/// Anything other than [`DebugLevel::None`] enables the Khronos validation
/// layer; the level picks which message severities are forwarded to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugLevel {
    None,
    Errors,
    Warnings,
    Verbose,
    Debug,
}

impl DebugLevel {
    pub fn validation_enabled(self) -> bool {
        self != DebugLevel::None
    }
}

impl Default for DebugLevel {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            DebugLevel::Errors
        } else {
            DebugLevel::None
        }
    }
}

impl FromStr for DebugLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(DebugLevel::None),
            "errors" | "error" => Ok(DebugLevel::Errors),
            "warnings" | "warning" | "warn" => Ok(DebugLevel::Warnings),
            "verbose" => Ok(DebugLevel::Verbose),
            "debug" => Ok(DebugLevel::Debug),
            other => Err(Error::Config(format!("unknown debug level '{other}'"))),
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugLevel::None => "none",
            DebugLevel::Errors => "errors",
            DebugLevel::Warnings => "warnings",
            DebugLevel::Verbose => "verbose",
            DebugLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Properties of the main window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowProperties {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub vsync: bool,
}

impl Default for WindowProperties {
    fn default() -> Self {
        Self {
            title: "Raytracer".to_string(),
            width: 1920,
            height: 1080,
            fullscreen: false,
            vsync: false,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub window: WindowProperties,
    pub debug_level: DebugLevel,
    /// Fraction of the draw image used each frame.
    pub render_scale: f32,
}

impl RendererConfig {
    pub const MIN_RENDER_SCALE: f32 = 0.1;
    pub const MAX_RENDER_SCALE: f32 = 1.0;

    /// Builds the default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the default configuration with overrides taken from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(width) = lookup("RAYTRACER_WIDTH") {
            config.window.width = parse_dimension("RAYTRACER_WIDTH", &width)?;
        }
        if let Some(height) = lookup("RAYTRACER_HEIGHT") {
            config.window.height = parse_dimension("RAYTRACER_HEIGHT", &height)?;
        }
        if let Some(vsync) = lookup("RAYTRACER_VSYNC") {
            config.window.vsync = parse_flag("RAYTRACER_VSYNC", &vsync)?;
        }
        if let Some(level) = lookup("RAYTRACER_DEBUG") {
            config.debug_level = level.parse()?;
        }
        if let Some(scale) = lookup("RAYTRACER_RENDER_SCALE") {
            let scale: f32 = scale.trim().parse().map_err(|_| {
                Error::Config(format!("RAYTRACER_RENDER_SCALE: '{scale}' is not a number"))
            })?;
            config.set_render_scale(scale);
        }

        Ok(config)
    }

    /// Sets the render scale, clamped to the supported range.
    pub fn set_render_scale(&mut self, scale: f32) {
        self.render_scale = scale.clamp(Self::MIN_RENDER_SCALE, Self::MAX_RENDER_SCALE);
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowProperties::default(),
            debug_level: DebugLevel::default(),
            render_scale: 1.0,
        }
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(Error::Config(format!(
            "{key}: '{value}' is not a positive integer"
        ))),
        Ok(v) => Ok(v),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(Error::Config(format!("{key}: '{value}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_window() {
        let config = RendererConfig::default();
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);
        assert_eq!(config.window.title, "Raytracer");
        assert!(!config.window.vsync);
        assert_eq!(config.render_scale, 1.0);
    }

    #[test]
    fn test_overrides_applied() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            ("RAYTRACER_WIDTH", "1280"),
            ("RAYTRACER_HEIGHT", "720"),
            ("RAYTRACER_VSYNC", "true"),
            ("RAYTRACER_DEBUG", "Warnings"),
            ("RAYTRACER_RENDER_SCALE", "0.5"),
        ]))
        .unwrap();

        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert!(config.window.vsync);
        assert_eq!(config.debug_level, DebugLevel::Warnings);
        assert_eq!(config.render_scale, 0.5);
    }

    #[test]
    fn test_render_scale_is_clamped() {
        let config =
            RendererConfig::from_lookup(lookup_from(&[("RAYTRACER_RENDER_SCALE", "4.0")])).unwrap();
        assert_eq!(config.render_scale, RendererConfig::MAX_RENDER_SCALE);

        let config =
            RendererConfig::from_lookup(lookup_from(&[("RAYTRACER_RENDER_SCALE", "0.0")])).unwrap();
        assert_eq!(config.render_scale, RendererConfig::MIN_RENDER_SCALE);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(RendererConfig::from_lookup(lookup_from(&[("RAYTRACER_WIDTH", "0")])).is_err());
        assert!(RendererConfig::from_lookup(lookup_from(&[("RAYTRACER_HEIGHT", "tall")])).is_err());
        assert!(RendererConfig::from_lookup(lookup_from(&[("RAYTRACER_VSYNC", "maybe")])).is_err());
        assert!(RendererConfig::from_lookup(lookup_from(&[("RAYTRACER_DEBUG", "loud")])).is_err());
    }

    #[test]
    fn test_debug_level_parse_and_validation() {
        assert_eq!("none".parse::<DebugLevel>().unwrap(), DebugLevel::None);
        assert_eq!("verbose".parse::<DebugLevel>().unwrap(), DebugLevel::Verbose);
        assert!(!DebugLevel::None.validation_enabled());
        assert!(DebugLevel::Errors.validation_enabled());
        assert!(DebugLevel::Debug > DebugLevel::Warnings);
    }
}
