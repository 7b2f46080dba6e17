//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and the debug
//! messenger that forwards validation output into `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use raytracer_core::DebugLevel;
//! use raytracer_rhi::instance::Instance;
//!
//! // Headless instance (no surface extensions) with validation errors reported
//! let instance = Instance::new(c"Raytracer", DebugLevel::Errors, &[])
//!     .expect("Failed to create Vulkan instance");
//! assert!(instance.api_version() >= ash::vk::API_VERSION_1_3);
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use raytracer_core::DebugLevel;
use tracing::{debug, error, info, trace, warn};

use crate::error::RhiError;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper.
///
/// Owns the loader entry, the instance and, when validation is active, the
/// debug messenger. Devices keep the instance alive through an `Arc`.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a Vulkan 1.3 instance.
    ///
    /// # Arguments
    ///
    /// * `application_name` - Name reported to the driver
    /// * `debug_level` - Validation verbosity; [`DebugLevel::None`] disables the layer
    /// * `surface_extensions` - Platform surface extensions required by the
    ///   windowing layer. Pass an empty slice for a headless instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded or instance
    /// creation fails.
    pub fn new(
        application_name: &CStr,
        debug_level: DebugLevel,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let validation_requested = debug_level.validation_enabled();
        let validation_available =
            validation_requested && Self::is_validation_layer_available(&entry)?;
        if validation_requested && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(application_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"raytracer")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = surface_extensions.to_vec();
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created (API 1.3, {} extension(s))",
            extensions.len()
        );

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils, debug_level)?;
            info!("Validation enabled, reporting {} and above", debug_level);
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Loader for `VK_KHR_surface` functions.
    #[inline]
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// API version the instance was created for.
    pub fn api_version(&self) -> u32 {
        vk::API_VERSION_1_3
    }

    fn is_validation_layer_available(entry: &Entry) -> Result<bool, RhiError> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });

        Ok(found)
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
        debug_level: DebugLevel,
    ) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(messenger_severity(debug_level))
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}

/// Message severities forwarded for a given debug level.
fn messenger_severity(level: DebugLevel) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

    match level {
        DebugLevel::None => Severity::empty(),
        DebugLevel::Errors => Severity::ERROR,
        DebugLevel::Warnings => Severity::ERROR | Severity::WARNING,
        DebugLevel::Verbose => Severity::ERROR | Severity::WARNING | Severity::INFO,
        DebugLevel::Debug => {
            Severity::ERROR | Severity::WARNING | Severity::INFO | Severity::VERBOSE
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[Vulkan {}] {}", type_str, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[Vulkan {}] {}", type_str, message),
        _ => trace!("[Vulkan {}] {}", type_str, message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_instance_creation() {
        // Requires a Vulkan loader; skipped otherwise
        match Instance::new(c"raytracer-test", DebugLevel::None, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) => eprintln!("Skipping test: Vulkan not available ({e})"),
        }
    }

    #[test]
    fn test_messenger_severity_grows_with_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

        assert!(messenger_severity(DebugLevel::None).is_empty());
        assert_eq!(messenger_severity(DebugLevel::Errors), Severity::ERROR);
        assert!(messenger_severity(DebugLevel::Warnings).contains(Severity::WARNING));
        assert!(!messenger_severity(DebugLevel::Warnings).contains(Severity::INFO));
        assert!(messenger_severity(DebugLevel::Debug).contains(Severity::VERBOSE));
    }
}
