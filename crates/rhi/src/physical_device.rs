//! Physical device (GPU) selection.
//!
//! The renderer needs hardware ray queries, so selection is stricter than a
//! plain raster renderer:
//! 1. Enumerate all available GPUs
//! 2. Require a graphics queue (and a present queue when rendering to a surface)
//! 3. Require Vulkan 1.3, the acceleration structure / ray query extensions and
//!    the buffer device address feature
//! 4. Select the most suitable GPU (preferring discrete GPUs)

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Device extensions needed in every configuration.
pub const RAY_TRACING_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::deferred_host_operations::NAME,
    ash::khr::ray_query::NAME,
];

/// Returns the device extensions to enable.
///
/// `VK_KHR_swapchain` is only requested when presenting to a surface.
pub fn required_device_extensions(windowed: bool) -> Vec<&'static CStr> {
    let mut extensions = Vec::with_capacity(RAY_TRACING_EXTENSIONS.len() + 1);
    if windowed {
        extensions.push(ash::khr::swapchain::NAME);
    }
    extensions.extend(RAY_TRACING_EXTENSIONS);
    extensions
}

/// Surface to test presentation support against.
#[derive(Clone, Copy)]
pub struct SurfaceQuery<'a> {
    pub surface: vk::SurfaceKHR,
    pub loader: &'a ash::khr::surface::Instance,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Whether every queue family needed for the given mode was found.
    #[inline]
    pub fn is_complete(&self, windowed: bool) -> bool {
        self.graphics_family.is_some() && (!windowed || self.present_family.is_some())
    }

    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }
}

/// Feature bits the renderer depends on, as reported by the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupportedFeatures {
    pub buffer_device_address: bool,
    pub descriptor_indexing: bool,
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
    pub acceleration_structure: bool,
    pub ray_query: bool,
}

#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub features: SupportedFeatures,
    /// `minAccelerationStructureScratchOffsetAlignment`
    pub scratch_offset_alignment: u64,
    /// Whether the device was selected for presentation.
    pub windowed: bool,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .field("features", &self.features)
            .finish()
    }
}

/// Selects the best GPU able to run the ray query renderer.
///
/// Pass `None` for `surface` to select a device for headless work.
///
/// # Errors
///
/// * [`RhiError::NoSuitableGpu`] if no Vulkan device is present
/// * [`RhiError::MissingCapability`] if devices exist but none provides every
///   required capability
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<SurfaceQuery<'_>>,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable_devices: Vec<(PhysicalDeviceInfo, u32)> = Vec::new();
    let mut rejections: Vec<String> = Vec::new();

    for device in devices {
        match check_device_suitability(instance, device, surface) {
            Ok(info) => {
                let score = rate_device(&info);
                debug!(
                    "GPU '{}' ({}) - Score: {}",
                    info.device_name(),
                    info.device_type_name(),
                    score
                );
                suitable_devices.push((info, score));
            }
            Err(reason) => {
                debug!("{}", reason);
                rejections.push(reason);
            }
        }
    }

    if suitable_devices.is_empty() {
        warn!("No GPU provides the required ray tracing capabilities");
        return Err(RhiError::MissingCapability(rejections.join("; ")));
    }

    suitable_devices.sort_by(|a, b| b.1.cmp(&a.1));
    let (selected_device, score) = suitable_devices.remove(0);

    let (major, minor, patch) = selected_device.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected_device.device_name(),
        selected_device.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected_device)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceQuery<'_>>,
) -> Result<PhysicalDeviceInfo, String> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let windowed = surface.is_some();

    let device_name = properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown")
        .to_owned();

    let queue_families = find_queue_families(instance, device, surface);
    if !queue_families.is_complete(windowed) {
        return Err(format!(
            "GPU '{}' skipped: missing required queue families (graphics={}, present={})",
            device_name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        ));
    }

    if properties.api_version < vk::API_VERSION_1_3 {
        return Err(format!(
            "GPU '{}' skipped: Vulkan 1.3 not supported (version: {}.{})",
            device_name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        ));
    }

    let available_extensions = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .map_err(|e| format!("GPU '{}' skipped: {}", device_name, e))?
    };
    let available_names: Vec<&CStr> = available_extensions
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();

    let features = query_features(instance, device);

    let missing = missing_capabilities(&available_names, &features, windowed);
    if !missing.is_empty() {
        return Err(format!(
            "GPU '{}' skipped: missing {}",
            device_name,
            missing.join(", ")
        ));
    }

    Ok(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
        features,
        scratch_offset_alignment: query_scratch_alignment(instance, device),
        windowed,
    })
}

fn query_features(instance: &ash::Instance, device: vk::PhysicalDevice) -> SupportedFeatures {
    let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut acceleration_structure = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default();

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan12)
        .push_next(&mut vulkan13)
        .push_next(&mut acceleration_structure)
        .push_next(&mut ray_query);

    unsafe { instance.get_physical_device_features2(device, &mut features2) };

    SupportedFeatures {
        buffer_device_address: vulkan12.buffer_device_address == vk::TRUE,
        descriptor_indexing: vulkan12.descriptor_indexing == vk::TRUE,
        synchronization2: vulkan13.synchronization2 == vk::TRUE,
        dynamic_rendering: vulkan13.dynamic_rendering == vk::TRUE,
        acceleration_structure: acceleration_structure.acceleration_structure == vk::TRUE,
        ray_query: ray_query.ray_query == vk::TRUE,
    }
}

fn query_scratch_alignment(instance: &ash::Instance, device: vk::PhysicalDevice) -> u64 {
    let mut acceleration_properties =
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    let mut properties2 =
        vk::PhysicalDeviceProperties2::default().push_next(&mut acceleration_properties);

    unsafe { instance.get_physical_device_properties2(device, &mut properties2) };

    u64::from(
        acceleration_properties
            .min_acceleration_structure_scratch_offset_alignment
            .max(1),
    )
}

/// Lists every required extension or feature the device lacks.
pub fn missing_capabilities(
    available_extensions: &[&CStr],
    features: &SupportedFeatures,
    windowed: bool,
) -> Vec<String> {
    let mut missing: Vec<String> = required_device_extensions(windowed)
        .into_iter()
        .filter(|required| !available_extensions.contains(required))
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    let feature_checks = [
        (features.buffer_device_address, "bufferDeviceAddress"),
        (features.descriptor_indexing, "descriptorIndexing"),
        (features.synchronization2, "synchronization2"),
        (features.dynamic_rendering, "dynamicRendering"),
        (features.acceleration_structure, "accelerationStructure"),
        (features.ray_query, "rayQuery"),
    ];
    missing.extend(
        feature_checks
            .iter()
            .filter(|(supported, _)| !supported)
            .map(|(_, name)| (*name).to_owned()),
    );

    missing
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceQuery<'_>>,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        // Graphics queues also accept compute and transfer work
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics_family.is_none()
        {
            indices.graphics_family = Some(i);
        }

        if let Some(query) = surface
            && indices.present_family.is_none()
        {
            let present_support = unsafe {
                query
                    .loader
                    .get_physical_device_surface_support(device, i, query.surface)
                    .unwrap_or(false)
            };

            if present_support {
                indices.present_family = Some(i);
            }
        }
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = 0u32;

    match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 100,
        vk::PhysicalDeviceType::CPU => score += 10,
        _ => score += 1,
    }

    score += info.properties.limits.max_image_dimension2_d;

    // VRAM in MB, capped at 16GB contribution
    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    score
}
