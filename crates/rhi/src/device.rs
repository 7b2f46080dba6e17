//! Vulkan logical device and queue management.
//!
//! This module handles VkDevice creation, queue retrieval, extension loaders
//! and gpu-allocator initialization.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_core::DebugLevel;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::instance::Instance;
//! use raytracer_rhi::physical_device::select_physical_device;
//!
//! let instance = Arc::new(Instance::new(c"Raytracer", DebugLevel::None, &[]).unwrap());
//! let info = select_physical_device(instance.handle(), None).unwrap();
//! let device = Device::new(instance, &info).unwrap();
//! assert!(device.present_queue().is_none());
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, required_device_extensions};

/// Logical device session.
///
/// Holds everything the rest of the renderer treats as read-only after
/// construction: queues, extension loaders and the memory allocator. The
/// instance is kept alive for as long as the device exists.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: Option<vk::Queue>,
    queue_families: QueueFamilyIndices,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    acceleration_structure_loader: ash::khr::acceleration_structure::Device,
    scratch_offset_alignment: u64,
    instance: Arc<Instance>,
}

impl Device {
    /// Creates the logical device for a selected GPU.
    ///
    /// Enables the ray query extensions on every device, and the swapchain
    /// extension plus a present queue when the GPU was selected against a
    /// surface.
    pub fn new(
        instance: Arc<Instance>,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = physical_device_info.queue_families;
        let graphics_family = queue_families
            .graphics_family
            .ok_or_else(|| RhiError::MissingCapability("graphics queue".to_string()))?;

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .buffer_device_address(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let mut acceleration_structure_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
                .acceleration_structure(true);

        let mut ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);

        let windowed = physical_device_info.windowed;
        let extensions = required_device_extensions(windowed);
        let extension_names: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3)
            .push_next(&mut acceleration_structure_features)
            .push_next(&mut ray_query_features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            extension_names.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("Graphics queue retrieved from family {}", graphics_family);

        let present_queue = queue_families.present_family.map(|family| {
            debug!("Present queue retrieved from family {}", family);
            unsafe { device.get_device_queue(family, 0) }
        });

        let swapchain_loader =
            windowed.then(|| ash::khr::swapchain::Device::new(instance.handle(), &device));
        let acceleration_structure_loader =
            ash::khr::acceleration_structure::Device::new(instance.handle(), &device);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized (buffer device address enabled)");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            swapchain_loader,
            acceleration_structure_loader,
            scratch_offset_alignment: physical_device_info.scratch_offset_alignment,
            instance,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue, `None` for a headless device.
    #[inline]
    pub fn present_queue(&self) -> Option<vk::Queue> {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// `VK_KHR_swapchain` loader, `None` for a headless device.
    #[inline]
    pub fn swapchain_loader(&self) -> Option<&ash::khr::swapchain::Device> {
        self.swapchain_loader.as_ref()
    }

    #[inline]
    pub fn acceleration_structure_loader(&self) -> &ash::khr::acceleration_structure::Device {
        &self.acceleration_structure_loader
    }

    /// Required alignment of acceleration structure scratch addresses.
    #[inline]
    pub fn scratch_offset_alignment(&self) -> u64 {
        self.scratch_offset_alignment
    }

    /// Locks the memory allocator.
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes currently handed out by the allocator.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocator().generate_report().total_allocated_bytes
    }

    /// Resolves the GPU virtual address of a buffer created with
    /// `SHADER_DEVICE_ADDRESS` usage.
    pub fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits work to the graphics queue.
    ///
    /// # Safety
    ///
    /// Every handle referenced by `submit_infos` must be valid and the command
    /// buffers must be in the executable state.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and the extension loaders are plain function tables,
// queue/physical-device handles are Copy, and the allocator sits behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
