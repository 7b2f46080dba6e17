//! GPU buffer management.
//!
//! Buffers are backed by gpu-allocator memory and released exactly once, in
//! `Drop`. Every usage that feeds an acceleration structure build is created
//! with `SHADER_DEVICE_ADDRESS` and resolves its device address up front.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_rhi::buffer::{Buffer, BufferUsage};
//! use raytracer_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
//! let vertices: [f32; 9] = [1.0, 1.0, 0.0, -1.0, 1.0, 0.0, 0.0, -1.0, 0.0];
//! let staging = Buffer::new_with_data(
//!     device,
//!     BufferUsage::Staging,
//!     bytemuck::cast_slice(&vertices),
//! )?;
//! assert!(staging.device_address().is_none());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// How a buffer will be used.
///
/// Each variant fixes the Vulkan usage flags and the memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Host-visible upload source, destroyed right after its copy.
    Staging,
    /// Device-local vertex or index data read by acceleration structure builds
    /// and by shaders.
    GeometryInput,
    /// Host-written build input (transform matrices, instance records).
    HostBuildInput,
    /// Backing storage of an acceleration structure.
    AccelerationStructureStorage,
    /// Transient build scratch memory.
    Scratch,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::GeometryInput => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::HostBuildInput => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferUsage::AccelerationStructureStorage => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferUsage::Scratch => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Staging | BufferUsage::HostBuildInput => MemoryLocation::CpuToGpu,
            BufferUsage::GeometryInput
            | BufferUsage::AccelerationStructureStorage
            | BufferUsage::Scratch => MemoryLocation::GpuOnly,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Staging => "staging",
            BufferUsage::GeometryInput => "geometry input",
            BufferUsage::HostBuildInput => "host build input",
            BufferUsage::AccelerationStructureStorage => "acceleration structure storage",
            BufferUsage::Scratch => "scratch",
        }
    }

    /// Whether buffers of this usage expose a device address.
    pub fn has_device_address(self) -> bool {
        self.to_vk_usage()
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
    }
}

/// Device-memory-backed buffer.
///
/// Host-visible buffers stay persistently mapped for their whole lifetime.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
    device_address: Option<vk::DeviceAddress>,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Rejects a zero size, and propagates Vulkan and allocator failures.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { device.handle().destroy_buffer(buffer, None) };
            if let Err(free_error) = device.allocator().free(allocation) {
                error!("Failed to free buffer allocation: {:?}", free_error);
            }
            return Err(e.into());
        }

        let device_address = usage
            .has_device_address()
            .then(|| device.buffer_device_address(buffer));

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            device_address,
        })
    }

    /// Creates a host-visible buffer and fills it with `data`.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation.mapped_ptr().ok_or_else(|| {
            RhiError::InvalidHandle(format!("{} buffer is not host visible", self.usage.name()))
        })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// GPU virtual address, for usages created with `SHADER_DEVICE_ADDRESS`.
    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            error!("Failed to free buffer allocation: {:?}", e);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}
