//! Descriptor set layouts, per-frame pools and binding writes.
//!
//! - [`DescriptorSetLayout`] describes the bindings a pipeline expects
//! - [`DescriptorPool`] hands out sets and is reset wholesale once the frame
//!   that used them has retired
//! - [`DescriptorWriter`] collects image and acceleration structure bindings
//!   and writes them into a set in one call
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::descriptor::{layout_binding, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
//!
//! # fn example(device: Arc<Device>, view: vk::ImageView, tlas: vk::AccelerationStructureKHR)
//! #     -> Result<(), raytracer_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[
//!         layout_binding(0, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE),
//!         layout_binding(1, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, vk::ShaderStageFlags::COMPUTE),
//!     ],
//! )?;
//!
//! let pool = DescriptorPool::new(device.clone(), 16, &DescriptorPool::ray_query_sizes(16))?;
//! let set = pool.allocate(&layout)?;
//!
//! let mut writer = DescriptorWriter::new();
//! writer.storage_image(0, view).acceleration_structure(1, tlas);
//! writer.update(&device, set);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::device::Device;
use crate::error::RhiResult;

/// Shorthand for a single-descriptor layout binding.
pub fn layout_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Pool of descriptor sets owned by a single frame slot.
///
/// Sets are never freed individually. The owning slot calls
/// [`DescriptorPool::reset`] after its fence has signaled, which returns
/// every set at once.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Pool sizes for `sets` ray query sets (one storage image and one
    /// acceleration structure each).
    pub fn ray_query_sizes(sets: u32) -> [vk::DescriptorPoolSize; 2] {
        [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(sets),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(sets),
        ]
    }

    /// Allocates one descriptor set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        trace!("Allocated descriptor set");

        Ok(sets[0])
    }

    /// Returns every allocated set to the pool.
    ///
    /// The caller must ensure no set from this pool is still in use by the
    /// GPU.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }

        trace!("Reset descriptor pool");

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Accumulates descriptor bindings and writes them into a set.
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    images: Vec<(u32, vk::DescriptorType, vk::DescriptorImageInfo)>,
    acceleration_structures: Vec<(u32, vk::AccelerationStructureKHR)>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `view` as a storage image in `GENERAL` layout.
    pub fn storage_image(&mut self, binding: u32, view: vk::ImageView) -> &mut Self {
        let info = vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL);
        self.images
            .push((binding, vk::DescriptorType::STORAGE_IMAGE, info));
        self
    }

    pub fn acceleration_structure(
        &mut self,
        binding: u32,
        handle: vk::AccelerationStructureKHR,
    ) -> &mut Self {
        self.acceleration_structures.push((binding, handle));
        self
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.acceleration_structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.acceleration_structures.clear();
    }

    /// Writes every collected binding into `set`.
    pub fn update(&self, device: &Device, set: vk::DescriptorSet) {
        if self.is_empty() {
            return;
        }

        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> =
            self.images.iter().map(|(_, _, info)| [*info]).collect();
        let handles: Vec<[vk::AccelerationStructureKHR; 1]> = self
            .acceleration_structures
            .iter()
            .map(|(_, handle)| [*handle])
            .collect();
        let mut acceleration_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> = handles
            .iter()
            .map(|handle| {
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(handle)
            })
            .collect();

        let mut writes = Vec::with_capacity(self.len());
        for ((binding, ty, _), info) in self.images.iter().zip(&image_infos) {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(info),
            );
        }
        for ((binding, _), info) in self
            .acceleration_structures
            .iter()
            .zip(acceleration_infos.iter_mut())
        {
            // The count is not derived from the extension struct
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                    .descriptor_count(1)
                    .push_next(info),
            );
        }

        unsafe {
            device.handle().update_descriptor_sets(&writes, &[]);
        }

        trace!("Updated descriptor set with {} write(s)", writes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_binding_single_descriptor() {
        let binding = layout_binding(
            1,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            vk::ShaderStageFlags::COMPUTE,
        );
        assert_eq!(binding.binding, 1);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_ray_query_sizes() {
        let sizes = DescriptorPool::ray_query_sizes(8);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[1].ty, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert!(sizes.iter().all(|s| s.descriptor_count == 8));
    }

    #[test]
    fn test_writer_collects_and_clears() {
        let mut writer = DescriptorWriter::new();
        assert!(writer.is_empty());

        writer
            .storage_image(0, vk::ImageView::null())
            .acceleration_structure(1, vk::AccelerationStructureKHR::null());
        assert_eq!(writer.len(), 2);
        assert_eq!(writer.images[0].2.image_layout, vk::ImageLayout::GENERAL);

        writer.clear();
        assert!(writer.is_empty());
    }
}
