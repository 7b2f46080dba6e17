//! Compute pass that traces primary rays against the TLAS with ray queries.

use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use raytracer_rhi::RhiResult;
use raytracer_rhi::command::CommandBuffer;
use raytracer_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, DescriptorWriter, layout_binding,
};
use raytracer_rhi::device::Device;
use raytracer_rhi::pipeline::{ComputePipeline, PipelineLayout, dispatch_size};
use raytracer_rhi::shader::Shader;
use raytracer_rhi::vk;
use tracing::info;

/// Default location of the compiled ray query shader.
pub const RAYTRACE_SHADER_PATH: &str = "shaders/raytrace.comp.spv";

/// Must match `local_size_x`/`local_size_y` in the shader.
const WORKGROUP_SIZE: u32 = 16;

/// Push constant block read by the shader.
///
/// `extent` is the region traced this frame. The shader maps pixels to the
/// camera frustum against it, not against the full image.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct RayQueryPushConstants {
    pub inverse_view: Mat4,
    pub inverse_projection: Mat4,
    pub extent: [u32; 2],
    pub _padding: [u32; 2],
}

/// Camera looking at the triangle from the front.
#[derive(Clone, Copy, Debug)]
pub struct FixedCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub fov_y_radians: f32,
}

impl Default for FixedCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 2.5),
            target: Vec3::ZERO,
            fov_y_radians: 60.0_f32.to_radians(),
        }
    }
}

impl FixedCamera {
    pub fn push_constants(&self, extent: vk::Extent2D) -> RayQueryPushConstants {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };

        let view = Mat4::look_at_rh(self.position, self.target, Vec3::Y);
        let projection = Mat4::perspective_rh(self.fov_y_radians, aspect, 0.01, 100.0);

        RayQueryPushConstants {
            inverse_view: view.inverse(),
            inverse_projection: projection.inverse(),
            extent: [extent.width, extent.height],
            _padding: [0; 2],
        }
    }
}

/// Pipeline, layouts and camera for the ray query dispatch.
pub struct RayQueryPass {
    device: Arc<Device>,
    pipeline: ComputePipeline,
    pipeline_layout: PipelineLayout,
    set_layout: DescriptorSetLayout,
    camera: FixedCamera,
}

impl RayQueryPass {
    /// Loads the compute shader at `shader_path` and builds the pipeline.
    pub fn new(device: Arc<Device>, shader_path: &Path) -> RhiResult<Self> {
        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[
                layout_binding(
                    0,
                    vk::DescriptorType::STORAGE_IMAGE,
                    vk::ShaderStageFlags::COMPUTE,
                ),
                layout_binding(
                    1,
                    vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                    vk::ShaderStageFlags::COMPUTE,
                ),
            ],
        )?;

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: size_of::<RayQueryPushConstants>() as u32,
        };
        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[set_layout.handle()],
            &[push_constant_range],
        )?;

        let shader = Shader::compute_from_file(device.clone(), shader_path, "main")?;
        let pipeline = ComputePipeline::new(device.clone(), &shader, &pipeline_layout)?;

        info!("Ray query pass ready ({:?})", shader_path);

        Ok(Self {
            device,
            pipeline,
            pipeline_layout,
            set_layout,
            camera: FixedCamera::default(),
        })
    }

    /// Records the dispatch into `cmd`.
    ///
    /// `target` must be in `GENERAL` layout. The descriptor set comes from
    /// `pool`, which the owning frame slot resets once the GPU is done.
    pub fn record(
        &self,
        cmd: &CommandBuffer,
        pool: &DescriptorPool,
        target: vk::ImageView,
        extent: vk::Extent2D,
        tlas: vk::AccelerationStructureKHR,
    ) -> RhiResult<()> {
        let set = pool.allocate(&self.set_layout)?;
        let mut writer = DescriptorWriter::new();
        writer.storage_image(0, target).acceleration_structure(1, tlas);
        writer.update(&self.device, set);

        let push_constants = self.camera.push_constants(extent);
        let (groups_x, groups_y) = dispatch_size(extent, WORKGROUP_SIZE);

        cmd.bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.bind_descriptor_sets(
            self.pipeline.bind_point(),
            self.pipeline_layout.handle(),
            0,
            &[set],
        );
        cmd.push_constants(
            self.pipeline_layout.handle(),
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&push_constants),
        );
        cmd.dispatch(groups_x, groups_y, 1);

        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_fit_guaranteed_limit() {
        // 128 bytes is the minimum maxPushConstantsSize; the extent rides in
        // the 16 bytes after the matrices
        assert_eq!(size_of::<RayQueryPushConstants>(), 144);
        assert_eq!(std::mem::offset_of!(RayQueryPushConstants, extent), 128);
    }

    #[test]
    fn test_push_constant_extent_matches_dispatch() {
        let scaled = vk::Extent2D {
            width: 960,
            height: 540,
        };
        let constants = FixedCamera::default().push_constants(scaled);
        assert_eq!(constants.extent, [960, 540]);

        // Every invocation past the traced extent is discarded by the shader
        let (groups_x, groups_y) = dispatch_size(scaled, WORKGROUP_SIZE);
        assert_eq!((groups_x, groups_y), (60, 34));
        assert!(groups_x * WORKGROUP_SIZE >= constants.extent[0]);
        assert!(groups_y * WORKGROUP_SIZE >= constants.extent[1]);
    }

    #[test]
    fn test_inverse_view_recovers_camera_position() {
        let camera = FixedCamera::default();
        let constants = camera.push_constants(vk::Extent2D {
            width: 1920,
            height: 1080,
        });

        let origin = constants.inverse_view.transform_point3(Vec3::ZERO);
        assert!((origin - camera.position).length() < 1e-4);
    }

    #[test]
    fn test_zero_height_extent_does_not_divide_by_zero() {
        let constants = FixedCamera::default().push_constants(vk::Extent2D {
            width: 640,
            height: 0,
        });
        assert!(constants.inverse_projection.is_finite());
    }
}
