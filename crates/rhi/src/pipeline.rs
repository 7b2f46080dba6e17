//! Pipeline layouts and compute pipelines.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Vulkan pipeline layout wrapper.
///
/// Describes the descriptor set layouts and push constant ranges a pipeline
/// can access.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a new pipeline layout.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Compute pipeline wrapper.
pub struct ComputePipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl ComputePipeline {
    /// Creates a compute pipeline from a single compute shader.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if `shader` is not a compute
    /// shader or the driver rejects the pipeline.
    pub fn new(device: Arc<Device>, shader: &Shader, layout: &PipelineLayout) -> RhiResult<Self> {
        if shader.stage() != vk::ShaderStageFlags::COMPUTE {
            return Err(RhiError::PipelineError(format!(
                "Compute pipeline needs a compute shader, got {:?}",
                shader.stage()
            )));
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_create_info())
            .layout(layout.handle());

        let pipeline = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| {
                    RhiError::PipelineError(format!("Compute pipeline creation failed: {result}"))
                })?[0]
        };

        info!("Compute pipeline created");

        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::COMPUTE
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        info!("Compute pipeline destroyed");
    }
}

/// Number of workgroups needed to cover `extent` with square groups of
/// `group_size` invocations per side.
pub fn dispatch_size(extent: vk::Extent2D, group_size: u32) -> (u32, u32) {
    (
        extent.width.div_ceil(group_size),
        extent.height.div_ceil(group_size),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_size_rounds_up() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1081,
        };
        assert_eq!(dispatch_size(extent, 16), (120, 68));
    }

    #[test]
    fn test_dispatch_size_exact_and_tiny() {
        let exact = vk::Extent2D {
            width: 32,
            height: 16,
        };
        assert_eq!(dispatch_size(exact, 16), (2, 1));

        let tiny = vk::Extent2D {
            width: 1,
            height: 1,
        };
        assert_eq!(dispatch_size(tiny, 16), (1, 1));
    }
}
