//! The acceleration structures traced by the ray query pass.

use std::sync::Arc;

use raytracer_rhi::RhiResult;
use raytracer_rhi::acceleration::{
    AccelerationStructureBuilder, BlasInstance, BottomLevelAccelerationStructure, InstanceDesc,
    TopLevelAccelerationStructure, TriangleMesh,
};
use raytracer_rhi::device::Device;
use raytracer_rhi::immediate::ImmediateSubmitter;
use raytracer_rhi::vk;
use tracing::info;

/// One triangle BLAS instanced once by a TLAS.
pub struct RaytracingScene {
    // Top level first: it references the bottom level's address
    tlas: TopLevelAccelerationStructure,
    blas: BottomLevelAccelerationStructure,
}

impl RaytracingScene {
    /// Builds the bottom level, then the top level over it. Both builds
    /// block on `immediate`.
    pub fn new(device: Arc<Device>, immediate: &mut ImmediateSubmitter) -> RhiResult<Self> {
        let mut builder = AccelerationStructureBuilder::new(device);

        let blas = builder.build_bottom_level(immediate, &TriangleMesh::single_triangle())?;
        let tlas = builder.build_top_level(
            immediate,
            &[BlasInstance {
                blas: &blas,
                desc: InstanceDesc::default(),
            }],
        )?;

        info!(
            "Ray tracing scene ready: BLAS 0x{:X} ({} triangle(s)), TLAS 0x{:X}",
            blas.device_address(),
            blas.triangle_count(),
            tlas.device_address()
        );

        Ok(Self { tlas, blas })
    }

    #[inline]
    pub fn tlas(&self) -> &TopLevelAccelerationStructure {
        &self.tlas
    }

    #[inline]
    pub fn blas(&self) -> &BottomLevelAccelerationStructure {
        &self.blas
    }

    #[inline]
    pub fn tlas_handle(&self) -> vk::AccelerationStructureKHR {
        self.tlas.handle()
    }
}
