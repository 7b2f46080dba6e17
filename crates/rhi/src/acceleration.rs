//! Two-level acceleration structure construction.
//!
//! A bottom-level structure (BLAS) indexes triangle geometry; a top-level
//! structure (TLAS) indexes instances, each pointing at a BLAS through its
//! device address. Both levels are built the same way:
//!
//! 1. Query the storage and scratch sizes for the geometry description
//! 2. Allocate the backing buffer and create the structure handle on it
//! 3. Allocate a scratch buffer scoped to this build
//! 4. Record the build through the immediate submitter and block on it
//! 5. Release the scratch buffer
//! 6. Resolve the structure's device address
//!
//! The GPU does not order a TLAS build after the BLAS builds it references.
//! [`AccelerationStructureBuilder::build_top_level`] only accepts structures
//! that have completed step 6 and refuses to run before any BLAS exists.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::{debug, info};

use crate::buffer::{Buffer, BufferUsage};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::immediate::ImmediateSubmitter;

/// Stride of a tightly packed `vec3` position.
const VERTEX_STRIDE: vk::DeviceSize = std::mem::size_of::<[f32; 3]>() as vk::DeviceSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelerationLevel {
    Bottom,
    Top,
}

impl AccelerationLevel {
    pub fn to_vk(self) -> vk::AccelerationStructureTypeKHR {
        match self {
            AccelerationLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            AccelerationLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccelerationLevel::Bottom => "bottom-level",
            AccelerationLevel::Top => "top-level",
        }
    }
}

/// A built acceleration structure and its backing storage.
pub struct AccelerationStructure {
    device: Arc<Device>,
    handle: vk::AccelerationStructureKHR,
    // Dropped after the handle is destroyed.
    buffer: Buffer,
    device_address: vk::DeviceAddress,
    level: AccelerationLevel,
}

impl AccelerationStructure {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn level(&self) -> AccelerationLevel {
        self.level
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.device
                .acceleration_structure_loader()
                .destroy_acceleration_structure(self.handle, None);
        }
        debug!("Destroyed {} acceleration structure", self.level.name());
    }
}

/// Device-local build scratch memory, valid for exactly one build.
pub struct ScratchBuffer {
    buffer: Buffer,
    device_address: vk::DeviceAddress,
}

impl ScratchBuffer {
    /// Allocates `size` usable bytes whose device address honours the
    /// device's scratch offset alignment.
    pub fn new(device: Arc<Device>, size: vk::DeviceSize) -> RhiResult<Self> {
        let alignment = device.scratch_offset_alignment();
        let buffer = Buffer::new(device, BufferUsage::Scratch, size + alignment)?;
        let base = buffer.device_address().ok_or_else(|| {
            RhiError::AccelerationStructureError("scratch buffer has no device address".into())
        })?;

        Ok(Self {
            buffer,
            device_address: align_up(base, alignment),
        })
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

/// Rounds `value` up to a multiple of `alignment` (a power of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Static indexed triangle geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
}

impl TriangleMesh {
    /// One triangle in the z = 0 plane.
    pub fn single_triangle() -> Self {
        Self {
            positions: vec![[1.0, 1.0, 0.0], [-1.0, 1.0, 0.0], [0.0, -1.0, 0.0]],
            indices: vec![0, 1, 2],
            transform: Mat4::IDENTITY,
        }
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// Checks the mesh describes at least one complete, in-range triangle.
    pub fn validate(&self) -> RhiResult<()> {
        if self.positions.is_empty() || self.indices.is_empty() {
            return Err(RhiError::AccelerationStructureError(
                "mesh has no geometry".into(),
            ));
        }
        if !self.indices.len().is_multiple_of(3) {
            return Err(RhiError::AccelerationStructureError(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&index| index as usize >= self.positions.len())
        {
            return Err(RhiError::AccelerationStructureError(format!(
                "index {} out of range for {} vertices",
                index,
                self.positions.len()
            )));
        }
        Ok(())
    }
}

/// Placement of one BLAS inside a TLAS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceDesc {
    pub transform: Mat4,
    /// Low 24 bits are visible to shaders as `gl_InstanceCustomIndexEXT`.
    pub custom_index: u32,
    pub mask: u8,
    pub sbt_record_offset: u32,
    pub flags: vk::GeometryInstanceFlagsKHR,
}

impl Default for InstanceDesc {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            custom_index: 0,
            mask: 0xFF,
            sbt_record_offset: 0,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
        }
    }
}

/// GPU layout of `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub transform: [[f32; 4]; 3],
    pub custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub blas_reference: u64,
}

impl InstanceRecord {
    pub fn new(blas_address: vk::DeviceAddress, desc: &InstanceDesc) -> Self {
        Self {
            transform: transform_rows(desc.transform),
            custom_index_and_mask: (u32::from(desc.mask) << 24) | (desc.custom_index & 0x00FF_FFFF),
            sbt_offset_and_flags: ((desc.flags.as_raw() & 0xFF) << 24)
                | (desc.sbt_record_offset & 0x00FF_FFFF),
            blas_reference: blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00FF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }
}

/// Top three rows of a column-major matrix, as Vulkan's 3x4 row-major transform.
pub fn transform_rows(matrix: Mat4) -> [[f32; 4]; 3] {
    [
        matrix.row(0).to_array(),
        matrix.row(1).to_array(),
        matrix.row(2).to_array(),
    ]
}

/// Packs instance records for a TLAS build.
///
/// # Errors
///
/// Fails if there are no instances or if any referenced BLAS has no resolved
/// device address yet.
pub fn pack_instances(
    instances: &[(vk::DeviceAddress, InstanceDesc)],
) -> RhiResult<Vec<InstanceRecord>> {
    if instances.is_empty() {
        return Err(RhiError::AccelerationStructureError(
            "top-level build needs at least one instance".into(),
        ));
    }

    instances
        .iter()
        .enumerate()
        .map(|(i, (address, desc))| {
            if *address == 0 {
                Err(RhiError::AccelerationStructureError(format!(
                    "instance {i} references a bottom-level structure that has not been built"
                )))
            } else {
                Ok(InstanceRecord::new(*address, desc))
            }
        })
        .collect()
}

/// Bottom-level structure together with the geometry it was built from.
///
/// The vertex and index buffers stay alive so shaders can fetch attributes.
pub struct BottomLevelAccelerationStructure {
    structure: AccelerationStructure,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    _transform_buffer: Buffer,
    triangle_count: u32,
}

impl BottomLevelAccelerationStructure {
    #[inline]
    pub fn structure(&self) -> &AccelerationStructure {
        &self.structure
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.structure.device_address()
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }
}

/// Top-level structure and its instance records.
pub struct TopLevelAccelerationStructure {
    structure: AccelerationStructure,
    _instance_buffer: Buffer,
    instances: Vec<InstanceRecord>,
}

impl TopLevelAccelerationStructure {
    #[inline]
    pub fn structure(&self) -> &AccelerationStructure {
        &self.structure
    }

    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.structure.handle()
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.structure.device_address()
    }

    /// Records the structure was built from, in instance order.
    #[inline]
    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }
}

/// One entry of a top-level build.
#[derive(Clone, Copy)]
pub struct BlasInstance<'a> {
    pub blas: &'a BottomLevelAccelerationStructure,
    pub desc: InstanceDesc,
}

/// Fails unless at least one bottom-level build has completed.
fn ensure_bottom_level_built(bottom_levels_built: usize) -> RhiResult<()> {
    if bottom_levels_built == 0 {
        return Err(RhiError::AccelerationStructureError(
            "top-level build requested before any bottom-level build".into(),
        ));
    }
    Ok(())
}

/// Builds BLAS and TLAS structures through blocking submissions.
///
/// One builder serves one scene: a TLAS build is only accepted once this
/// builder has completed a BLAS build, even if the instances passed in
/// reference structures built elsewhere.
pub struct AccelerationStructureBuilder {
    device: Arc<Device>,
    bottom_levels_built: usize,
}

impl AccelerationStructureBuilder {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            bottom_levels_built: 0,
        }
    }

    /// Number of BLAS builds that have completed.
    pub fn bottom_levels_built(&self) -> usize {
        self.bottom_levels_built
    }

    /// Uploads `mesh` to device-local memory and builds a BLAS over it.
    pub fn build_bottom_level(
        &mut self,
        immediate: &mut ImmediateSubmitter,
        mesh: &TriangleMesh,
    ) -> RhiResult<BottomLevelAccelerationStructure> {
        mesh.validate()?;

        let vertex_buffer = self.upload(immediate, bytemuck::cast_slice(&mesh.positions))?;
        let index_buffer = self.upload(immediate, bytemuck::cast_slice(&mesh.indices))?;
        let transform = [transform_rows(mesh.transform)];
        let transform_buffer = Buffer::new_with_data(
            self.device.clone(),
            BufferUsage::HostBuildInput,
            bytemuck::cast_slice(&transform),
        )?;

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: required_address(&vertex_buffer)?,
            })
            .vertex_stride(VERTEX_STRIDE)
            .max_vertex(mesh.positions.len() as u32 - 1)
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: required_address(&index_buffer)?,
            })
            .transform_data(vk::DeviceOrHostAddressConstKHR {
                device_address: required_address(&transform_buffer)?,
            });

        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE);

        let triangle_count = mesh.triangle_count();
        let structure = self.build(
            immediate,
            AccelerationLevel::Bottom,
            geometry,
            triangle_count,
        )?;
        self.bottom_levels_built += 1;

        Ok(BottomLevelAccelerationStructure {
            structure,
            vertex_buffer,
            index_buffer,
            _transform_buffer: transform_buffer,
            triangle_count,
        })
    }

    /// Builds a TLAS over already-built bottom-level structures.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::AccelerationStructureError`] when called before
    /// any BLAS has been built or with an empty instance list.
    pub fn build_top_level(
        &mut self,
        immediate: &mut ImmediateSubmitter,
        instances: &[BlasInstance<'_>],
    ) -> RhiResult<TopLevelAccelerationStructure> {
        ensure_bottom_level_built(self.bottom_levels_built)?;

        let entries: Vec<(vk::DeviceAddress, InstanceDesc)> = instances
            .iter()
            .map(|instance| (instance.blas.device_address(), instance.desc))
            .collect();
        let records = pack_instances(&entries)?;

        let instance_buffer = Buffer::new_with_data(
            self.device.clone(),
            BufferUsage::HostBuildInput,
            bytemuck::cast_slice(&records),
        )?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: required_address(&instance_buffer)?,
            });

        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .flags(vk::GeometryFlagsKHR::OPAQUE);

        let structure = self.build(
            immediate,
            AccelerationLevel::Top,
            geometry,
            records.len() as u32,
        )?;

        Ok(TopLevelAccelerationStructure {
            structure,
            _instance_buffer: instance_buffer,
            instances: records,
        })
    }

    fn build(
        &self,
        immediate: &mut ImmediateSubmitter,
        level: AccelerationLevel,
        geometry: vk::AccelerationStructureGeometryKHR<'_>,
        primitive_count: u32,
    ) -> RhiResult<AccelerationStructure> {
        let loader = self.device.acceleration_structure_loader();
        let geometries = [geometry];

        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(level.to_vk())
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let mut size_info = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
                &mut size_info,
            );
        }

        debug!(
            "{} build sizes: storage {} bytes, scratch {} bytes",
            level.name(),
            size_info.acceleration_structure_size,
            size_info.build_scratch_size
        );

        let buffer = Buffer::new(
            self.device.clone(),
            BufferUsage::AccelerationStructureStorage,
            size_info.acceleration_structure_size,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.handle())
            .size(size_info.acceleration_structure_size)
            .ty(level.to_vk());

        let handle = unsafe { loader.create_acceleration_structure(&create_info, None)? };

        let mut structure = AccelerationStructure {
            device: self.device.clone(),
            handle,
            buffer,
            device_address: 0,
            level,
        };

        let scratch = ScratchBuffer::new(self.device.clone(), size_info.build_scratch_size)?;

        build_info = build_info
            .dst_acceleration_structure(handle)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.device_address(),
            });

        let ranges =
            [vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count)];

        immediate.submit(|cmd| {
            unsafe {
                loader.cmd_build_acceleration_structures(
                    cmd.handle(),
                    std::slice::from_ref(&build_info),
                    &[&ranges],
                );
            }
            cmd.acceleration_structure_barrier();
        })?;

        // The blocking submit has returned; scratch memory is no longer read.
        drop(scratch);

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        structure.device_address =
            unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        info!(
            "Built {} acceleration structure: {} primitive(s), {} bytes, address {:#x}",
            level.name(),
            primitive_count,
            structure.size(),
            structure.device_address
        );

        Ok(structure)
    }

    /// Copies `data` into a new device-local geometry buffer through a
    /// short-lived staging buffer.
    fn upload(&self, immediate: &mut ImmediateSubmitter, data: &[u8]) -> RhiResult<Buffer> {
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, data)?;
        let destination = Buffer::new(
            self.device.clone(),
            BufferUsage::GeometryInput,
            data.len() as vk::DeviceSize,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as vk::DeviceSize,
        };
        immediate.submit(|cmd| cmd.copy_buffer(staging.handle(), destination.handle(), &[region]))?;

        Ok(destination)
    }
}

fn required_address(buffer: &Buffer) -> RhiResult<vk::DeviceAddress> {
    buffer.device_address().ok_or_else(|| {
        RhiError::AccelerationStructureError(format!(
            "{} buffer has no device address",
            buffer.usage().name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn test_instance_record_matches_vulkan_layout() {
        assert_eq!(
            std::mem::size_of::<InstanceRecord>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 64);
    }

    #[test]
    fn test_default_instance_packing() {
        let record = InstanceRecord::new(0xABCD_0000, &InstanceDesc::default());

        assert_eq!(record.mask(), 0xFF);
        assert_eq!(record.custom_index(), 0);
        assert_eq!(
            record.sbt_offset_and_flags >> 24,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(record.sbt_offset_and_flags & 0x00FF_FFFF, 0);
        assert_eq!(record.blas_reference, 0xABCD_0000);
        assert_eq!(record.transform, transform_rows(Mat4::IDENTITY));
    }

    #[test]
    fn test_custom_index_is_truncated_to_24_bits() {
        let desc = InstanceDesc {
            custom_index: 0x1234_5678,
            mask: 0x0F,
            ..InstanceDesc::default()
        };
        let record = InstanceRecord::new(1, &desc);
        assert_eq!(record.custom_index(), 0x0034_5678);
        assert_eq!(record.mask(), 0x0F);
    }

    #[test]
    fn test_transform_rows_carry_translation() {
        let rows = transform_rows(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn test_pack_instances_rejects_unbuilt_blas() {
        let result = pack_instances(&[(0, InstanceDesc::default())]);
        assert!(matches!(
            result,
            Err(RhiError::AccelerationStructureError(_))
        ));
    }

    #[test]
    fn test_top_level_requires_a_bottom_level_build() {
        let result = ensure_bottom_level_built(0);
        assert!(matches!(
            result,
            Err(RhiError::AccelerationStructureError(ref msg)) if msg.contains("before any bottom-level")
        ));

        assert!(ensure_bottom_level_built(1).is_ok());
        assert!(ensure_bottom_level_built(3).is_ok());
    }

    #[test]
    fn test_pack_instances_rejects_empty_list() {
        assert!(pack_instances(&[]).is_err());
    }

    #[test]
    fn test_pack_instances_references_exact_addresses() {
        let records = pack_instances(&[
            (0x1000, InstanceDesc::default()),
            (
                0x2000,
                InstanceDesc {
                    custom_index: 1,
                    ..InstanceDesc::default()
                },
            ),
        ])
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].blas_reference, 0x1000);
        assert_eq!(records[1].blas_reference, 0x2000);
        assert_eq!(records[1].custom_index(), 1);
    }

    #[test]
    fn test_single_triangle_mesh() {
        let mesh = TriangleMesh::single_triangle();
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.positions[2], [0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_mesh_validation() {
        let mut mesh = TriangleMesh::single_triangle();
        mesh.indices.push(0);
        assert!(mesh.validate().is_err());

        let mut mesh = TriangleMesh::single_triangle();
        mesh.indices[2] = 3;
        assert!(mesh.validate().is_err());

        let empty = TriangleMesh {
            positions: vec![],
            indices: vec![],
            transform: Mat4::IDENTITY,
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 128), 0);
        assert_eq!(align_up(1, 128), 128);
        assert_eq!(align_up(256, 128), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
