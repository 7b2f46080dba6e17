//! Integration tests against a real, headless Vulkan device.
//!
//! Every test skips when no ray-query capable GPU is present.

use std::sync::Arc;

use raytracer_core::DebugLevel;
use raytracer_rhi::acceleration::{
    AccelerationStructureBuilder, BlasInstance, InstanceDesc, TriangleMesh,
};
use raytracer_rhi::buffer::{Buffer, BufferUsage};
use raytracer_rhi::deletion_queue::DeletionQueue;
use raytracer_rhi::device::Device;
use raytracer_rhi::immediate::ImmediateSubmitter;
use raytracer_rhi::instance::Instance;
use raytracer_rhi::physical_device::select_physical_device;
use raytracer_rhi::{RhiError, vk};

fn headless_device() -> Option<Arc<Device>> {
    let instance = match Instance::new(c"raytracer-tests", DebugLevel::None, &[]) {
        Ok(instance) => Arc::new(instance),
        Err(e) => {
            println!("Skipping test: no Vulkan instance ({e})");
            return None;
        }
    };

    let info = match select_physical_device(instance.handle(), None) {
        Ok(info) => info,
        Err(e) => {
            println!("Skipping test: no suitable GPU ({e})");
            return None;
        }
    };

    match Device::new(instance, &info) {
        Ok(device) => Some(device),
        Err(e) => {
            println!("Skipping test: device creation failed ({e})");
            None
        }
    }
}

#[test]
fn test_flushed_queue_returns_allocations() {
    let Some(device) = headless_device() else {
        return;
    };

    let baseline = device.allocated_bytes();
    let mut queue = DeletionQueue::new("test");

    for _ in 0..4 {
        let buffer = Buffer::new(device.clone(), BufferUsage::Scratch, 64 * 1024)
            .expect("Failed to create buffer");
        queue.defer_drop(buffer);
    }

    assert!(device.allocated_bytes() > baseline);
    assert_eq!(queue.flush(), 4);
    assert_eq!(device.allocated_bytes(), baseline);
    assert_eq!(queue.flush(), 0);
}

#[test]
fn test_immediate_submit_completes_copy() {
    let Some(device) = headless_device() else {
        return;
    };

    let mut immediate = ImmediateSubmitter::new(device.clone()).expect("immediate submitter");
    let payload: Vec<u8> = (0..=255).collect();

    let src = Buffer::new_with_data(device.clone(), BufferUsage::Staging, &payload)
        .expect("source buffer");
    let dst = Buffer::new(device.clone(), BufferUsage::GeometryInput, payload.len() as u64)
        .expect("destination buffer");

    immediate
        .submit(|cmd| {
            let region = vk::BufferCopy::default().size(payload.len() as u64);
            cmd.copy_buffer(src.handle(), dst.handle(), &[region]);
        })
        .expect("immediate submission failed");
    immediate.submit(|_| {}).expect("empty submission failed");

    assert_eq!(immediate.submissions(), 2);
}

#[test]
fn test_single_triangle_bottom_then_top_level() {
    let Some(device) = headless_device() else {
        return;
    };

    let mut immediate = ImmediateSubmitter::new(device.clone()).expect("immediate submitter");
    let mut builder = AccelerationStructureBuilder::new(device.clone());

    let blas = builder
        .build_bottom_level(&mut immediate, &TriangleMesh::single_triangle())
        .expect("BLAS build failed");
    assert_ne!(blas.device_address(), 0);
    assert_eq!(blas.triangle_count(), 1);

    let tlas = builder
        .build_top_level(
            &mut immediate,
            &[BlasInstance {
                blas: &blas,
                desc: InstanceDesc::default(),
            }],
        )
        .expect("TLAS build failed");

    assert_ne!(tlas.device_address(), 0);
    assert_eq!(tlas.instances().len(), 1);
    assert_eq!(tlas.instances()[0].blas_reference, blas.device_address());
    assert_eq!(tlas.instances()[0].mask(), 0xFF);
}

#[test]
fn test_top_level_before_bottom_level_fails() {
    let Some(device) = headless_device() else {
        return;
    };

    let mut immediate = ImmediateSubmitter::new(device.clone()).expect("immediate submitter");

    let mut scene_builder = AccelerationStructureBuilder::new(device.clone());
    let blas = scene_builder
        .build_bottom_level(&mut immediate, &TriangleMesh::single_triangle())
        .expect("BLAS build failed");
    assert_eq!(scene_builder.bottom_levels_built(), 1);

    // A valid instance list, but this builder has not built a BLAS yet
    let mut fresh_builder = AccelerationStructureBuilder::new(device);
    let result = fresh_builder.build_top_level(
        &mut immediate,
        &[BlasInstance {
            blas: &blas,
            desc: InstanceDesc::default(),
        }],
    );

    match result {
        Err(RhiError::AccelerationStructureError(msg)) => {
            assert!(msg.contains("before any bottom-level"), "{msg}");
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("TLAS built before any BLAS"),
    }
}
