//! Per-frame resources.
//!
//! Each slot has its own command buffer, fence and semaphores, plus the
//! transient allocations (deletion queue, descriptor pool) that are only
//! reclaimed once the slot's fence has signaled.

use std::sync::Arc;

use raytracer_rhi::RhiResult;
use raytracer_rhi::command::{CommandBuffer, CommandPool};
use raytracer_rhi::deletion_queue::DeletionQueue;
use raytracer_rhi::descriptor::DescriptorPool;
use raytracer_rhi::device::Device;
use raytracer_rhi::sync::{FRAME_TIMEOUT_NS, Fence, Semaphore};
use tracing::trace;

/// Descriptor sets a slot can hand out per cycle.
const SETS_PER_FRAME: u32 = 16;

/// Synchronization flow for one use of a slot:
///
/// ```text
/// 1. Wait on render_fence (previous use of this slot has retired)
/// 2. Flush deletion_queue, reset descriptor_pool
/// 3. Acquire swapchain image (signals image_acquired)
/// 4. Record into command_buffer
/// 5. Submit: wait image_acquired, signal render_complete + render_fence
/// 6. Present: wait render_complete
/// ```
pub struct FrameSlot {
    index: usize,
    // Buffer before pool: the buffer is freed with its pool.
    command_buffer: CommandBuffer,
    _command_pool: CommandPool,
    render_fence: Fence,
    image_acquired: Semaphore,
    render_complete: Semaphore,
    deletion_queue: DeletionQueue,
    descriptor_pool: DescriptorPool,
    reclaims: u64,
}

impl FrameSlot {
    pub fn new(device: Arc<Device>, index: usize, queue_family_index: u32) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), queue_family_index)?;
        let command_buffer = CommandBuffer::new(device.clone(), &command_pool)?;

        // Signaled so the first wait on this slot returns immediately
        let render_fence = Fence::new(device.clone(), true)?;
        let image_acquired = Semaphore::new(device.clone())?;
        let render_complete = Semaphore::new(device.clone())?;

        let descriptor_pool = DescriptorPool::new(
            device,
            SETS_PER_FRAME,
            &DescriptorPool::ray_query_sizes(SETS_PER_FRAME),
        )?;

        Ok(Self {
            index,
            command_buffer,
            _command_pool: command_pool,
            render_fence,
            image_acquired,
            render_complete,
            deletion_queue: DeletionQueue::new("frame"),
            descriptor_pool,
            reclaims: 0,
        })
    }

    /// Blocks until this slot's previous submission has retired.
    pub fn wait(&self) -> RhiResult<()> {
        self.render_fence.wait(FRAME_TIMEOUT_NS, "frame fence")
    }

    /// Releases the transient resources of the slot's previous cycle.
    ///
    /// Must only be called after [`FrameSlot::wait`].
    pub fn reclaim(&mut self) -> RhiResult<usize> {
        let flushed = self.deletion_queue.flush();
        self.descriptor_pool.reset()?;
        self.reclaims += 1;

        trace!(
            "Reclaimed slot {} ({} deferred action(s))",
            self.index, flushed
        );

        Ok(flushed)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn render_fence(&self) -> &Fence {
        &self.render_fence
    }

    #[inline]
    pub fn image_acquired(&self) -> &Semaphore {
        &self.image_acquired
    }

    #[inline]
    pub fn render_complete(&self) -> &Semaphore {
        &self.render_complete
    }

    #[inline]
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// Queue for resources that must live until this slot's current
    /// submission has retired.
    #[inline]
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }

    /// Number of times this slot has been reclaimed.
    #[inline]
    pub fn reclaims(&self) -> u64 {
        self.reclaims
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        // Deferred resources may reference the descriptor pool or pending
        // command buffer contents
        self.deletion_queue.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_slot_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameSlot>();
    }
}
