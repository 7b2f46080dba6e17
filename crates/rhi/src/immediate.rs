//! Blocking one-off command submission.
//!
//! Uploads and acceleration structure builds run outside the frame cadence on
//! a dedicated command buffer. [`ImmediateSubmitter::submit`] takes `&mut self`,
//! so two submissions can never overlap on the shared command buffer.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, trace};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::{Fence, IMMEDIATE_TIMEOUT_NS};

/// Dedicated command pool, command buffer and fence for synchronous GPU work.
pub struct ImmediateSubmitter {
    device: Arc<Device>,
    // Buffer before pool: the buffer is freed with its pool.
    command_buffer: CommandBuffer,
    _pool: CommandPool,
    fence: Fence,
    submissions: u64,
}

impl ImmediateSubmitter {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let queue_family = device
            .queue_families()
            .graphics_family
            .ok_or_else(|| RhiError::MissingCapability("graphics queue".to_string()))?;

        let pool = CommandPool::new_transient(device.clone(), queue_family)?;
        let command_buffer = CommandBuffer::new(device.clone(), &pool)?;
        let fence = Fence::new(device.clone(), true)?;

        debug!("Immediate submitter created");

        Ok(Self {
            device,
            command_buffer,
            _pool: pool,
            fence,
            submissions: 0,
        })
    }

    /// Records `work`, submits it to the graphics queue and blocks until the
    /// GPU has finished it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if the work does not complete within
    /// [`IMMEDIATE_TIMEOUT_NS`], and propagates any recording or submission
    /// failure.
    pub fn submit<F>(&mut self, work: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        self.fence.reset()?;
        self.command_buffer.reset()?;

        self.command_buffer.begin()?;
        work(&self.command_buffer);
        self.command_buffer.end()?;

        let command_buffers = [self.command_buffer.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            self.device
                .submit_graphics(&[submit_info], self.fence.handle())?;
        }

        self.fence.wait(IMMEDIATE_TIMEOUT_NS, "immediate submission")?;
        self.submissions += 1;

        trace!("Immediate submission {} complete", self.submissions);

        Ok(())
    }

    /// Number of completed submissions.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}
