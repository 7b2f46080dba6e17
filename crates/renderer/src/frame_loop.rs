//! Double-buffered frame cycle.
//!
//! [`FrameScheduler`] owns the sequencing of one cycle and nothing else:
//!
//! ```text
//! wait slot fence -> reclaim slot -> acquire -> reset fence -> record
//!     -> submit -> present -> (rebuild swapchain) -> frame_number += 1
//! ```
//!
//! Everything that touches the GPU goes through [`FrameBackend`], so the
//! ordering rules can be exercised without a device.

use raytracer_rhi::swapchain::{AcquireOutcome, SurfaceStatus};
use raytracer_rhi::{RhiError, RhiResult};
use tracing::{debug, trace};

/// Number of frame slots cycled by the scheduler.
pub const FRAME_OVERLAP: usize = 2;

/// Lifecycle of one frame slot as seen from the CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence observed signaled; safe to reuse.
    Idle,
    /// Command buffer open for recording.
    Recording,
    /// Handed to the GPU; must be waited on before reuse.
    Submitted,
}

/// GPU-side operations the scheduler sequences.
///
/// Implementations own the slots' fences, semaphores and command buffers,
/// the swapchain, and the current window geometry used for rebuilds.
pub trait FrameBackend {
    /// Blocks until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Flushes the slot's per-frame deletion queue and resets its
    /// descriptor pool.
    fn reclaim_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Requests the next presentable image, signaling the slot's
    /// image-acquired semaphore.
    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()>;

    /// Resets and begins the slot's command buffer, leaving the render
    /// target ready for caller work.
    fn begin_recording(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    /// Copies the render target to the swapchain image and ends recording.
    fn finish_recording(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    fn submit(&mut self, slot: usize) -> RhiResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<SurfaceStatus>;

    /// Waits for device idle, tears down the swapchain and builds a new one.
    ///
    /// Returns `false` when the surface has zero area and nothing was
    /// rebuilt; the scheduler then keeps the rebuild pending.
    fn rebuild_surface(&mut self) -> RhiResult<bool>;
}

/// Proof that a cycle is between [`FrameScheduler::begin_frame`] and
/// [`FrameScheduler::end_frame`].
#[derive(Debug, PartialEq, Eq)]
pub struct FrameTicket {
    slot: usize,
    image_index: u32,
    frame_number: u64,
}

impl FrameTicket {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// Drives the acquire, record, submit and present cycle over
/// [`FRAME_OVERLAP`] slots.
#[derive(Debug)]
pub struct FrameScheduler {
    frame_number: u64,
    rebuild_required: bool,
    rebuild_count: u64,
    slots: [SlotState; FRAME_OVERLAP],
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            frame_number: 0,
            rebuild_required: false,
            rebuild_count: 0,
            slots: [SlotState::Idle; FRAME_OVERLAP],
        }
    }

    /// Slot used by the next (or current) cycle.
    pub fn current_slot(&self) -> usize {
        (self.frame_number % FRAME_OVERLAP as u64) as usize
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_required
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// Starts a cycle on the current slot.
    ///
    /// A surface condition reported by acquire, or `surface_invalidated`,
    /// schedules a rebuild for the end of the cycle. When acquire reports
    /// out-of-date there is no image to draw into: the rebuild runs right
    /// away, the frame counter advances and `None` is returned.
    ///
    /// # Errors
    ///
    /// Fails when a cycle is already open, and propagates backend errors
    /// (a fence timeout included).
    pub fn begin_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        surface_invalidated: bool,
    ) -> RhiResult<Option<FrameTicket>> {
        let slot = self.current_slot();
        if self.slots[slot] == SlotState::Recording {
            return Err(RhiError::FrameSequence(format!(
                "frame {} is already recording on slot {slot}",
                self.frame_number
            )));
        }

        backend.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Idle;
        backend.reclaim_slot(slot)?;

        let outcome = backend.acquire_image(slot)?;
        if outcome.status().needs_rebuild() || surface_invalidated {
            if !self.rebuild_required {
                debug!(
                    "Swapchain rebuild scheduled on frame {} ({:?})",
                    self.frame_number,
                    outcome.status()
                );
            }
            self.rebuild_required = true;
        }

        match outcome {
            AcquireOutcome::OutOfDate => {
                self.finish_cycle(backend)?;
                Ok(None)
            }
            AcquireOutcome::Acquired { image_index, .. } => {
                // Only reset once a submission that signals it is certain
                backend.reset_slot_fence(slot)?;
                backend.begin_recording(slot, image_index)?;
                self.slots[slot] = SlotState::Recording;

                trace!(
                    "Frame {} recording on slot {slot}, image {image_index}",
                    self.frame_number
                );

                Ok(Some(FrameTicket {
                    slot,
                    image_index,
                    frame_number: self.frame_number,
                }))
            }
        }
    }

    /// Finishes, submits and presents the cycle opened by `ticket`.
    ///
    /// # Errors
    ///
    /// Fails when `ticket` does not belong to the open cycle, and
    /// propagates backend errors.
    pub fn end_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        ticket: FrameTicket,
        surface_invalidated: bool,
    ) -> RhiResult<SurfaceStatus> {
        let FrameTicket {
            slot,
            image_index,
            frame_number,
        } = ticket;

        if frame_number != self.frame_number || self.slots[slot] != SlotState::Recording {
            return Err(RhiError::FrameSequence(format!(
                "ticket for frame {frame_number} does not match open frame {}",
                self.frame_number
            )));
        }

        backend.finish_recording(slot, image_index)?;
        backend.submit(slot)?;
        self.slots[slot] = SlotState::Submitted;

        let status = backend.present(slot, image_index)?;
        if status.needs_rebuild() || surface_invalidated {
            self.rebuild_required = true;
        }

        self.finish_cycle(backend)?;
        Ok(status)
    }

    fn finish_cycle<B: FrameBackend>(&mut self, backend: &mut B) -> RhiResult<()> {
        if self.rebuild_required {
            if backend.rebuild_surface()? {
                self.rebuild_required = false;
                self.rebuild_count += 1;
                debug!(
                    "Swapchain rebuilt after frame {} ({} total)",
                    self.frame_number, self.rebuild_count
                );
            } else {
                debug!(
                    "Swapchain rebuild deferred after frame {}: surface has zero area",
                    self.frame_number
                );
            }
        }

        self.frame_number += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        calls: Vec<&'static str>,
        next_acquire: Option<AcquireOutcome>,
        next_present: Option<SurfaceStatus>,
        minimized: bool,
    }

    impl FrameBackend for CountingBackend {
        fn wait_for_slot(&mut self, _slot: usize) -> RhiResult<()> {
            self.calls.push("wait");
            Ok(())
        }

        fn reclaim_slot(&mut self, _slot: usize) -> RhiResult<()> {
            self.calls.push("reclaim");
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> RhiResult<AcquireOutcome> {
            self.calls.push("acquire");
            Ok(self.next_acquire.take().unwrap_or(AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: false,
            }))
        }

        fn reset_slot_fence(&mut self, _slot: usize) -> RhiResult<()> {
            self.calls.push("reset");
            Ok(())
        }

        fn begin_recording(&mut self, _slot: usize, _image_index: u32) -> RhiResult<()> {
            self.calls.push("begin");
            Ok(())
        }

        fn finish_recording(&mut self, _slot: usize, _image_index: u32) -> RhiResult<()> {
            self.calls.push("finish");
            Ok(())
        }

        fn submit(&mut self, _slot: usize) -> RhiResult<()> {
            self.calls.push("submit");
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> RhiResult<SurfaceStatus> {
            self.calls.push("present");
            Ok(self.next_present.take().unwrap_or(SurfaceStatus::Optimal))
        }

        fn rebuild_surface(&mut self) -> RhiResult<bool> {
            self.calls.push("rebuild");
            Ok(!self.minimized)
        }
    }

    #[test]
    fn test_cycle_order() {
        let mut backend = CountingBackend::default();
        let mut scheduler = FrameScheduler::new();

        let ticket = scheduler
            .begin_frame(&mut backend, false)
            .unwrap()
            .expect("image acquired");
        assert_eq!(scheduler.slot_state(0), SlotState::Recording);

        scheduler.end_frame(&mut backend, ticket, false).unwrap();

        assert_eq!(
            backend.calls,
            [
                "wait", "reclaim", "acquire", "reset", "begin", "finish", "submit", "present"
            ]
        );
        assert_eq!(scheduler.slot_state(0), SlotState::Submitted);
        assert_eq!(scheduler.frame_number(), 1);
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn test_out_of_date_acquire_skips_fence_reset() {
        let mut backend = CountingBackend {
            next_acquire: Some(AcquireOutcome::OutOfDate),
            ..Default::default()
        };
        let mut scheduler = FrameScheduler::new();

        assert!(scheduler.begin_frame(&mut backend, false).unwrap().is_none());
        assert_eq!(backend.calls, ["wait", "reclaim", "acquire", "rebuild"]);
        assert_eq!(scheduler.frame_number(), 1);
        assert_eq!(scheduler.rebuild_count(), 1);
        assert_eq!(scheduler.slot_state(0), SlotState::Idle);
    }

    #[test]
    fn test_suboptimal_acquire_finishes_cycle_then_rebuilds() {
        let mut backend = CountingBackend {
            next_acquire: Some(AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: true,
            }),
            ..Default::default()
        };
        let mut scheduler = FrameScheduler::new();

        let ticket = scheduler.begin_frame(&mut backend, false).unwrap().unwrap();
        assert_eq!(ticket.image_index(), 2);
        assert!(scheduler.rebuild_pending());

        scheduler.end_frame(&mut backend, ticket, false).unwrap();
        assert_eq!(backend.calls.last(), Some(&"rebuild"));
        assert!(!scheduler.rebuild_pending());
    }

    #[test]
    fn test_invalidated_window_triggers_rebuild() {
        let mut backend = CountingBackend::default();
        let mut scheduler = FrameScheduler::new();

        let ticket = scheduler.begin_frame(&mut backend, true).unwrap().unwrap();
        scheduler.end_frame(&mut backend, ticket, false).unwrap();

        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn test_present_out_of_date_triggers_rebuild() {
        let mut backend = CountingBackend {
            next_present: Some(SurfaceStatus::OutOfDate),
            ..Default::default()
        };
        let mut scheduler = FrameScheduler::new();

        let ticket = scheduler.begin_frame(&mut backend, false).unwrap().unwrap();
        let status = scheduler.end_frame(&mut backend, ticket, false).unwrap();

        assert_eq!(status, SurfaceStatus::OutOfDate);
        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn test_rebuild_stays_pending_while_minimized() {
        let mut backend = CountingBackend {
            next_present: Some(SurfaceStatus::OutOfDate),
            minimized: true,
            ..Default::default()
        };
        let mut scheduler = FrameScheduler::new();

        let ticket = scheduler.begin_frame(&mut backend, false).unwrap().unwrap();
        scheduler.end_frame(&mut backend, ticket, false).unwrap();

        assert_eq!(backend.calls.last(), Some(&"rebuild"));
        assert_eq!(scheduler.rebuild_count(), 0);
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.frame_number(), 1);

        backend.minimized = false;
        let ticket = scheduler.begin_frame(&mut backend, false).unwrap().unwrap();
        scheduler.end_frame(&mut backend, ticket, false).unwrap();

        assert_eq!(scheduler.rebuild_count(), 1);
        assert!(!scheduler.rebuild_pending());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut backend = CountingBackend::default();
        let mut scheduler = FrameScheduler::new();

        let _ticket = scheduler.begin_frame(&mut backend, false).unwrap().unwrap();
        let result = scheduler.begin_frame(&mut backend, false);

        assert!(matches!(result, Err(RhiError::FrameSequence(_))));
    }

    #[test]
    fn test_stale_ticket_is_rejected() {
        let mut backend = CountingBackend::default();
        let mut scheduler = FrameScheduler::new();

        let stale = FrameTicket {
            slot: 0,
            image_index: 0,
            frame_number: 7,
        };
        let result = scheduler.end_frame(&mut backend, stale, false);

        assert!(matches!(result, Err(RhiError::FrameSequence(_))));
        assert!(backend.calls.is_empty());
    }
}
