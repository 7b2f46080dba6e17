//! Frame cycle scenarios driven against a recording backend.

use std::collections::VecDeque;

use raytracer_renderer::{FRAME_OVERLAP, FrameBackend, FrameScheduler, SlotState};
use raytracer_rhi::RhiResult;
use raytracer_rhi::swapchain::{AcquireOutcome, SurfaceStatus};
use raytracer_rhi::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Reclaim(usize),
    Acquire(usize),
    ResetFence(usize),
    Begin(usize),
    Finish(usize),
    Submit(usize),
    Present(usize, vk::Extent2D),
    WaitIdle,
    Rebuild,
    RebuildDeferred,
}

/// Models each slot's fence and GPU work, and records every backend call.
///
/// A submission stays in flight until the slot's fence is waited on (or the
/// device idles). Reclaiming or recording a slot whose work is still in
/// flight panics, as does waiting on a fence nothing will signal.
struct RecordingBackend {
    calls: Vec<Call>,
    fence_signaled: [bool; FRAME_OVERLAP],
    in_flight: [bool; FRAME_OVERLAP],
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<SurfaceStatus>,
    extent: vk::Extent2D,
    window_extent: vk::Extent2D,
    next_image: u32,
}

impl RecordingBackend {
    fn new(width: u32, height: u32) -> Self {
        let extent = vk::Extent2D { width, height };
        Self {
            calls: Vec::new(),
            fence_signaled: [true; FRAME_OVERLAP],
            in_flight: [false; FRAME_OVERLAP],
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            extent,
            window_extent: extent,
            next_image: 0,
        }
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    fn position(&self, call: Call) -> Option<usize> {
        self.calls.iter().position(|c| *c == call)
    }
}

impl FrameBackend for RecordingBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        assert!(
            self.fence_signaled[slot] || self.in_flight[slot],
            "slot {slot} waits on a reset fence with no pending submission"
        );
        // The submission completes while the CPU blocks
        if self.in_flight[slot] {
            self.in_flight[slot] = false;
            self.fence_signaled[slot] = true;
        }
        self.calls.push(Call::Wait(slot));
        Ok(())
    }

    fn reclaim_slot(&mut self, slot: usize) -> RhiResult<()> {
        assert!(
            !self.in_flight[slot] && self.fence_signaled[slot],
            "slot {slot} reclaimed while in flight"
        );
        self.calls.push(Call::Reclaim(slot));
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        let outcome = self
            .acquire_script
            .pop_front()
            .unwrap_or(AcquireOutcome::Acquired {
                image_index: self.next_image,
                suboptimal: false,
            });
        self.next_image = (self.next_image + 1) % 3;
        Ok(outcome)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.fence_signaled[slot] = false;
        self.calls.push(Call::ResetFence(slot));
        Ok(())
    }

    fn begin_recording(&mut self, slot: usize, _image_index: u32) -> RhiResult<()> {
        assert!(
            !self.in_flight[slot],
            "slot {slot} recorded while its previous submission is in flight"
        );
        self.calls.push(Call::Begin(slot));
        Ok(())
    }

    fn finish_recording(&mut self, slot: usize, _image_index: u32) -> RhiResult<()> {
        self.calls.push(Call::Finish(slot));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        assert!(!self.in_flight[slot], "slot {slot} submitted twice");
        self.fence_signaled[slot] = false;
        self.in_flight[slot] = true;
        self.calls.push(Call::Submit(slot));
        Ok(())
    }

    fn present(&mut self, slot: usize, _image_index: u32) -> RhiResult<SurfaceStatus> {
        self.calls.push(Call::Present(slot, self.extent));
        Ok(self.present_script.pop_front().unwrap_or(SurfaceStatus::Optimal))
    }

    fn rebuild_surface(&mut self) -> RhiResult<bool> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            self.calls.push(Call::RebuildDeferred);
            return Ok(false);
        }

        self.calls.push(Call::WaitIdle);
        for slot in 0..FRAME_OVERLAP {
            if self.in_flight[slot] {
                self.in_flight[slot] = false;
                self.fence_signaled[slot] = true;
            }
        }
        self.calls.push(Call::Rebuild);
        self.extent = self.window_extent;
        Ok(true)
    }
}

fn run_cycle(scheduler: &mut FrameScheduler, backend: &mut RecordingBackend) -> bool {
    match scheduler.begin_frame(backend, false).unwrap() {
        Some(ticket) => {
            scheduler.end_frame(backend, ticket, false).unwrap();
            true
        }
        None => false,
    }
}

#[test]
fn test_five_cycles_without_resize() {
    let mut backend = RecordingBackend::new(1920, 1080);
    let mut scheduler = FrameScheduler::new();

    let mut slots = Vec::new();
    for _ in 0..5 {
        slots.push(scheduler.current_slot());
        assert!(run_cycle(&mut scheduler, &mut backend));
    }

    assert_eq!(slots, [0, 1, 0, 1, 0]);
    assert_eq!(scheduler.frame_number(), 5);
    assert_eq!(scheduler.rebuild_count(), 0);
    assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 5);
    assert_eq!(backend.count(|c| *c == Call::Rebuild), 0);

    // One reclaim per cycle, on the slot that cycle used
    assert_eq!(backend.count(|c| *c == Call::Reclaim(0)), 3);
    assert_eq!(backend.count(|c| *c == Call::Reclaim(1)), 2);
}

#[test]
fn test_slot_fence_waited_before_reuse() {
    let mut backend = RecordingBackend::new(1920, 1080);
    let mut scheduler = FrameScheduler::new();

    for _ in 0..4 {
        run_cycle(&mut scheduler, &mut backend);
    }

    // For every begin on a slot, the latest preceding wait is on that slot
    // and there is no reset between the wait and the reclaim.
    for (index, call) in backend.calls.iter().enumerate() {
        if let Call::Begin(slot) = *call {
            let wait = backend.calls[..index]
                .iter()
                .rposition(|c| *c == Call::Wait(slot))
                .expect("begin without a prior wait");
            let reset = backend.calls[..index]
                .iter()
                .rposition(|c| *c == Call::ResetFence(slot))
                .expect("begin without a fence reset");
            assert!(wait < reset);
        }
    }

    assert_eq!(scheduler.slot_state(0), SlotState::Submitted);
    assert_eq!(scheduler.slot_state(1), SlotState::Submitted);
}

#[test]
fn test_out_of_date_on_third_cycle_rebuilds_once() {
    let mut backend = RecordingBackend::new(1920, 1080);
    let mut scheduler = FrameScheduler::new();

    let mut presented = Vec::new();
    for cycle in 1..=5 {
        if cycle == 3 {
            backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
            backend.window_extent = vk::Extent2D {
                width: 1280,
                height: 720,
            };
        }
        presented.push(run_cycle(&mut scheduler, &mut backend));
    }

    assert_eq!(presented, [true, true, false, true, true]);
    assert_eq!(scheduler.rebuild_count(), 1);
    assert_eq!(scheduler.frame_number(), 5);
    assert_eq!(backend.count(|c| *c == Call::Rebuild), 1);

    // Idle wait precedes the rebuild; both sit between cycle 3's acquire
    // and cycle 4's acquire
    let idle = backend.position(Call::WaitIdle).unwrap();
    let rebuild = backend.position(Call::Rebuild).unwrap();
    assert_eq!(rebuild, idle + 1);

    let acquires: Vec<usize> = backend
        .calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::Acquire(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(acquires.len(), 5);
    assert!(acquires[2] < idle && rebuild < acquires[3]);

    // Cycles 4 and 5 present against the new extent
    let extents: Vec<vk::Extent2D> = backend
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::Present(_, extent) => Some(*extent),
            _ => None,
        })
        .collect();
    assert_eq!(extents.len(), 4);
    assert_eq!(extents[1].width, 1920);
    assert_eq!(extents[2].width, 1280);
    assert_eq!(extents[3].height, 720);
}

#[test]
fn test_out_of_date_cycle_leaves_fence_signaled() {
    let mut backend = RecordingBackend::new(800, 600);
    backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
    let mut scheduler = FrameScheduler::new();

    assert!(!run_cycle(&mut scheduler, &mut backend));
    assert!(backend.fence_signaled[0]);
    assert_eq!(backend.count(|c| matches!(c, Call::ResetFence(_))), 0);

    // Slot 0 comes around again without blocking forever
    assert!(run_cycle(&mut scheduler, &mut backend));
    assert!(run_cycle(&mut scheduler, &mut backend));
    assert_eq!(scheduler.frame_number(), 3);
}

#[test]
fn test_window_invalidation_rebuilds_after_present() {
    let mut backend = RecordingBackend::new(1920, 1080);
    let mut scheduler = FrameScheduler::new();

    let ticket = scheduler.begin_frame(&mut backend, true).unwrap().unwrap();
    scheduler.end_frame(&mut backend, ticket, false).unwrap();

    let present = backend
        .calls
        .iter()
        .position(|c| matches!(c, Call::Present(..)))
        .unwrap();
    let rebuild = backend.position(Call::Rebuild).unwrap();
    assert!(present < rebuild);
    assert_eq!(scheduler.rebuild_count(), 1);
}

#[test]
fn test_minimized_surface_defers_rebuild_until_restored() {
    let mut backend = RecordingBackend::new(1920, 1080);
    let mut scheduler = FrameScheduler::new();

    // Present reports out-of-date before the minimize event is handled
    backend.present_script.push_back(SurfaceStatus::OutOfDate);
    backend.window_extent = vk::Extent2D {
        width: 0,
        height: 0,
    };
    assert!(run_cycle(&mut scheduler, &mut backend));

    assert_eq!(backend.count(|c| *c == Call::RebuildDeferred), 1);
    assert_eq!(backend.count(|c| *c == Call::Rebuild), 0);
    assert_eq!(scheduler.rebuild_count(), 0);
    assert!(scheduler.rebuild_pending());

    backend.window_extent = vk::Extent2D {
        width: 1280,
        height: 720,
    };
    assert!(run_cycle(&mut scheduler, &mut backend));

    assert_eq!(scheduler.rebuild_count(), 1);
    assert!(!scheduler.rebuild_pending());
    assert_eq!(backend.extent.width, 1280);
    assert!(run_cycle(&mut scheduler, &mut backend));
    assert_eq!(scheduler.frame_number(), 3);
}

#[test]
#[should_panic(expected = "reclaimed while in flight")]
fn test_backend_rejects_reclaim_of_in_flight_slot() {
    let mut backend = RecordingBackend::new(800, 600);

    backend.reset_slot_fence(0).unwrap();
    backend.submit(0).unwrap();
    backend.reclaim_slot(0).unwrap();
}

#[test]
#[should_panic(expected = "no pending submission")]
fn test_backend_rejects_wait_on_reset_fence() {
    let mut backend = RecordingBackend::new(800, 600);

    backend.reset_slot_fence(0).unwrap();
    backend.wait_for_slot(0).unwrap();
}
