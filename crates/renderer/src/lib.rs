//! Frame orchestration for the ray tracer.
//!
//! This crate sequences CPU work against the GPU:
//! - Double-buffered frame slots and the acquire/record/submit/present cycle
//! - Swapchain rebuilds after surface invalidation
//! - The acceleration structures and ray query pass drawn each frame

pub mod frame_loop;
pub mod frame_slot;
pub mod ray_query_pass;
pub mod raytracing;
pub mod renderer;
pub mod swapchain_controller;

pub use frame_loop::{FRAME_OVERLAP, FrameBackend, FrameScheduler, FrameTicket, SlotState};
pub use renderer::{OverlayRecorder, Renderer};
