//! Frame and presentation state: swapchain, offscreen target, framebuffers,
//! synchronisation primitives and the per-frame lifecycle

pub mod frame;
pub mod framebuffer;
pub mod offscreen;
pub mod swapchain;
pub mod sync;
pub mod targets;
