//! Vulkan initialization (instance, device, surface)

pub mod context;
pub mod surface;
