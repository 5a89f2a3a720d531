//! Rendering backends
//!
//! Only Vulkan is implemented.

pub mod backends;
