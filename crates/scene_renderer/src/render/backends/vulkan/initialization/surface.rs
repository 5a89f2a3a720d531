//! Presentation surface seam
//!
//! The renderer does not own a window. Whatever does implements
//! [`SurfaceSource`] so the context can ask for instance extensions, a
//! `VkSurfaceKHR` and the current drawable size.

use ash::{vk, Instance};

use super::context::VulkanResult;

/// A window (or anything else) that can back a Vulkan presentation surface
pub trait SurfaceSource {
    /// Instance extensions needed to create the surface
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>>;

    /// Create the surface for `instance`; the context destroys it
    fn create_surface(&mut self, instance: &Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}
