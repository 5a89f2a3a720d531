//! Presentation targets
//!
//! A [`PresentTarget`] is a ring of colour images the frame manager acquires,
//! renders into and presents. The KHR [`Swapchain`](super::swapchain::Swapchain)
//! is the windowed implementation; [`OffscreenTarget`](super::offscreen::OffscreenTarget)
//! stands in for it in headless runs.

use ash::vk;

use crate::render::backends::vulkan::{VulkanContext, VulkanResult};

/// Result of asking the target for its next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image `index` will be ready once the signal semaphore fires
    Acquired {
        /// Image index
        index: u32,
        /// The image is usable but the target no longer matches the surface
        suboptimal: bool,
    },
    /// No image became available within the timeout
    Timeout,
    /// The target must be rebuilt before it can be used
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Queued normally
    Presented,
    /// Queued (or dropped) but the target must be rebuilt
    NeedsRebuild,
}

/// A ring of images the frame manager renders into
pub trait PresentTarget {
    /// Current image size
    fn extent(&self) -> vk::Extent2D;

    /// Colour format of every image
    fn format(&self) -> vk::Format;

    /// One view per image, indexed like acquired images
    fn image_views(&self) -> &[vk::ImageView];

    /// Number of images in the ring
    fn image_count(&self) -> usize {
        self.image_views().len()
    }

    /// Layout the main render pass must leave images in
    fn final_layout(&self) -> vk::ImageLayout;

    /// Get the next image, signalling `signal` when it is ready
    fn acquire(&mut self, signal: vk::Semaphore, timeout_ns: u64) -> VulkanResult<AcquireOutcome>;

    /// Queue image `index` once `wait` has signalled
    fn present(&mut self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome>;

    /// Recreate every image at `extent`; the device must be idle
    fn rebuild(&mut self, context: &VulkanContext, extent: vk::Extent2D) -> VulkanResult<()>;

    /// Whether presentation waits for vertical blank
    fn vsync(&self) -> bool;

    /// Change vsync; takes effect on the next rebuild
    fn set_vsync(&mut self, vsync: bool);
}
