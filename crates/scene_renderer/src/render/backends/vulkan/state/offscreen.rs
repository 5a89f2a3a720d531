//! Headless presentation target
//!
//! A round-robin ring of device-local colour images. Acquire and present are
//! empty queue submissions that only move semaphores, which keeps the frame
//! manager's synchronisation identical to the windowed path.

use ash::{vk, Device};

use super::targets::{AcquireOutcome, PresentOutcome, PresentTarget};
use crate::render::backends::vulkan::memory::SharedMemory;
use crate::render::backends::vulkan::resources::image::{Image, ImageDesc};
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Format of the offscreen images
pub const TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Images in the ring when not told otherwise
pub const DEFAULT_IMAGE_COUNT: usize = 3;

/// Offscreen stand-in for a swapchain
pub struct OffscreenTarget {
    device: Device,
    memory: SharedMemory,
    queue: vk::Queue,
    images: Vec<Image>,
    views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
    image_count: usize,
    next: usize,
    vsync: bool,
}

impl OffscreenTarget {
    /// Create `image_count` colour images of `extent`
    pub fn new(context: &VulkanContext, memory: &SharedMemory, extent: vk::Extent2D, image_count: usize) -> VulkanResult<Self> {
        if image_count == 0 {
            return Err(VulkanError::invalid("Offscreen target needs at least one image"));
        }
        let mut target = Self {
            device: context.raw_device(),
            memory: std::rc::Rc::clone(memory),
            queue: context.graphics_queue(),
            images: Vec::new(),
            views: Vec::new(),
            extent,
            image_count,
            next: 0,
            vsync: false,
        };
        target.create_images(extent)?;
        Ok(target)
    }

    fn create_images(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let desc = ImageDesc::new_2d(
            extent,
            TARGET_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        );
        let images = (0..self.image_count)
            .map(|_| Image::new(self.device.clone(), &self.memory, desc))
            .collect::<VulkanResult<Vec<_>>>()?;

        self.views = images.iter().map(Image::view).collect();
        self.images = images;
        self.extent = extent;
        self.next = 0;
        log::debug!(
            "Offscreen target ready: {}x{}, {} images",
            extent.width,
            extent.height,
            self.image_count
        );
        Ok(())
    }

    /// Image behind `index`
    pub fn image(&self, index: u32) -> Option<&Image> {
        self.images.get(index as usize)
    }

    fn submit_empty(&self, wait: Option<vk::Semaphore>, signal: Option<vk::Semaphore>) -> VulkanResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe { self.device.queue_submit(self.queue, &[submit_info], vk::Fence::null()) }.map_err(VulkanError::Api)
    }
}

impl PresentTarget for OffscreenTarget {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        TARGET_FORMAT
    }

    fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    }

    fn acquire(&mut self, signal: vk::Semaphore, _timeout_ns: u64) -> VulkanResult<AcquireOutcome> {
        let index = self.next;
        self.next = (self.next + 1) % self.image_count;
        self.submit_empty(None, Some(signal))?;
        Ok(AcquireOutcome::Acquired {
            index: index as u32,
            suboptimal: false,
        })
    }

    fn present(&mut self, _queue: vk::Queue, _index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        self.submit_empty(Some(wait), None)?;
        Ok(PresentOutcome::Presented)
    }

    fn rebuild(&mut self, _context: &VulkanContext, extent: vk::Extent2D) -> VulkanResult<()> {
        self.views.clear();
        self.images.clear();
        self.create_images(extent)
    }

    fn vsync(&self) -> bool {
        self.vsync
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }
}
