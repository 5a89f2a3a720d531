//! Images with their view, bound to pool memory

use ash::{vk, Device};
use std::rc::Rc;

use crate::render::backends::vulkan::memory::{Allocation, MemoryUsage, SharedMemory};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Everything needed to create an [`Image`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size of mip level 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Number of array layers
    pub array_layers: u32,
    /// Image usage
    pub usage: vk::ImageUsageFlags,
    /// Extra create flags (e.g. cube compatibility)
    pub flags: vk::ImageCreateFlags,
    /// Aspect covered by the view
    pub aspect: vk::ImageAspectFlags,
    /// Type of the view created alongside the image
    pub view_type: vk::ImageViewType,
}

impl ImageDesc {
    /// Single-level, single-layer 2D image
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            array_layers: 1,
            usage,
            flags: vk::ImageCreateFlags::empty(),
            aspect,
            view_type: vk::ImageViewType::TYPE_2D,
        }
    }

    /// Subresource range covering every level and layer
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

/// A device-local `VkImage`, its view and its memory
pub struct Image {
    device: Device,
    memory: SharedMemory,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    /// Create, allocate, bind, then create the view
    pub fn new(device: Device, memory: &SharedMemory, desc: ImageDesc) -> VulkanResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::invalid("Image extent must be non-zero"));
        }

        let create_info = vk::ImageCreateInfo::builder()
            .flags(desc.flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&create_info, None) }.map_err(VulkanError::creation("image"))?;

        let mut this = Self {
            device,
            memory: Rc::clone(memory),
            image,
            view: vk::ImageView::null(),
            allocation: None,
            desc,
        };

        let requirements = unsafe { this.device.get_image_memory_requirements(image) };
        let allocation = memory.borrow_mut().allocate(&requirements, MemoryUsage::Resident)?;
        this.allocation = Some(allocation);

        unsafe { this.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
            .map_err(VulkanError::Api)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(desc.full_range());

        this.view = unsafe { this.device.create_image_view(&view_info, None) }.map_err(VulkanError::creation("image view"))?;

        log::debug!(
            "Created {}x{} {:?} image ({} levels, {} layers)",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.array_layers
        );

        Ok(this)
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Creation parameters
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Size of mip level 0
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.memory.try_borrow_mut() {
                Ok(mut memory) => {
                    if let Err(e) = memory.release(&allocation) {
                        log::error!("Failed to release image memory: {e}");
                    }
                }
                Err(_) => log::error!("Memory system busy while dropping an image; allocation leaked"),
            }
        }
    }
}
