//! Light-space depth pass resources

use ash::vk;

use crate::core::config::ShadowConfig;
use crate::render::backends::vulkan::memory::SharedMemory;
use crate::render::backends::vulkan::rendering::render_pass::RenderPass;
use crate::render::backends::vulkan::resources::texture::Texture;
use crate::render::backends::vulkan::state::framebuffer::Framebuffer;
use crate::render::backends::vulkan::{VulkanContext, VulkanResult};

/// Square depth map rendered from the light, sampled by the colour pass
///
/// Independent of the present target, so it survives swapchain rebuilds.
pub struct ShadowPass {
    framebuffer: Framebuffer,
    render_pass: RenderPass,
    map: Texture,
}

impl ShadowPass {
    /// Create the depth map, its render pass and framebuffer
    pub fn new(context: &VulkanContext, memory: &SharedMemory, config: &ShadowConfig) -> VulkanResult<Self> {
        let extent = vk::Extent2D {
            width: config.map_size,
            height: config.map_size,
        };
        let map = Texture::depth(context, memory, extent, true)?;
        let render_pass = RenderPass::new_shadow_pass(context.raw_device(), map.format())?;
        let framebuffer = Framebuffer::new(context.raw_device(), render_pass.handle(), &[map.view()], extent)?;

        log::info!("Shadow map: {}x{} {:?}", extent.width, extent.height, map.format());
        Ok(Self {
            framebuffer,
            render_pass,
            map,
        })
    }

    /// Depth-only render pass
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Framebuffer over the depth map
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer.handle()
    }

    /// Depth map size
    pub fn extent(&self) -> vk::Extent2D {
        self.map.extent()
    }

    /// View sampled by the colour pass
    pub fn view(&self) -> vk::ImageView {
        self.map.view()
    }

    /// Layout the depth map is in when sampled
    pub fn sampled_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    }
}
