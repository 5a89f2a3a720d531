//! Image layout transitions used by the upload pipeline
//!
//! Only three transitions exist in the upload path. Anything else is a bug in
//! the caller and is rejected before a barrier is recorded.
//!
//! | old                              | new                              | access                           | stages                |
//! |----------------------------------|----------------------------------|----------------------------------|-----------------------|
//! | `UNDEFINED` / `PREINITIALIZED`   | `GENERAL` / `TRANSFER_DST`       | `HOST_WRITE` → `TRANSFER_WRITE`  | host → transfer       |
//! | `GENERAL` / `TRANSFER_DST`       | same layout (mip step)           | `TRANSFER_WRITE` → `TRANSFER_READ` | transfer → transfer |
//! | `GENERAL` / `TRANSFER_DST`       | `SHADER_READ_ONLY_OPTIMAL`       | `TRANSFER_WRITE` → `SHADER_READ` | transfer → fragment   |

use ash::vk;

use crate::render::backends::vulkan::rendering::commands::CommandRecorder;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Access masks and stages for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Writes that must be made available
    pub src_access: vk::AccessFlags,
    /// Accesses that must see them
    pub dst_access: vk::AccessFlags,
    /// Stage producing the writes
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming them
    pub dst_stage: vk::PipelineStageFlags,
}

fn is_initial(layout: vk::ImageLayout) -> bool {
    layout == vk::ImageLayout::UNDEFINED || layout == vk::ImageLayout::PREINITIALIZED
}

fn is_transfer_target(layout: vk::ImageLayout) -> bool {
    layout == vk::ImageLayout::GENERAL || layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
}

/// Look up the barrier for `old -> new`
pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<LayoutTransition> {
    let (src_access, dst_access, src_stage, dst_stage) = if is_initial(old) && is_transfer_target(new) {
        (
            vk::AccessFlags::HOST_WRITE,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::TRANSFER,
        )
    } else if is_transfer_target(old) && old == new {
        (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        )
    } else if is_transfer_target(old) && new == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
        (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )
    } else {
        return Err(VulkanError::UnsupportedLayoutTransition { old, new });
    };

    Ok(LayoutTransition {
        old_layout: old,
        new_layout: new,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record the barrier for `old -> new` on `range` of `image`
pub fn transition_image(
    recorder: &mut CommandRecorder,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> VulkanResult<()> {
    let transition = layout_transition(old, new)?;
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(transition.old_layout)
        .new_layout(transition.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .build();

    recorder.pipeline_barrier(transition.src_stage, transition.dst_stage, &[], &[barrier])
}
