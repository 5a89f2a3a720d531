//! Mip chain description and generation
//!
//! Each level is half the previous one (floor, never below 1). The chain ends
//! at the first level where either dimension reaches 1, so a 256x256 image
//! has 9 levels and a 1x1 image has exactly one.

use ash::vk;

use super::barriers::transition_image;
use crate::render::backends::vulkan::rendering::commands::CommandRecorder;
use crate::render::backends::vulkan::VulkanResult;

/// Ordered `(width, height)` of every mip level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipChain {
    levels: Vec<(u32, u32)>,
}

impl MipChain {
    /// Full chain for a `width` x `height` base level
    pub fn new(width: u32, height: u32) -> Self {
        let (mut w, mut h) = (width.max(1), height.max(1));
        let mut levels = vec![(w, h)];
        while w > 1 && h > 1 {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            levels.push((w, h));
        }
        Self { levels }
    }

    /// Base level only
    pub fn single(width: u32, height: u32) -> Self {
        Self {
            levels: vec![(width.max(1), height.max(1))],
        }
    }

    /// Number of levels
    pub fn len(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Always false; a chain has at least its base level
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// All levels, base first
    pub fn levels(&self) -> &[(u32, u32)] {
        &self.levels
    }

    /// Base level extent
    pub fn base_extent(&self) -> vk::Extent2D {
        let (width, height) = self.levels[0];
        vk::Extent2D { width, height }
    }

    /// Whether blits are needed at all
    pub fn needs_blits(&self) -> bool {
        self.levels.len() > 1
    }
}

fn level_range(level: u32, layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    }
}

fn corner(width: u32, height: u32) -> vk::Offset3D {
    vk::Offset3D {
        x: width as i32,
        y: height as i32,
        z: 1,
    }
}

/// Fill levels 1.. of every layer by blitting from the level above
///
/// Level 0 of each layer must already hold its texels in `GENERAL` layout.
/// After every level's blits that level gets a write-to-read barrier so it
/// can be the source of the next step.
pub fn record_mip_blits(
    recorder: &mut CommandRecorder,
    image: vk::Image,
    chain: &MipChain,
    layers: u32,
    filter: vk::Filter,
) -> VulkanResult<()> {
    if !chain.needs_blits() {
        return Ok(());
    }

    let layout = vk::ImageLayout::GENERAL;
    transition_image(recorder, image, level_range(0, layers), layout, layout)?;

    for (dst_level, pair) in chain.levels().windows(2).enumerate() {
        let dst_level = dst_level as u32 + 1;
        let ((src_w, src_h), (dst_w, dst_h)) = (pair[0], pair[1]);

        for layer in 0..layers {
            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: dst_level - 1,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                src_offsets: [vk::Offset3D::default(), corner(src_w, src_h)],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: dst_level,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                dst_offsets: [vk::Offset3D::default(), corner(dst_w, dst_h)],
            };
            recorder.blit_image(image, layout, blit, filter)?;
        }

        transition_image(recorder, image, level_range(dst_level, layers), layout, layout)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_power_of_two() {
        let chain = MipChain::new(256, 256);
        assert_eq!(chain.len(), 9);
        assert_eq!(chain.levels()[0], (256, 256));
        assert_eq!(chain.levels()[8], (1, 1));
    }

    #[test]
    fn test_degenerate_source_has_one_level() {
        for (w, h) in [(1, 1), (1, 64), (64, 1)] {
            let chain = MipChain::new(w, h);
            assert_eq!(chain.len(), 1);
            assert!(!chain.needs_blits());
        }
    }

    #[test]
    fn test_each_level_halves_previous() {
        for (w, h) in [(256, 64), (300, 199), (1024, 3), (5, 5), (2, 2)] {
            let chain = MipChain::new(w, h);
            for pair in chain.levels().windows(2) {
                let ((pw, ph), (cw, ch)) = (pair[0], pair[1]);
                assert_eq!(cw, (pw / 2).max(1));
                assert_eq!(ch, (ph / 2).max(1));
            }
            let &(lw, lh) = chain.levels().last().unwrap();
            assert!(lw == 1 || lh == 1, "{w}x{h} chain ended at {lw}x{lh}");
            let earlier = &chain.levels()[..chain.levels().len() - 1];
            assert!(earlier.iter().all(|&(a, b)| a > 1 && b > 1));
        }
    }

    #[test]
    fn test_rectangular_stops_at_short_side() {
        let chain = MipChain::new(256, 64);
        assert_eq!(chain.len(), 7);
        assert_eq!(chain.levels().last(), Some(&(4, 1)));
    }

    #[test]
    fn test_single_level() {
        let chain = MipChain::single(512, 512);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.base_extent(), vk::Extent2D { width: 512, height: 512 });
    }
}
