//! Texture and shadow-map samplers

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Sampler with automatic cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear, repeating, mipmapped sampler for colour textures
    ///
    /// Anisotropy is clamped to the device limit and disabled when the feature
    /// is missing.
    pub fn color(context: &VulkanContext, max_anisotropy: f32) -> VulkanResult<Self> {
        let info = color_sampler_info(
            context.physical_device().features.sampler_anisotropy == vk::TRUE,
            context.physical_device().properties.limits.max_sampler_anisotropy,
            max_anisotropy,
        );
        Self::create(context.raw_device(), &info, "texture sampler")
    }

    /// Clamp-to-edge depth comparison sampler for shadow lookups
    pub fn shadow(context: &VulkanContext) -> VulkanResult<Self> {
        Self::create(context.raw_device(), &shadow_sampler_info(), "shadow sampler")
    }

    fn create(device: Device, info: &vk::SamplerCreateInfo, what: &'static str) -> VulkanResult<Self> {
        let sampler = unsafe { device.create_sampler(info, None) }.map_err(VulkanError::creation(what))?;
        Ok(Self { device, sampler })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

fn color_sampler_info(anisotropy_supported: bool, device_limit: f32, requested: f32) -> vk::SamplerCreateInfo {
    let anisotropy = requested.min(device_limit).max(1.0);
    vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy_supported && anisotropy > 1.0)
        .max_anisotropy(anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .build()
}

fn shadow_sampler_info() -> vk::SamplerCreateInfo {
    vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
        .compare_enable(true)
        .compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .min_lod(0.0)
        .max_lod(0.0)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anisotropy_clamped_to_device_limit() {
        let info = color_sampler_info(true, 8.0, 16.0);
        assert_eq!(info.max_anisotropy, 8.0);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
    }

    #[test]
    fn test_anisotropy_disabled_without_feature() {
        let info = color_sampler_info(false, 16.0, 16.0);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn test_shadow_sampler_compares() {
        let info = shadow_sampler_info();
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }
}
