//! Sampled textures: plain 2D images, cubemaps and depth targets
//!
//! Colour textures copy their texels into staging buffers when they are
//! created. [`Texture::upload_data`] records the transfer into an upload
//! batch: every layer is copied into mip level 0, the rest of the chain is
//! blitted, and the whole image ends in `SHADER_READ_ONLY_OPTIMAL`.

use ash::vk;

use crate::render::backends::vulkan::memory::SharedMemory;
use crate::render::backends::vulkan::rendering::commands::CommandRecorder;
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::resources::image::{Image, ImageDesc};
use crate::render::backends::vulkan::upload::barriers::transition_image;
use crate::render::backends::vulkan::upload::mip_chain::{record_mip_blits, MipChain};
use crate::core::config::TextureEncoding;
use crate::render::backends::vulkan::upload::staging::{stage_bytes, staged, StagingOwner};
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Format of colour textures whose bytes carry `encoding`
pub fn color_format(encoding: TextureEncoding) -> vk::Format {
    match encoding {
        TextureEncoding::Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureEncoding::Linear => vk::Format::R8G8B8A8_UNORM,
    }
}

/// File suffixes of the six cubemap faces, in layer order (+X, -X, +Y, -Y, +Z, -Z)
pub const CUBEMAP_FACE_SUFFIXES: [&str; 6] = ["_r", "_l", "_u", "_d", "_b", "_f"];

/// Decoded RGBA8 pixels in upload row order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelData {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// `width * height * 4` bytes
    pub rgba: Vec<u8>,
}

impl PixelData {
    /// Wrap decoded pixels, checking the byte count
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> VulkanResult<Self> {
        let pixels = Self { width, height, rgba };
        pixels.validate()?;
        Ok(pixels)
    }

    /// A `width` x `height` image filled with one colour
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let count = (width as usize) * (height as usize);
        Self {
            width,
            height,
            rgba: color.repeat(count),
        }
    }

    /// 1x1 magenta, used in place of textures that failed to load
    pub fn placeholder() -> Self {
        Self::solid(1, 1, [255, 0, 255, 255])
    }

    /// Extent of the image
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    fn validate(&self) -> VulkanResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VulkanError::invalid("Pixel data has a zero dimension"));
        }
        let expected = (self.width as usize) * (self.height as usize) * 4;
        if self.rgba.len() != expected {
            return Err(VulkanError::invalid(format!(
                "Pixel data is {} bytes, expected {} for {}x{} RGBA",
                self.rgba.len(),
                expected,
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// What a [`Texture`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// One layer, full mip chain
    Image2D,
    /// Six square layers, full mip chain, sampled as a cube
    Cubemap,
    /// Depth attachment, optionally sampled
    Depth,
}

/// A device-local texture and, until uploaded, its staging buffers
pub struct Texture {
    staging: Vec<Buffer>,
    image: Image,
    kind: TextureKind,
    mip_chain: MipChain,
    blit_filter: vk::Filter,
}

impl Texture {
    /// 2D texture from decoded pixels
    pub fn from_pixels(
        context: &VulkanContext,
        memory: &SharedMemory,
        pixels: &PixelData,
        encoding: TextureEncoding,
    ) -> VulkanResult<Self> {
        Self::with_layers(
            context,
            memory,
            std::slice::from_ref(pixels),
            TextureKind::Image2D,
            color_format(encoding),
        )
    }

    /// Cubemap from exactly six faces ordered as [`CUBEMAP_FACE_SUFFIXES`]
    pub fn cubemap(
        context: &VulkanContext,
        memory: &SharedMemory,
        faces: &[PixelData],
        encoding: TextureEncoding,
    ) -> VulkanResult<Self> {
        if faces.len() != 6 {
            return Err(VulkanError::invalid(format!(
                "A cubemap needs exactly 6 faces, got {}",
                faces.len()
            )));
        }
        let first = faces[0].extent();
        if first.width != first.height {
            return Err(VulkanError::invalid("Cubemap faces must be square"));
        }
        if faces.iter().any(|face| face.extent() != first) {
            return Err(VulkanError::invalid("Cubemap faces differ in size"));
        }
        Self::with_layers(context, memory, faces, TextureKind::Cubemap, color_format(encoding))
    }

    /// Depth target of `extent`; `sampled` adds shader read access for shadow lookups
    pub fn depth(context: &VulkanContext, memory: &SharedMemory, extent: vk::Extent2D, sampled: bool) -> VulkanResult<Self> {
        let mut features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let mut usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        if sampled {
            features |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        let format = context
            .physical_device()
            .find_depth_format(context.instance(), features)?;

        let desc = ImageDesc::new_2d(extent, format, usage, vk::ImageAspectFlags::DEPTH);
        let image = Image::new(context.raw_device(), memory, desc)?;

        Ok(Self {
            staging: Vec::new(),
            image,
            kind: TextureKind::Depth,
            mip_chain: MipChain::single(extent.width, extent.height),
            blit_filter: vk::Filter::NEAREST,
        })
    }

    fn with_layers(
        context: &VulkanContext,
        memory: &SharedMemory,
        layers: &[PixelData],
        kind: TextureKind,
        format: vk::Format,
    ) -> VulkanResult<Self> {
        for layer in layers {
            layer.validate()?;
        }
        let extent = layers[0].extent();
        let mip_chain = MipChain::new(extent.width, extent.height);

        let (flags, view_type) = match kind {
            TextureKind::Cubemap => (vk::ImageCreateFlags::CUBE_COMPATIBLE, vk::ImageViewType::CUBE),
            _ => (vk::ImageCreateFlags::empty(), vk::ImageViewType::TYPE_2D),
        };

        let desc = ImageDesc {
            extent,
            format,
            mip_levels: mip_chain.len(),
            array_layers: layers.len() as u32,
            usage: vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            flags,
            aspect: vk::ImageAspectFlags::COLOR,
            view_type,
        };

        let device = context.raw_device();
        let (staging, image) = staged(memory, || {
            let staging = layers
                .iter()
                .map(|layer| stage_bytes(&device, memory, &layer.rgba))
                .collect::<VulkanResult<Vec<_>>>()?;
            let image = Image::new(device.clone(), memory, desc)?;
            Ok((staging, image))
        })?;

        let format_properties = unsafe {
            context
                .instance()
                .get_physical_device_format_properties(context.physical_device().device, format)
        };
        let blit_filter = if format_properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            vk::Filter::LINEAR
        } else {
            vk::Filter::NEAREST
        };

        log::debug!(
            "Staged {:?} texture {}x{}: {} layers, {} mip levels",
            kind,
            extent.width,
            extent.height,
            layers.len(),
            mip_chain.len()
        );

        Ok(Self {
            staging,
            image,
            kind,
            mip_chain,
            blit_filter,
        })
    }

    /// Record copies, mip blits and the final transition into `recorder`
    ///
    /// Staging buffers stay alive until [`StagingOwner::destroy_staging`] is
    /// called after the batch has executed.
    pub fn upload_data(&self, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        if self.kind == TextureKind::Depth {
            return Err(VulkanError::invalid("Depth textures have no texels to upload"));
        }
        if self.staging.is_empty() {
            return Err(VulkanError::invalid("Texture staging already released"));
        }

        let image = self.image.handle();
        let range = self.image.desc().full_range();
        let layout = vk::ImageLayout::GENERAL;
        let layers = self.layer_count();

        transition_image(recorder, image, range, vk::ImageLayout::UNDEFINED, layout)?;
        for (layer, staging) in self.staging.iter().enumerate() {
            recorder.copy_buffer_to_image(staging.handle(), image, layout, self.extent(), layer as u32)?;
        }
        record_mip_blits(recorder, image, &self.mip_chain, layers, self.blit_filter)?;
        transition_image(recorder, image, range, layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    /// Underlying image
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// View covering every level and layer
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Size of mip level 0
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Kind of texture
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Mip levels, base first
    pub fn mip_chain(&self) -> &MipChain {
        &self.mip_chain
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_chain.len()
    }

    /// Number of array layers
    pub fn layer_count(&self) -> u32 {
        self.image.desc().array_layers
    }
}

impl StagingOwner for Texture {
    fn destroy_staging(&mut self) {
        self.staging.clear();
    }

    fn has_staging(&self) -> bool {
        !self.staging.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_data_size_checked() {
        assert!(PixelData::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            PixelData::new(2, 2, vec![0; 15]),
            Err(VulkanError::InvalidOperation { .. })
        ));
        assert!(PixelData::new(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn test_placeholder_is_magenta() {
        let placeholder = PixelData::placeholder();
        assert_eq!(placeholder.extent(), vk::Extent2D { width: 1, height: 1 });
        assert_eq!(placeholder.rgba, vec![255, 0, 255, 255]);
    }

    #[test]
    fn test_solid_fills_every_texel() {
        let pixels = PixelData::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(pixels.rgba.len(), 24);
        assert!(pixels.rgba.chunks(4).all(|texel| texel == [1, 2, 3, 4]));
    }

    #[test]
    fn test_encoding_picks_format() {
        assert_eq!(color_format(TextureEncoding::Srgb), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(color_format(TextureEncoding::Linear), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(color_format(TextureEncoding::default()), vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn test_face_suffix_order() {
        assert_eq!(CUBEMAP_FACE_SUFFIXES, ["_r", "_l", "_u", "_d", "_b", "_f"]);
    }
}
