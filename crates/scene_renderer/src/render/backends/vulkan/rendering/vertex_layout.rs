//! Vertex input layouts for split attribute buffers
//!
//! Every attribute has its own binding and location with the same index, so
//! binding `n` is fed from the `n`th buffer a mesh exposes.

use ash::vk;

use crate::render::backends::vulkan::resources::mesh::ATTRIBUTE_COUNT;

const ATTRIBUTE_FORMATS: [vk::Format; ATTRIBUTE_COUNT] = [
    vk::Format::R32G32B32_SFLOAT, // position
    vk::Format::R32G32B32_SFLOAT, // normal
    vk::Format::R32G32B32_SFLOAT, // tangent
    vk::Format::R32G32B32_SFLOAT, // binormal
    vk::Format::R32G32_SFLOAT,    // texcoord
];

fn format_size(format: vk::Format) -> u32 {
    match format {
        vk::Format::R32G32_SFLOAT => 8,
        _ => 12,
    }
}

/// Bindings and attributes for a vertex input state
#[derive(Debug, Clone)]
pub struct VertexLayout {
    /// One binding per attribute buffer
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// One attribute per binding
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// All five attributes, for the model pipeline
    pub fn full() -> Self {
        Self::first(ATTRIBUTE_COUNT)
    }

    /// Positions only, for the depth and skybox pipelines
    pub fn positions_only() -> Self {
        Self::first(1)
    }

    fn first(count: usize) -> Self {
        let (bindings, attributes) = ATTRIBUTE_FORMATS[..count]
            .iter()
            .enumerate()
            .map(|(index, &format)| {
                let index = index as u32;
                (
                    vk::VertexInputBindingDescription {
                        binding: index,
                        stride: format_size(format),
                        input_rate: vk::VertexInputRate::VERTEX,
                    },
                    vk::VertexInputAttributeDescription {
                        binding: index,
                        location: index,
                        format,
                        offset: 0,
                    },
                )
            })
            .unzip();
        Self { bindings, attributes }
    }

    /// Vertex input state borrowing this layout
    pub fn input_state(&self) -> vk::PipelineVertexInputStateCreateInfoBuilder<'_> {
        vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.bindings)
            .vertex_attribute_descriptions(&self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_layout_strides() {
        let layout = VertexLayout::full();
        let strides: Vec<u32> = layout.bindings.iter().map(|b| b.stride).collect();
        assert_eq!(strides, vec![12, 12, 12, 12, 8]);
        for (i, attribute) in layout.attributes.iter().enumerate() {
            assert_eq!(attribute.binding, i as u32);
            assert_eq!(attribute.location, i as u32);
            assert_eq!(attribute.offset, 0);
        }
    }

    #[test]
    fn test_positions_only() {
        let layout = VertexLayout::positions_only();
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    }
}
