//! Descriptor set layouts, pools and writes
//!
//! The scene uses two set layouts. Set 0 carries the per-frame scene uniform
//! and the shadow map; set 1 carries one colour texture per drawable.

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Descriptor set layout builder
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Start an empty layout
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    fn add(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Create the layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::creation("descriptor set layout"))?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor set layout with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Fixed-size descriptor pool; sets live as long as the pool
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Pool with room for `max_sets` sets using at most the given descriptor counts
    pub fn new(device: Device, max_sets: u32, uniform_buffers: u32, image_samplers: u32) -> VulkanResult<Self> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::UNIFORM_BUFFER, uniform_buffers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, image_samplers),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::creation("descriptor pool"))?;

        Ok(Self { pool, device })
    }

    /// Allocate one set per layout
    pub fn allocate_descriptor_sets(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::creation("descriptor sets"))
    }

    /// Allocate a single set
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        self.allocate_descriptor_sets(&[layout.handle()])?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("Driver returned no descriptor set"))
    }

    /// Pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingWrite {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Batches descriptor writes and applies them in one call
#[derive(Default)]
pub struct DescriptorSetWriter {
    writes: Vec<(vk::DescriptorSet, u32, PendingWrite)>,
}

impl DescriptorSetWriter {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `binding` of `set` at a uniform buffer range
    pub fn write_buffer(mut self, set: vk::DescriptorSet, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.writes.push((set, binding, PendingWrite::Buffer(info)));
        self
    }

    /// Point `binding` of `set` at an image view and sampler
    pub fn write_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        let info = vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout: layout,
        };
        self.writes.push((set, binding, PendingWrite::Image(info)));
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every queued write
    pub fn update(self, device: &Device) {
        // The infos are borrowed by the write structs, so both live until the call returns.
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|(set, binding, pending)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(*binding)
                    .dst_array_element(0);
                match pending {
                    PendingWrite::Buffer(info) => builder
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(info))
                        .build(),
                    PendingWrite::Image(info) => builder
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(std::slice::from_ref(info))
                        .build(),
                }
            })
            .collect();

        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

/// Builder for set 0: scene uniform (binding 0) and shadow map (binding 1)
pub fn uniform_set_layout() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new()
        .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
}

/// Builder for set 1: one colour texture (binding 0)
pub fn texture_set_layout() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new().add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
}

/// The two set layouts shared by every scene pipeline
pub struct SceneDescriptorLayouts {
    /// Set 0
    pub uniform: DescriptorSetLayout,
    /// Set 1
    pub texture: DescriptorSetLayout,
}

impl SceneDescriptorLayouts {
    /// Create both layouts
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            uniform: uniform_set_layout().build(device)?,
            texture: texture_set_layout().build(device)?,
        })
    }
}
