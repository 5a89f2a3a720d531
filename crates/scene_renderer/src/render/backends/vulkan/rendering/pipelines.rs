//! Graphics pipelines for the three scene passes
//!
//! Viewport and scissor are baked in, so every pipeline is rebuilt when the
//! target extent changes. The shadow pipeline keeps the shadow-map extent and
//! only needs rebuilding with its render pass.

use ash::{vk, Device};

use super::render_pass::RenderPass;
use super::shader::ShaderModule;
use super::vertex_layout::VertexLayout;
use crate::core::config::{ShaderConfig, ShadowConfig};
use crate::render::backends::vulkan::resources::descriptor_set::SceneDescriptorLayouts;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Bytes of per-draw push constants (one column-major model matrix)
pub const PUSH_CONSTANT_SIZE: u32 = 64;

/// Stages reading the push constant block
pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;

/// Depth, culling and output state that differs between pipelines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFunction {
    /// Depth comparison
    pub depth_compare: vk::CompareOp,
    /// Whether depth is written
    pub depth_write: bool,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// `(constant, slope)` depth bias
    pub depth_bias: Option<(f32, f32)>,
    /// Whether the pass has a colour attachment
    pub color_output: bool,
}

impl FixedFunction {
    /// Lit, textured models
    pub fn model() -> Self {
        Self {
            depth_compare: vk::CompareOp::LESS,
            depth_write: true,
            cull_mode: vk::CullModeFlags::BACK,
            depth_bias: None,
            color_output: true,
        }
    }

    /// Depth-only shadow casters, biased against acne
    pub fn shadow(config: &ShadowConfig) -> Self {
        Self {
            depth_compare: vk::CompareOp::LESS,
            depth_write: true,
            cull_mode: vk::CullModeFlags::BACK,
            depth_bias: Some((config.depth_bias_constant, config.depth_bias_slope)),
            color_output: false,
        }
    }

    /// Skybox drawn last at the far plane
    pub fn skybox() -> Self {
        Self {
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            depth_write: false,
            cull_mode: vk::CullModeFlags::NONE,
            depth_bias: None,
            color_output: true,
        }
    }
}

/// Pipeline plus its layout, destroyed together
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build a pipeline for subpass 0 of `render_pass`
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        stages: &[vk::PipelineShaderStageCreateInfo],
        vertex_layout: &VertexLayout,
        set_layouts: &[vk::DescriptorSetLayout],
        fixed: FixedFunction,
    ) -> VulkanResult<Self> {
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: PUSH_CONSTANT_STAGES,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(VulkanError::creation("pipeline layout"))?;

        let vertex_input = vertex_layout.input_state();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let (bias_enable, bias_constant, bias_slope) = match fixed.depth_bias {
            Some((constant, slope)) => (true, constant, slope),
            None => (false, 0.0, 0.0),
        };
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(fixed.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(bias_enable)
            .depth_bias_constant_factor(bias_constant)
            .depth_bias_slope_factor(bias_slope);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(fixed.depth_write)
            .depth_compare_op(fixed.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let attachment_count = usize::from(fixed.color_output);
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments[..attachment_count]);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipeline = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) }
            .map_err(|(_, result)| {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                VulkanError::ResourceCreation {
                    what: "graphics pipeline",
                    result,
                }
            })?
            .into_iter()
            .next()
            .unwrap_or_default();

        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Compiled shader modules for every scene pipeline
pub struct SceneShaders {
    model_vertex: ShaderModule,
    model_fragment: ShaderModule,
    depth_vertex: ShaderModule,
    skybox_vertex: ShaderModule,
    skybox_fragment: ShaderModule,
}

impl SceneShaders {
    /// Load every SPIR-V file named in `config`
    pub fn load(device: &Device, config: &ShaderConfig) -> VulkanResult<Self> {
        config.validate().map_err(VulkanError::InitializationFailed)?;
        let load = |path: &str| ShaderModule::from_file(device, path);

        Ok(Self {
            model_vertex: load(&config.model_vertex)?,
            model_fragment: load(&config.model_fragment)?,
            depth_vertex: load(&config.depth_vertex)?,
            skybox_vertex: load(&config.skybox_vertex)?,
            skybox_fragment: load(&config.skybox_fragment)?,
        })
    }
}

/// The model, light (shadow) and skybox pipelines
pub struct ScenePipelines {
    /// Lit, textured, shadow-receiving models
    pub model: GraphicsPipeline,
    /// Depth-only shadow casters
    pub light: GraphicsPipeline,
    /// Cubemap skybox
    pub skybox: GraphicsPipeline,
}

impl ScenePipelines {
    /// Build all three pipelines
    pub fn new(
        device: &Device,
        shaders: &SceneShaders,
        layouts: &SceneDescriptorLayouts,
        main_pass: &RenderPass,
        extent: vk::Extent2D,
        shadow_pass: &RenderPass,
        shadow_extent: vk::Extent2D,
        shadow: &ShadowConfig,
    ) -> VulkanResult<Self> {
        let both_sets = [layouts.uniform.handle(), layouts.texture.handle()];
        let uniform_only = [layouts.uniform.handle()];

        let model = GraphicsPipeline::new(
            device,
            main_pass.handle(),
            extent,
            &[
                shaders.model_vertex.stage_info(vk::ShaderStageFlags::VERTEX),
                shaders.model_fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
            ],
            &VertexLayout::full(),
            &both_sets,
            FixedFunction::model(),
        )?;

        let light = GraphicsPipeline::new(
            device,
            shadow_pass.handle(),
            shadow_extent,
            &[shaders.depth_vertex.stage_info(vk::ShaderStageFlags::VERTEX)],
            &VertexLayout::positions_only(),
            &uniform_only,
            FixedFunction::shadow(shadow),
        )?;

        let skybox = GraphicsPipeline::new(
            device,
            main_pass.handle(),
            extent,
            &[
                shaders.skybox_vertex.stage_info(vk::ShaderStageFlags::VERTEX),
                shaders.skybox_fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
            ],
            &VertexLayout::positions_only(),
            &both_sets,
            FixedFunction::skybox(),
        )?;

        log::debug!("Built scene pipelines for {}x{}", extent.width, extent.height);
        Ok(Self { model, light, skybox })
    }
}
