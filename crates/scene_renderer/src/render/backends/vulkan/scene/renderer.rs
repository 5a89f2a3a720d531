//! Scene renderer
//!
//! Owns the device context and everything built on it. Objects are added,
//! uploaded once, then drawn every frame with a fresh [`SceneUniform`].

use ash::vk;

use super::drawable::{DrawCall, DrawRole, Drawable, Transform};
use super::orchestrator::{self, PassTargets, PipelineHandles};
use super::shadow::ShadowPass;
use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::memory::{MemoryStats, MemorySystem, MemoryUsage, SharedMemory};
use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::rendering::pipelines::{SceneShaders, ScenePipelines};
use crate::render::backends::vulkan::resources::descriptor_set::{
    DescriptorPool, DescriptorSetWriter, SceneDescriptorLayouts,
};
use crate::render::backends::vulkan::resources::mesh::{Mesh, MeshData};
use crate::render::backends::vulkan::resources::sampler::Sampler;
use crate::render::backends::vulkan::resources::texture::{PixelData, Texture};
use crate::render::backends::vulkan::resources::uniform::{SceneUniform, UniformBuffer};
use crate::render::backends::vulkan::state::frame::{AcquireResult, FrameManager, FramePhase, HandleCounts};
use crate::render::backends::vulkan::state::offscreen::{OffscreenTarget, DEFAULT_IMAGE_COUNT};
use crate::render::backends::vulkan::state::swapchain::Swapchain;
use crate::render::backends::vulkan::state::targets::PresentTarget;
use crate::render::backends::vulkan::upload::staging::{staged, StagingOwner, UploadBatch};
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// What happened to a requested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Rendered and queued for presentation
    Presented,
    /// The target was rebuilt; nothing was drawn or the next frame uses new resources
    Rebuilt,
    /// No image became available in time
    Timeout,
    /// The target has zero area (e.g. minimised); nothing was drawn
    Deferred,
}

/// Index of an object added to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawableId(usize);

/// Two-pass shadowed scene renderer
pub struct SceneRenderer {
    drawables: Vec<Drawable>,
    texture_sets: Vec<vk::DescriptorSet>,
    uniform_set: Option<vk::DescriptorSet>,
    descriptor_pool: Option<DescriptorPool>,
    pipelines: Option<ScenePipelines>,
    frames: FrameManager,
    shadow: ShadowPass,
    uniform: UniformBuffer<SceneUniform>,
    layouts: SceneDescriptorLayouts,
    shaders: SceneShaders,
    color_sampler: Sampler,
    shadow_sampler: Sampler,
    upload_pool: CommandPool,
    memory: SharedMemory,
    config: RendererConfig,
    context: VulkanContext,
}

impl SceneRenderer {
    /// Build the renderer on `context`
    ///
    /// Presents to a swapchain when the context has a surface, otherwise to
    /// an offscreen ring of images.
    pub fn new(context: VulkanContext, config: RendererConfig, extent: vk::Extent2D) -> VulkanResult<Self> {
        config.validate().map_err(VulkanError::InitializationFailed)?;
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::invalid("Initial extent must be non-zero"));
        }

        let memory = MemorySystem::new(&context, &config.memory)?;
        let device = context.raw_device();

        let target: Box<dyn PresentTarget> = if context.surface().is_some() {
            Box::new(Swapchain::new(&context, extent, config.frame.vsync)?)
        } else {
            Box::new(OffscreenTarget::new(&context, &memory, extent, DEFAULT_IMAGE_COUNT)?)
        };

        let upload_pool = CommandPool::new(device.clone(), context.graphics_queue_family())?;
        let color_sampler = Sampler::color(&context, config.max_anisotropy)?;
        let shadow_sampler = Sampler::shadow(&context)?;
        let shaders = SceneShaders::load(&device, &config.shaders)?;
        let layouts = SceneDescriptorLayouts::new(&device)?;
        let uniform = UniformBuffer::new(device.clone(), &memory, &SceneUniform::default())?;
        let shadow = ShadowPass::new(&context, &memory, &config.shadow)?;
        let frames = FrameManager::new(&context, &memory, target, &config.frame)?;

        let mut renderer = Self {
            drawables: Vec::new(),
            texture_sets: Vec::new(),
            uniform_set: None,
            descriptor_pool: None,
            pipelines: None,
            frames,
            shadow,
            uniform,
            layouts,
            shaders,
            color_sampler,
            shadow_sampler,
            upload_pool,
            memory,
            config,
            context,
        };
        renderer.rebuild_pipelines()?;

        log::info!(
            "Scene renderer ready on {} ({}x{})",
            renderer.context.physical_device().name(),
            extent.width,
            extent.height
        );
        Ok(renderer)
    }

    fn require_not_uploaded(&self) -> VulkanResult<()> {
        if self.uniform_set.is_some() {
            Err(VulkanError::invalid("Objects cannot be added after resources were uploaded"))
        } else {
            Ok(())
        }
    }

    /// Add a lit object; `role` is [`DrawRole::Model`] or [`DrawRole::Plane`]
    pub fn add_drawable(
        &mut self,
        role: DrawRole,
        mesh: &MeshData,
        pixels: &PixelData,
        transform: Transform,
    ) -> VulkanResult<DrawableId> {
        self.require_not_uploaded()?;
        if role == DrawRole::Skybox {
            return Err(VulkanError::invalid("Use set_skybox for the skybox"));
        }

        let (mesh, texture) = staged(&self.memory, || {
            let mesh = Mesh::new(self.context.device(), &self.memory, mesh)?;
            let texture = Texture::from_pixels(&self.context, &self.memory, pixels, self.config.texture_encoding)?;
            Ok((mesh, texture))
        })?;
        self.drawables.push(Drawable::new(mesh, texture, transform, role));
        Ok(DrawableId(self.drawables.len() - 1))
    }

    /// Add the skybox from six cube faces (+X, -X, +Y, -Y, +Z, -Z)
    pub fn set_skybox(&mut self, faces: &[PixelData]) -> VulkanResult<DrawableId> {
        self.require_not_uploaded()?;
        if self.drawables.iter().any(|d| d.role() == DrawRole::Skybox) {
            return Err(VulkanError::invalid("Skybox already set"));
        }

        let (texture, mesh) = staged(&self.memory, || {
            let texture = Texture::cubemap(&self.context, &self.memory, faces, self.config.texture_encoding)?;
            let mesh = Mesh::new(self.context.device(), &self.memory, &MeshData::cube())?;
            Ok((texture, mesh))
        })?;
        self.drawables
            .push(Drawable::new(mesh, texture, Transform::identity(), DrawRole::Skybox));
        Ok(DrawableId(self.drawables.len() - 1))
    }

    /// Move an object
    pub fn set_transform(&mut self, id: DrawableId, transform: Transform) -> VulkanResult<()> {
        let drawable = self
            .drawables
            .get_mut(id.0)
            .ok_or_else(|| VulkanError::invalid(format!("No drawable {}", id.0)))?;
        drawable.set_transform(transform);
        Ok(())
    }

    /// Copy every staged object to the device and write descriptor sets
    ///
    /// Submits one batch, waits for it, releases all staging buffers and
    /// resets the staging pool.
    pub fn upload_resources(&mut self) -> VulkanResult<()> {
        self.require_not_uploaded()?;

        let mut batch = UploadBatch::begin(
            &self.upload_pool,
            self.context.graphics_queue(),
            &self.memory,
            self.config.frame.fence_timeout_ns(),
        )?;
        for drawable in &self.drawables {
            drawable.upload(batch.recorder())?;
        }
        batch.finish(
            self.drawables
                .iter_mut()
                .map(|drawable| drawable as &mut dyn StagingOwner),
        )?;

        let device = self.context.device();
        let object_count = self.drawables.len() as u32;
        let pool = DescriptorPool::new(device.clone(), object_count + 1, 1, object_count + 1)?;

        let uniform_set = pool.allocate(&self.layouts.uniform)?;
        let mut writer = DescriptorSetWriter::new()
            .write_buffer(uniform_set, 0, self.uniform.descriptor_info())
            .write_image(
                uniform_set,
                1,
                self.shadow.view(),
                self.shadow_sampler.handle(),
                self.shadow.sampled_layout(),
            );

        let mut texture_sets = Vec::with_capacity(self.drawables.len());
        for drawable in &self.drawables {
            let set = pool.allocate(&self.layouts.texture)?;
            writer = writer.write_image(
                set,
                0,
                drawable.texture().view(),
                self.color_sampler.handle(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            texture_sets.push(set);
        }
        writer.update(device);

        self.texture_sets = texture_sets;
        self.uniform_set = Some(uniform_set);
        self.descriptor_pool = Some(pool);

        log::info!("Uploaded {} scene objects", self.drawables.len());
        Ok(())
    }

    /// Render one frame with `scene` as the uniform block
    pub fn render_frame(&mut self, scene: &SceneUniform) -> VulkanResult<FrameOutcome> {
        let uniform_set = self
            .uniform_set
            .ok_or_else(|| VulkanError::invalid("Resources must be uploaded before rendering"))?;

        match self.frames.acquire(&self.context)? {
            AcquireResult::Ready(_) => {}
            AcquireResult::Timeout => return Ok(FrameOutcome::Timeout),
            AcquireResult::Deferred => return Ok(FrameOutcome::Deferred),
            AcquireResult::Rebuilt => {
                self.rebuild_pipelines()?;
                return Ok(FrameOutcome::Rebuilt);
            }
        }

        match self.draw_acquired(scene, uniform_set) {
            Ok(true) => {
                self.rebuild_pipelines()?;
                Ok(FrameOutcome::Rebuilt)
            }
            Ok(false) => Ok(FrameOutcome::Presented),
            Err(e) => {
                log::error!("Frame failed after acquire: {e}");
                self.frames.abandon()?;
                Err(e)
            }
        }
    }

    /// Update, record, submit and present the acquired image
    ///
    /// Returns `true` when presenting rebuilt the target. On error the frame
    /// is left mid-flight for [`FrameManager::abandon`].
    fn draw_acquired(&mut self, scene: &SceneUniform, uniform_set: vk::DescriptorSet) -> VulkanResult<bool> {
        self.uniform.update(scene)?;

        let draws: Vec<DrawCall> = self
            .drawables
            .iter()
            .zip(&self.texture_sets)
            .map(|(drawable, &set)| drawable.draw_call(set))
            .collect();
        let pipelines = PipelineHandles::from(
            self.pipelines
                .as_ref()
                .ok_or_else(|| VulkanError::invalid("Pipelines are not built"))?,
        );
        let shadow_pass = self.shadow.render_pass().handle();
        let shadow_framebuffer = self.shadow.framebuffer();
        let shadow_extent = self.shadow.extent();
        let clear_color = self.config.frame.clear_color;

        self.frames.record(|recorder, main| {
            let targets = PassTargets {
                shadow_pass,
                shadow_framebuffer,
                shadow_extent,
                main,
                clear_color,
            };
            orchestrator::record_frame(recorder, &targets, &pipelines, uniform_set, &draws)
        })?;
        self.frames.submit()?;
        self.frames.present(&self.context)
    }

    /// Handle a framebuffer resize; zero area defers the rebuild
    pub fn resize(&mut self, extent: vk::Extent2D) -> VulkanResult<FrameOutcome> {
        if self.frames.resize(&self.context, extent)? {
            self.rebuild_pipelines()?;
            Ok(FrameOutcome::Rebuilt)
        } else {
            Ok(FrameOutcome::Deferred)
        }
    }

    /// Flip vsync and rebuild; returns the new setting
    pub fn toggle_vsync(&mut self) -> VulkanResult<bool> {
        let vsync = !self.frames.vsync();
        self.frames.set_vsync(&self.context, vsync)?;
        self.rebuild_pipelines()?;
        log::info!("VSync {}", if vsync { "enabled" } else { "disabled" });
        Ok(vsync)
    }

    fn rebuild_pipelines(&mut self) -> VulkanResult<()> {
        self.pipelines = None;
        if self.frames.is_deferred() {
            return Ok(());
        }
        let pipelines = ScenePipelines::new(
            self.context.device(),
            &self.shaders,
            &self.layouts,
            self.frames.render_pass()?,
            self.frames.extent(),
            self.shadow.render_pass(),
            self.shadow.extent(),
            &self.config.shadow,
        )?;
        self.pipelines = Some(pipelines);
        Ok(())
    }

    /// Current target extent
    pub fn extent(&self) -> vk::Extent2D {
        self.frames.extent()
    }

    /// Whether presentation waits for vertical blank
    pub fn vsync(&self) -> bool {
        self.frames.vsync()
    }

    /// Phase of the frame in progress
    pub fn frame_phase(&self) -> FramePhase {
        self.frames.phase()
    }

    /// Live per-image handle counts
    pub fn handle_counts(&self) -> HandleCounts {
        self.frames.handle_counts()
    }

    /// Number of added objects, skybox included
    pub fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    /// Pool usage
    pub fn memory_stats(&self, usage: MemoryUsage) -> MemoryStats {
        self.memory.borrow().stats(usage)
    }

    /// Device context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Shared allocator
    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Renderer settings
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle during renderer teardown: {e}");
        }
    }
}
