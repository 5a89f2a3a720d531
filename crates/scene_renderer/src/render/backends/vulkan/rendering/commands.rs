//! Command pools and command recording
//!
//! [`RenderCommands`] is the set of draw-time commands the frame orchestrator
//! needs. [`CommandRecorder`] implements it on a real command buffer and adds
//! the transfer commands used by uploads. Render passes are scoped by
//! [`ActiveRenderPass`], which ends the pass when dropped.

use ash::{vk, Device};
use std::ops::{Deref, DerefMut};

use crate::render::backends::vulkan::state::sync::Fence;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe { device.create_command_pool(&pool_create_info, None) }
            .map_err(VulkanError::creation("command pool"))?;

        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::creation("command buffers"))
    }

    /// Return command buffers to the pool
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, buffers) };
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Begin a one-shot command buffer
    pub fn begin_single_time(&self) -> VulkanResult<CommandRecorder> {
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("Driver returned no command buffer"))?;

        let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
        if let Err(e) = recorder.begin() {
            self.free_command_buffers(&[command_buffer]);
            return Err(e);
        }
        Ok(recorder)
    }

    /// End, submit and wait for a one-shot command buffer, then free it
    pub fn submit_single_time(&self, mut recorder: CommandRecorder, queue: vk::Queue, timeout_ns: u64) -> VulkanResult<()> {
        let command_buffer = recorder.handle();
        let result = (|| {
            recorder.end()?;
            let fence = Fence::new(self.device.clone(), false)?;
            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            unsafe { self.device.queue_submit(queue, &[submit_info], fence.handle()) }.map_err(VulkanError::Api)?;
            fence.wait(timeout_ns)
        })();
        self.free_command_buffers(&[command_buffer]);
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::warn!("Device wait failed before destroying command pool: {e}");
        }
        unsafe { self.device.destroy_command_pool(self.command_pool, None) };
    }
}

/// Draw-time commands issued by the frame orchestrator
pub trait RenderCommands {
    /// Reset the underlying command buffer
    fn reset(&mut self) -> VulkanResult<()>;
    /// Begin recording
    fn begin(&mut self) -> VulkanResult<()>;
    /// Start a render pass with inline contents
    fn cmd_begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    );
    /// End the current render pass
    fn cmd_end_render_pass(&mut self);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&mut self, pipeline: vk::Pipeline);
    /// Bind one descriptor set at `set_index`
    fn cmd_bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet);
    /// Bind vertex buffers starting at `first_binding`, all at offset 0
    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer]);
    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer);
    /// Push constant bytes at offset 0
    fn cmd_push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]);
    /// Draw one instance of `index_count` indices
    fn cmd_draw_indexed(&mut self, index_count: u32);
    /// Finish recording
    fn end(&mut self) -> VulkanResult<()>;

    /// Begin a render pass that ends when the returned guard drops
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> ActiveRenderPass<'_, Self>
    where
        Self: Sized,
    {
        self.cmd_begin_render_pass(render_pass, framebuffer, render_area, clear_values);
        ActiveRenderPass { recorder: self }
    }
}

/// Render pass scope; ends the pass on drop
pub struct ActiveRenderPass<'a, R: RenderCommands> {
    recorder: &'a mut R,
}

impl<R: RenderCommands> Deref for ActiveRenderPass<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.recorder
    }
}

impl<R: RenderCommands> DerefMut for ActiveRenderPass<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.recorder
    }
}

impl<R: RenderCommands> Drop for ActiveRenderPass<'_, R> {
    fn drop(&mut self) {
        self.recorder.cmd_end_render_pass();
    }
}

/// Command buffer recorder
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Wrap a command buffer allocated from a pool with `RESET_COMMAND_BUFFER`
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Whether `begin` has been called without a matching `end`
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn require_recording(&self) -> VulkanResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(VulkanError::invalid("Command buffer not recording"))
        }
    }

    /// Copy whole regions between buffers
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        self.require_recording()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(self.command_buffer, src, dst, &[region]) };
        Ok(())
    }

    /// Copy tightly packed texels into mip level 0 of one array layer
    pub fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        extent: vk::Extent2D,
        array_layer: u32,
    ) -> VulkanResult<()> {
        self.require_recording()?;
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: array_layer,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.command_buffer, src, dst, layout, &[region]);
        }
        Ok(())
    }

    /// Copy mip level 0 of one array layer into a buffer
    pub fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        layout: vk::ImageLayout,
        dst: vk::Buffer,
        extent: vk::Extent2D,
        array_layer: u32,
    ) -> VulkanResult<()> {
        self.require_recording()?;
        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: array_layer,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(self.command_buffer, src, layout, dst, &[region]);
        }
        Ok(())
    }

    /// Blit between two subresources of the same image
    pub fn blit_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        region: vk::ImageBlit,
        filter: vk::Filter,
    ) -> VulkanResult<()> {
        self.require_recording()?;
        unsafe {
            self.device
                .cmd_blit_image(self.command_buffer, image, layout, image, layout, &[region], filter);
        }
        Ok(())
    }

    /// Record a pipeline barrier
    pub fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier],
        image_barriers: &[vk::ImageMemoryBarrier],
    ) -> VulkanResult<()> {
        self.require_recording()?;
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                buffer_barriers,
                image_barriers,
            );
        }
        Ok(())
    }
}

impl RenderCommands for CommandRecorder {
    fn reset(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(VulkanError::Api)?;
        self.recording = false;
        Ok(())
    }

    fn begin(&mut self) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::invalid("Command buffer already recording"));
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.command_buffer, &begin_info) }.map_err(VulkanError::Api)?;

        self.recording = true;
        Ok(())
    }

    fn cmd_begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    fn cmd_bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
    }

    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer]) {
        let offsets = vec![0; buffers.len()];
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, &offsets);
        }
    }

    fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn cmd_push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, 0, data);
        }
    }

    fn cmd_draw_indexed(&mut self, index_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.command_buffer, index_count, 1, 0, 0, 0);
        }
    }

    fn end(&mut self) -> VulkanResult<()> {
        self.require_recording()?;
        unsafe { self.device.end_command_buffer(self.command_buffer) }.map_err(VulkanError::CommandRecordingFailed)?;
        self.recording = false;
        Ok(())
    }
}
