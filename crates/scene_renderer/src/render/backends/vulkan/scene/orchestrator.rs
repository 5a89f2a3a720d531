//! Per-frame command recording
//!
//! One command buffer holds both passes: the light-space depth pass over the
//! shadow casters, then the colour pass over every model with the skybox
//! drawn last. The shadow render pass's subpass dependencies order the depth
//! writes before the colour pass samples the map.

use ash::vk;

use crate::render::backends::vulkan::rendering::commands::RenderCommands;
use crate::render::backends::vulkan::rendering::pipelines::{GraphicsPipeline, ScenePipelines};
use crate::render::backends::vulkan::state::frame::MainPassTarget;
use crate::render::backends::vulkan::VulkanResult;

use super::drawable::{DrawCall, DrawRole};

/// Depth cleared to the far plane in both passes
pub const CLEAR_DEPTH: f32 = 1.0;

/// Render passes and framebuffers for one frame
#[derive(Debug, Clone, Copy)]
pub struct PassTargets {
    /// Depth-only shadow pass
    pub shadow_pass: vk::RenderPass,
    /// Framebuffer over the shadow map
    pub shadow_framebuffer: vk::Framebuffer,
    /// Shadow map size
    pub shadow_extent: vk::Extent2D,
    /// Colour pass for the acquired image
    pub main: MainPassTarget,
    /// Colour the target is cleared to
    pub clear_color: [f32; 4],
}

/// A pipeline and the layout its sets and push constants bind against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineBinding {
    /// Pipeline handle
    pub pipeline: vk::Pipeline,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
}

impl From<&GraphicsPipeline> for PipelineBinding {
    fn from(pipeline: &GraphicsPipeline) -> Self {
        Self {
            pipeline: pipeline.handle(),
            layout: pipeline.layout(),
        }
    }
}

/// The three scene pipelines as plain handles
#[derive(Debug, Clone, Copy)]
pub struct PipelineHandles {
    /// Lit models
    pub model: PipelineBinding,
    /// Shadow casters
    pub light: PipelineBinding,
    /// Skybox
    pub skybox: PipelineBinding,
}

impl From<&ScenePipelines> for PipelineHandles {
    fn from(pipelines: &ScenePipelines) -> Self {
        Self {
            model: (&pipelines.model).into(),
            light: (&pipelines.light).into(),
            skybox: (&pipelines.skybox).into(),
        }
    }
}

fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

/// Reset, begin, record both passes and end
pub fn record_frame<R: RenderCommands>(
    recorder: &mut R,
    targets: &PassTargets,
    pipelines: &PipelineHandles,
    uniform_set: vk::DescriptorSet,
    draws: &[DrawCall],
) -> VulkanResult<()> {
    recorder.reset()?;
    recorder.begin()?;
    record_shadow_pass(recorder, targets, pipelines.light, uniform_set, draws);
    record_main_pass(recorder, targets, pipelines, uniform_set, draws);
    recorder.end()
}

/// Depth of every shadow caster from the light
pub fn record_shadow_pass<R: RenderCommands>(
    recorder: &mut R,
    targets: &PassTargets,
    light: PipelineBinding,
    uniform_set: vk::DescriptorSet,
    draws: &[DrawCall],
) {
    let clear_values = [vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: CLEAR_DEPTH,
            stencil: 0,
        },
    }];
    let mut pass = recorder.begin_render_pass(
        targets.shadow_pass,
        targets.shadow_framebuffer,
        full_area(targets.shadow_extent),
        &clear_values,
    );
    pass.cmd_bind_pipeline(light.pipeline);
    pass.cmd_bind_descriptor_set(light.layout, 0, uniform_set);
    for draw in draws.iter().filter(|draw| draw.role.casts_shadow()) {
        draw.record_depth(&mut *pass, light.layout);
    }
}

/// Lit models in submission order, then the skybox
pub fn record_main_pass<R: RenderCommands>(
    recorder: &mut R,
    targets: &PassTargets,
    pipelines: &PipelineHandles,
    uniform_set: vk::DescriptorSet,
    draws: &[DrawCall],
) {
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: targets.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: CLEAR_DEPTH,
                stencil: 0,
            },
        },
    ];
    let mut pass = recorder.begin_render_pass(
        targets.main.render_pass,
        targets.main.framebuffer,
        full_area(targets.main.extent),
        &clear_values,
    );

    let model = pipelines.model;
    pass.cmd_bind_pipeline(model.pipeline);
    pass.cmd_bind_descriptor_set(model.layout, 0, uniform_set);
    for draw in draws.iter().filter(|draw| draw.role != DrawRole::Skybox) {
        draw.record_lit(&mut *pass, model.layout);
    }

    let mut skyboxes = draws.iter().filter(|draw| draw.role == DrawRole::Skybox).peekable();
    if skyboxes.peek().is_some() {
        let skybox = pipelines.skybox;
        pass.cmd_bind_pipeline(skybox.pipeline);
        pass.cmd_bind_descriptor_set(skybox.layout, 0, uniform_set);
        for draw in skyboxes {
            draw.record_skybox(&mut *pass, skybox.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::scene::drawable::Transform;
    use crate::render::backends::vulkan::VulkanError;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        Reset,
        Begin,
        BeginPass(vk::RenderPass, usize),
        EndPass,
        BindPipeline(vk::Pipeline),
        BindSet(vk::PipelineLayout, u32, vk::DescriptorSet),
        BindVertexBuffers(usize),
        BindIndexBuffer(vk::Buffer),
        PushConstants(usize),
        DrawIndexed(u32),
        End,
    }

    #[derive(Default)]
    struct FakeRecorder {
        commands: Vec<Command>,
        fallible_calls: usize,
        /// Zero-based index of the reset/begin/end call that fails
        fail_at: Option<usize>,
    }

    impl FakeRecorder {
        fn failing_at(call: usize) -> Self {
            Self {
                fail_at: Some(call),
                ..Self::default()
            }
        }

        fn fallible(&mut self, command: Command) -> VulkanResult<()> {
            let call = self.fallible_calls;
            self.fallible_calls += 1;
            if self.fail_at == Some(call) {
                return Err(VulkanError::CommandRecordingFailed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            self.commands.push(command);
            Ok(())
        }

        fn count(&self, wanted: fn(&Command) -> bool) -> usize {
            self.commands.iter().filter(|c| wanted(c)).count()
        }
    }

    impl RenderCommands for FakeRecorder {
        fn reset(&mut self) -> VulkanResult<()> {
            self.fallible(Command::Reset)
        }
        fn begin(&mut self) -> VulkanResult<()> {
            self.fallible(Command::Begin)
        }
        fn cmd_begin_render_pass(
            &mut self,
            render_pass: vk::RenderPass,
            _framebuffer: vk::Framebuffer,
            _render_area: vk::Rect2D,
            clear_values: &[vk::ClearValue],
        ) {
            self.commands.push(Command::BeginPass(render_pass, clear_values.len()));
        }
        fn cmd_end_render_pass(&mut self) {
            self.commands.push(Command::EndPass);
        }
        fn cmd_bind_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.commands.push(Command::BindPipeline(pipeline));
        }
        fn cmd_bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
            self.commands.push(Command::BindSet(layout, set_index, set));
        }
        fn cmd_bind_vertex_buffers(&mut self, _first_binding: u32, buffers: &[vk::Buffer]) {
            self.commands.push(Command::BindVertexBuffers(buffers.len()));
        }
        fn cmd_bind_index_buffer(&mut self, buffer: vk::Buffer) {
            self.commands.push(Command::BindIndexBuffer(buffer));
        }
        fn cmd_push_constants(&mut self, _layout: vk::PipelineLayout, _stages: vk::ShaderStageFlags, data: &[u8]) {
            self.commands.push(Command::PushConstants(data.len()));
        }
        fn cmd_draw_indexed(&mut self, index_count: u32) {
            self.commands.push(Command::DrawIndexed(index_count));
        }
        fn end(&mut self) -> VulkanResult<()> {
            self.fallible(Command::End)
        }
    }

    fn binding(raw: u64) -> PipelineBinding {
        PipelineBinding {
            pipeline: vk::Pipeline::from_raw(raw),
            layout: vk::PipelineLayout::from_raw(raw + 100),
        }
    }

    fn handles() -> PipelineHandles {
        PipelineHandles {
            model: binding(1),
            light: binding(2),
            skybox: binding(3),
        }
    }

    fn targets() -> PassTargets {
        PassTargets {
            shadow_pass: vk::RenderPass::from_raw(10),
            shadow_framebuffer: vk::Framebuffer::from_raw(11),
            shadow_extent: vk::Extent2D { width: 512, height: 512 },
            main: MainPassTarget {
                render_pass: vk::RenderPass::from_raw(20),
                framebuffer: vk::Framebuffer::from_raw(21),
                extent: vk::Extent2D { width: 800, height: 600 },
            },
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Draw whose index buffer handle and index count both identify it
    fn draw(id: u32, role: DrawRole) -> DrawCall {
        DrawCall {
            vertex_buffers: vec![vk::Buffer::from_raw(1000); 5],
            index_buffer: vk::Buffer::from_raw(u64::from(id)),
            index_count: id,
            texture_set: vk::DescriptorSet::from_raw(500 + u64::from(id)),
            transform: Transform::identity(),
            role,
        }
    }

    fn drawn_between(commands: &[Command], start: usize, end: usize) -> Vec<u32> {
        commands[start..end]
            .iter()
            .filter_map(|command| match command {
                Command::DrawIndexed(count) => Some(*count),
                _ => None,
            })
            .collect()
    }

    fn pass_bounds(commands: &[Command]) -> Vec<(usize, usize)> {
        let begins = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::BeginPass(..)))
            .map(|(i, _)| i);
        let ends = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::EndPass))
            .map(|(i, _)| i);
        begins.zip(ends).collect()
    }

    fn scene() -> Vec<DrawCall> {
        // skybox registered first on purpose
        vec![
            draw(4, DrawRole::Skybox),
            draw(1, DrawRole::Model),
            draw(2, DrawRole::Model),
            draw(3, DrawRole::Plane),
        ]
    }

    #[test]
    fn test_frame_brackets_two_passes() {
        let mut recorder = FakeRecorder::default();
        let uniform_set = vk::DescriptorSet::from_raw(99);
        record_frame(&mut recorder, &targets(), &handles(), uniform_set, &scene()).unwrap();

        let commands = &recorder.commands;
        assert_eq!(commands[0], Command::Reset);
        assert_eq!(commands[1], Command::Begin);
        assert_eq!(commands.last(), Some(&Command::End));

        let passes = pass_bounds(commands);
        assert_eq!(passes.len(), 2);
        assert_eq!(commands[passes[0].0], Command::BeginPass(vk::RenderPass::from_raw(10), 1));
        assert_eq!(commands[passes[1].0], Command::BeginPass(vk::RenderPass::from_raw(20), 2));
        assert!(passes[0].1 < passes[1].0);
    }

    #[test]
    fn test_shadow_pass_draws_only_casters() {
        let mut recorder = FakeRecorder::default();
        record_frame(&mut recorder, &targets(), &handles(), vk::DescriptorSet::null(), &scene()).unwrap();

        let passes = pass_bounds(&recorder.commands);
        assert_eq!(drawn_between(&recorder.commands, passes[0].0, passes[0].1), vec![1, 2]);

        let shadow = &recorder.commands[passes[0].0..passes[0].1];
        assert!(shadow.contains(&Command::BindPipeline(vk::Pipeline::from_raw(2))));
        assert!(shadow.contains(&Command::BindVertexBuffers(1)));
        assert!(!shadow.contains(&Command::BindVertexBuffers(5)));
    }

    #[test]
    fn test_main_pass_draws_skybox_last() {
        let mut recorder = FakeRecorder::default();
        record_frame(&mut recorder, &targets(), &handles(), vk::DescriptorSet::null(), &scene()).unwrap();

        let passes = pass_bounds(&recorder.commands);
        assert_eq!(drawn_between(&recorder.commands, passes[1].0, passes[1].1), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_uniform_set_bound_per_pipeline() {
        let mut recorder = FakeRecorder::default();
        let uniform_set = vk::DescriptorSet::from_raw(99);
        record_frame(&mut recorder, &targets(), &handles(), uniform_set, &scene()).unwrap();

        for pipeline in [handles().light, handles().model, handles().skybox] {
            assert!(recorder
                .commands
                .contains(&Command::BindSet(pipeline.layout, 0, uniform_set)));
        }
        // texture sets for the two models, the plane and the skybox
        let texture_binds = recorder
            .commands
            .iter()
            .filter(|c| matches!(c, Command::BindSet(_, 1, _)))
            .count();
        assert_eq!(texture_binds, 4);
    }

    #[test]
    fn test_models_push_model_matrix() {
        let mut recorder = FakeRecorder::default();
        record_frame(&mut recorder, &targets(), &handles(), vk::DescriptorSet::null(), &scene()).unwrap();

        // two casters in the shadow pass, three lit objects in the colour pass
        let pushes = recorder
            .commands
            .iter()
            .filter(|c| **c == Command::PushConstants(64))
            .count();
        assert_eq!(pushes, 5);
    }

    #[test]
    fn test_empty_scene_still_clears_both_passes() {
        let mut recorder = FakeRecorder::default();
        record_frame(&mut recorder, &targets(), &handles(), vk::DescriptorSet::null(), &[]).unwrap();

        assert_eq!(pass_bounds(&recorder.commands).len(), 2);
        assert!(!recorder
            .commands
            .iter()
            .any(|c| matches!(c, Command::DrawIndexed(_))));
        assert!(!recorder
            .commands
            .contains(&Command::BindPipeline(vk::Pipeline::from_raw(3))));
    }

    #[test]
    fn test_failed_end_surfaces_after_both_passes_closed() {
        let mut recorder = FakeRecorder::failing_at(2);
        let err = record_frame(&mut recorder, &targets(), &handles(), vk::DescriptorSet::null(), &scene()).unwrap_err();

        assert!(matches!(err, VulkanError::CommandRecordingFailed(_)));
        assert_eq!(recorder.count(|c| matches!(c, Command::BeginPass(..))), 2);
        assert_eq!(recorder.count(|c| *c == Command::EndPass), 2);
        assert_eq!(recorder.count(|c| *c == Command::End), 0);
    }

    #[test]
    fn test_failed_begin_records_no_pass() {
        let mut recorder = FakeRecorder::failing_at(1);
        let err = record_frame(&mut recorder, &targets(), &handles(), vk::DescriptorSet::null(), &scene()).unwrap_err();

        assert!(matches!(err, VulkanError::CommandRecordingFailed(_)));
        assert_eq!(recorder.commands, vec![Command::Reset]);
    }

    #[test]
    fn test_error_inside_pass_still_ends_it() {
        fn shadow_then_fail<R: RenderCommands>(recorder: &mut R, targets: &PassTargets) -> VulkanResult<()> {
            let mut pass = recorder.begin_render_pass(
                targets.shadow_pass,
                targets.shadow_framebuffer,
                full_area(targets.shadow_extent),
                &[],
            );
            pass.cmd_bind_pipeline(vk::Pipeline::from_raw(2));
            pass.end()?;
            pass.cmd_draw_indexed(3);
            Ok(())
        }

        let mut recorder = FakeRecorder::failing_at(0);
        assert!(shadow_then_fail(&mut recorder, &targets()).is_err());
        assert_eq!(
            recorder.commands,
            vec![
                Command::BeginPass(vk::RenderPass::from_raw(10), 0),
                Command::BindPipeline(vk::Pipeline::from_raw(2)),
                Command::EndPass,
            ]
        );
    }
}
