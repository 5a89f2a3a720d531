//! Scene objects and the draw calls they produce

use ash::vk;

use crate::render::backends::vulkan::rendering::commands::{CommandRecorder, RenderCommands};
use crate::render::backends::vulkan::rendering::pipelines::PUSH_CONSTANT_STAGES;
use crate::render::backends::vulkan::resources::mesh::Mesh;
use crate::render::backends::vulkan::resources::texture::Texture;
use crate::render::backends::vulkan::resources::uniform::{Mat4, IDENTITY};
use crate::render::backends::vulkan::upload::staging::StagingOwner;
use crate::render::backends::vulkan::VulkanResult;

/// Model matrix pushed as the per-draw constant
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Column-major model matrix
    pub matrix: Mat4,
}

unsafe impl bytemuck::Pod for Transform {}
unsafe impl bytemuck::Zeroable for Transform {}

impl Transform {
    /// Identity transform
    pub fn identity() -> Self {
        Self { matrix: IDENTITY }
    }

    /// Wrap an existing column-major matrix
    pub fn from_matrix(matrix: Mat4) -> Self {
        Self { matrix }
    }

    /// Uniform scale followed by a translation
    pub fn from_scale_translation(scale: f32, translation: [f32; 3]) -> Self {
        let mut matrix = IDENTITY;
        matrix[0][0] = scale;
        matrix[1][1] = scale;
        matrix[2][2] = scale;
        matrix[3][0] = translation[0];
        matrix[3][1] = translation[1];
        matrix[3][2] = translation[2];
        Self { matrix }
    }

    /// Bytes for `vkCmdPushConstants`
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// How a drawable takes part in the two passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawRole {
    /// Lit, textured, casts shadows
    Model,
    /// Lit and textured ground that receives shadows but does not cast them
    Plane,
    /// Cubemap background drawn last
    Skybox,
}

impl DrawRole {
    /// Whether the object is drawn into the shadow map
    pub fn casts_shadow(self) -> bool {
        self == Self::Model
    }
}

/// A mesh, its texture and where it sits in the scene
pub struct Drawable {
    mesh: Mesh,
    texture: Texture,
    transform: Transform,
    role: DrawRole,
}

impl Drawable {
    /// Combine a mesh and texture into an object with `role`
    pub fn new(mesh: Mesh, texture: Texture, transform: Transform, role: DrawRole) -> Self {
        Self {
            mesh,
            texture,
            transform,
            role,
        }
    }

    /// Record the staging copies of the mesh and the texture
    pub fn upload(&self, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        self.mesh.upload(recorder)?;
        self.texture.upload_data(recorder)
    }

    /// Role in the passes
    pub fn role(&self) -> DrawRole {
        self.role
    }

    /// Current model transform
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Replace the model transform
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Texture sampled in the colour pass
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Mesh drawn in both passes
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Snapshot of everything needed to draw this object
    pub fn draw_call(&self, texture_set: vk::DescriptorSet) -> DrawCall {
        DrawCall {
            vertex_buffers: self.mesh.vertex_buffers(),
            index_buffer: self.mesh.index_buffer(),
            index_count: self.mesh.index_count(),
            texture_set,
            transform: self.transform,
            role: self.role,
        }
    }
}

impl StagingOwner for Drawable {
    fn destroy_staging(&mut self) {
        self.mesh.destroy_staging();
        self.texture.destroy_staging();
    }

    fn has_staging(&self) -> bool {
        self.mesh.has_staging() || self.texture.has_staging()
    }
}

/// Plain handles for one object's draw
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    /// One buffer per vertex attribute, position first
    pub vertex_buffers: Vec<vk::Buffer>,
    /// `u32` index buffer
    pub index_buffer: vk::Buffer,
    /// Indices to draw
    pub index_count: u32,
    /// Set 1 (colour texture or cubemap)
    pub texture_set: vk::DescriptorSet,
    /// Model matrix
    pub transform: Transform,
    /// Role in the passes
    pub role: DrawRole,
}

impl DrawCall {
    /// Positions only, model matrix pushed, for the shadow pass
    pub fn record_depth<R: RenderCommands>(&self, recorder: &mut R, layout: vk::PipelineLayout) {
        recorder.cmd_bind_vertex_buffers(0, &self.vertex_buffers[..1]);
        recorder.cmd_bind_index_buffer(self.index_buffer);
        recorder.cmd_push_constants(layout, PUSH_CONSTANT_STAGES, self.transform.as_bytes());
        recorder.cmd_draw_indexed(self.index_count);
    }

    /// Every attribute with the texture set bound, for the colour pass
    pub fn record_lit<R: RenderCommands>(&self, recorder: &mut R, layout: vk::PipelineLayout) {
        recorder.cmd_bind_descriptor_set(layout, 1, self.texture_set);
        recorder.cmd_bind_vertex_buffers(0, &self.vertex_buffers);
        recorder.cmd_bind_index_buffer(self.index_buffer);
        recorder.cmd_push_constants(layout, PUSH_CONSTANT_STAGES, self.transform.as_bytes());
        recorder.cmd_draw_indexed(self.index_count);
    }

    /// Positions and the cubemap set, for the skybox
    pub fn record_skybox<R: RenderCommands>(&self, recorder: &mut R, layout: vk::PipelineLayout) {
        recorder.cmd_bind_descriptor_set(layout, 1, self.texture_set);
        recorder.cmd_bind_vertex_buffers(0, &self.vertex_buffers[..1]);
        recorder.cmd_bind_index_buffer(self.index_buffer);
        recorder.cmd_draw_indexed(self.index_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_translation_is_column_major() {
        let transform = Transform::from_scale_translation(0.5, [-0.1, 0.0, -0.25]);
        assert_eq!(transform.matrix[0][0], 0.5);
        assert_eq!(transform.matrix[2][2], 0.5);
        assert_eq!(transform.matrix[3][0], -0.1);
        assert_eq!(transform.matrix[3][2], -0.25);
        assert_eq!(transform.matrix[3][3], 1.0);
    }

    #[test]
    fn test_transform_fills_push_constant_block() {
        let transform = Transform::identity();
        assert_eq!(transform.as_bytes().len(), 64);
    }

    #[test]
    fn test_only_models_cast_shadows() {
        assert!(DrawRole::Model.casts_shadow());
        assert!(!DrawRole::Plane.casts_shadow());
        assert!(!DrawRole::Skybox.casts_shadow());
    }
}
