//! Per-frame scene uniform block and its persistently mapped buffer

use ash::{vk, Device};
use std::marker::PhantomData;

use crate::render::backends::vulkan::memory::{MemoryUsage, SharedMemory};
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::VulkanResult;

/// Column-major 4x4 matrix as laid out in std140
pub type Mat4 = [[f32; 4]; 4];

/// 4x4 identity
pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Camera and light state shared by every shader stage, written once per frame
///
/// Must match the `Scene` uniform block in the shaders (std140).
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneUniform {
    /// Camera projection
    pub cam_projection: Mat4,
    /// Camera view
    pub cam_view: Mat4,
    /// Camera view without translation, for the skybox
    pub cam_rotation_only_view: Mat4,
    /// Inverse of `cam_view`
    pub cam_view_inverse: Mat4,
    /// Light projection for shadow lookups
    pub light_projection: Mat4,
    /// Light view for shadow lookups
    pub light_view: Mat4,
    /// World-space light position, w unused
    pub light_position: [f32; 4],
    /// Ambient intensity
    pub light_ia: [f32; 4],
    /// Diffuse intensity
    pub light_id: [f32; 4],
    /// Specular intensity
    pub light_is: [f32; 4],
    /// Specular exponent
    pub light_shininess: f32,
    /// Pads the block to 464 bytes
    pub _padding: [f32; 3],
}

unsafe impl bytemuck::Pod for SceneUniform {}
unsafe impl bytemuck::Zeroable for SceneUniform {}

impl Default for SceneUniform {
    fn default() -> Self {
        Self {
            cam_projection: IDENTITY,
            cam_view: IDENTITY,
            cam_rotation_only_view: IDENTITY,
            cam_view_inverse: IDENTITY,
            light_projection: IDENTITY,
            light_view: IDENTITY,
            light_position: [0.0, 0.0, 0.0, 1.0],
            light_ia: [0.1, 0.1, 0.1, 0.0],
            light_id: [1.0, 1.0, 1.0, 0.0],
            light_is: [1.0, 1.0, 1.0, 0.0],
            light_shininess: 32.0,
            _padding: [0.0; 3],
        }
    }
}

/// A uniform buffer from the persistent uniform pool holding one `T`
pub struct UniformBuffer<T: bytemuck::Pod> {
    buffer: Buffer,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> UniformBuffer<T> {
    /// Allocate and initialise with `initial`
    pub fn new(device: Device, memory: &SharedMemory, initial: &T) -> VulkanResult<Self> {
        let buffer = Buffer::with_data(
            device,
            memory,
            bytemuck::bytes_of(initial),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::Uniform,
        )?;
        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    /// Overwrite the mapped contents
    pub fn update(&self, value: &T) -> VulkanResult<()> {
        self.buffer.write(0, bytemuck::bytes_of(value))
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size of `T` in bytes
    pub fn range(&self) -> vk::DeviceSize {
        std::mem::size_of::<T>() as vk::DeviceSize
    }

    /// Descriptor info covering the whole block
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.handle(),
            offset: 0,
            range: self.range(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn test_std140_layout() {
        assert_eq!(size_of::<SceneUniform>(), 464);
        assert_eq!(align_of::<SceneUniform>(), 16);

        let uniform = SceneUniform::default();
        let base = std::ptr::addr_of!(uniform) as usize;
        let offset = |field: usize| field - base;
        assert_eq!(offset(std::ptr::addr_of!(uniform.cam_view) as usize), 64);
        assert_eq!(offset(std::ptr::addr_of!(uniform.light_view) as usize), 320);
        assert_eq!(offset(std::ptr::addr_of!(uniform.light_position) as usize), 384);
        assert_eq!(offset(std::ptr::addr_of!(uniform.light_is) as usize), 432);
        assert_eq!(offset(std::ptr::addr_of!(uniform.light_shininess) as usize), 448);
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut uniform = SceneUniform::default();
        uniform.light_shininess = 7.5;
        uniform.light_position = [2.0, 1.5, 2.0, 1.0];
        let bytes = bytemuck::bytes_of(&uniform).to_vec();
        let back: SceneUniform = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(back, uniform);
    }
}
