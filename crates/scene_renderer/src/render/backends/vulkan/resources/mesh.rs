//! Meshes with one device-local buffer per vertex attribute
//!
//! Attributes live in separate buffers bound to consecutive vertex bindings:
//! position (0), normal (1), tangent (2), binormal (3), texcoord (4). Indices
//! are `u32`.

use ash::{vk, Device};

use crate::render::backends::vulkan::memory::{MemoryUsage, SharedMemory};
use crate::render::backends::vulkan::rendering::commands::CommandRecorder;
use crate::render::backends::vulkan::resources::buffer::Buffer;
use crate::render::backends::vulkan::upload::staging::{stage_bytes, staged, StagingOwner};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Number of per-vertex attribute buffers
pub const ATTRIBUTE_COUNT: usize = 5;

/// CPU-side mesh with parallel attribute arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertex positions
    pub positions: Vec<[f32; 3]>,
    /// Vertex normals
    pub normals: Vec<[f32; 3]>,
    /// Tangents along +U
    pub tangents: Vec<[f32; 3]>,
    /// Binormals along +V
    pub binormals: Vec<[f32; 3]>,
    /// Texture coordinates
    pub texcoords: Vec<[f32; 2]>,
    /// Triangle list indices
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit cube around the origin, positions only; used for the skybox
    pub fn cube() -> Self {
        let positions = vec![
            [-1.0, -1.0, -1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 1, 2, 2, 3, 0, // -Z
            5, 4, 7, 7, 6, 5, // +Z
            4, 0, 3, 3, 7, 4, // -X
            1, 5, 6, 6, 2, 1, // +X
            3, 2, 6, 6, 7, 3, // +Y
            4, 5, 1, 1, 0, 4, // -Y
        ];
        let count = positions.len();
        Self {
            positions,
            normals: vec![[0.0; 3]; count],
            tangents: vec![[0.0; 3]; count],
            binormals: vec![[0.0; 3]; count],
            texcoords: vec![[0.0; 2]; count],
            indices,
        }
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Check that attributes are parallel and indices form in-range triangles
    pub fn validate(&self) -> VulkanResult<()> {
        let count = self.positions.len();
        if count == 0 || self.indices.is_empty() {
            return Err(VulkanError::invalid("Mesh has no vertices or no indices"));
        }
        let lengths = [
            self.normals.len(),
            self.tangents.len(),
            self.binormals.len(),
            self.texcoords.len(),
        ];
        if lengths.iter().any(|&len| len != count) {
            return Err(VulkanError::invalid(format!(
                "Mesh attribute lengths {lengths:?} do not match {count} positions"
            )));
        }
        if self.indices.len() % 3 != 0 {
            return Err(VulkanError::invalid("Index count is not a multiple of 3"));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(VulkanError::invalid(format!(
                "Index {bad} out of range for {count} vertices"
            )));
        }
        Ok(())
    }

    fn attribute_bytes(&self) -> [&[u8]; ATTRIBUTE_COUNT] {
        [
            bytemuck::cast_slice(&self.positions),
            bytemuck::cast_slice(&self.normals),
            bytemuck::cast_slice(&self.tangents),
            bytemuck::cast_slice(&self.binormals),
            bytemuck::cast_slice(&self.texcoords),
        ]
    }
}

/// A mesh resident on the device
pub struct Mesh {
    staging: Vec<Buffer>,
    attributes: Vec<Buffer>,
    indices: Buffer,
    index_count: u32,
}

impl Mesh {
    /// Stage `data` and create the device-local buffers it will be copied into
    ///
    /// On failure every buffer created so far is dropped and the staging
    /// space is given back.
    pub fn new(device: &Device, memory: &SharedMemory, data: &MeshData) -> VulkanResult<Self> {
        data.validate()?;
        staged(memory, || Self::stage(device, memory, data))
    }

    fn stage(device: &Device, memory: &SharedMemory, data: &MeshData) -> VulkanResult<Self> {

        let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);
        let mut staging = Vec::with_capacity(ATTRIBUTE_COUNT + 1);
        let mut attributes = Vec::with_capacity(ATTRIBUTE_COUNT);

        for bytes in data.attribute_bytes() {
            staging.push(stage_bytes(device, memory, bytes)?);
            attributes.push(Buffer::new(
                device.clone(),
                memory,
                bytes.len() as vk::DeviceSize,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryUsage::Resident,
            )?);
        }

        staging.push(stage_bytes(device, memory, index_bytes)?);
        let indices = Buffer::new(
            device.clone(),
            memory,
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::Resident,
        )?;

        log::debug!(
            "Staged mesh: {} vertices, {} indices",
            data.vertex_count(),
            data.indices.len()
        );

        Ok(Self {
            staging,
            attributes,
            indices,
            index_count: data.indices.len() as u32,
        })
    }

    /// Record staging copies and the barrier making them visible to vertex input
    pub fn upload(&self, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        if self.staging.is_empty() {
            return Err(VulkanError::invalid("Mesh staging already released; cannot upload again"));
        }

        let targets = self.attributes.iter().chain(std::iter::once(&self.indices));
        let mut barriers = Vec::with_capacity(ATTRIBUTE_COUNT + 1);
        for (src, dst) in self.staging.iter().zip(targets) {
            recorder.copy_buffer(src.handle(), dst.handle(), dst.size())?;
            barriers.push(
                vk::BufferMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(dst.handle())
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build(),
            );
        }

        recorder.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::VERTEX_INPUT,
            &barriers,
            &[],
        )
    }

    /// Handles of the attribute buffers, in binding order
    pub fn vertex_buffers(&self) -> Vec<vk::Buffer> {
        self.attributes.iter().map(Buffer::handle).collect()
    }

    /// Handle of the position buffer alone
    pub fn position_buffer(&self) -> vk::Buffer {
        self.attributes[0].handle()
    }

    /// Handle of the index buffer
    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.handle()
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl StagingOwner for Mesh {
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

    fn triangle() -> MeshData {
        MeshData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            tangents: vec![[1.0, 0.0, 0.0]; 3],
            binormals: vec![[0.0, 1.0, 0.0]; 3],
            texcoords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_valid_triangle() {
        assert!(triangle().validate().is_ok());
    }

    #[test]
    fn test_mismatched_attributes_rejected() {
        let mut mesh = triangle();
        mesh.texcoords.pop();
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let mut mesh = triangle();
        mesh.indices[2] = 3;
        assert!(matches!(mesh.validate(), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_partial_triangle_rejected() {
        let mut mesh = triangle();
        mesh.indices.push(0);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_cube_is_closed() {
        let cube = MeshData::cube();
        assert!(cube.validate().is_ok());
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.indices.len(), 36);
        for v in 0..8 {
            assert!(cube.indices.contains(&v));
        }
    }

    #[test]
    fn test_attribute_bytes_sizes() {
        let mesh = triangle();
        let sizes: Vec<usize> = mesh.attribute_bytes().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![36, 36, 36, 36, 24]);
    }
}
