//! GPU resource objects: buffers, images, textures, meshes, uniforms and descriptors

pub mod buffer;
pub mod descriptor_set;
pub mod image;
pub mod mesh;
pub mod sampler;
pub mod texture;
pub mod uniform;
