//! # Scene Renderer
//!
//! Vulkan rendering core for a fixed, shadow-lit scene: device memory pools,
//! a staging/upload pipeline, GPU resource objects, the swapchain frame
//! lifecycle and a two-pass (shadow depth + colour) command orchestrator.
//!
//! ## Layout
//!
//! - [`config`] / [`core`]: serializable renderer configuration
//! - [`foundation`]: logging setup
//! - [`render::backends::vulkan`]: everything that talks to the device
//!
//! Windowing, camera math and asset decoding live with the application; the
//! renderer consumes ready-made [`MeshData`], [`PixelData`] and a per-frame
//! [`SceneUniform`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

pub use render::backends::vulkan::{
    resources::mesh::MeshData,
    resources::texture::PixelData,
    resources::uniform::SceneUniform,
    scene::renderer::{FrameOutcome, SceneRenderer},
    VulkanContext, VulkanError, VulkanResult,
};

/// Commonly used types for applications driving the renderer
pub mod prelude {
    pub use crate::{
        core::config::{FrameConfig, MemoryConfig, RendererConfig, ShaderConfig, ShadowConfig, TextureEncoding},
        config::{Config, ConfigError},
        render::backends::vulkan::{
            initialization::surface::SurfaceSource,
            resources::mesh::MeshData,
            resources::texture::PixelData,
            resources::uniform::SceneUniform,
            scene::drawable::{DrawRole, Transform},
            scene::renderer::{FrameOutcome, SceneRenderer},
            state::swapchain::Swapchain,
            VulkanContext, VulkanError, VulkanResult,
        },
    };
}
