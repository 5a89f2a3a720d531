//! Vulkan backend implementation
//!
//! Organized bottom-up: initialization and memory, the upload pipeline,
//! resource objects, command recording, frame state, and the scene layer that
//! ties them into a renderer.

/// Vulkan initialization types (context, surface seam)
pub mod initialization;

/// Device memory pools
pub mod memory;

/// Staging, layout transitions and mip generation
pub mod upload;

/// Vulkan resource objects (buffers, images, textures, meshes, descriptors)
pub mod resources;

/// Vulkan rendering operations (commands, shaders, pipelines, render passes)
pub mod rendering;

/// Swapchain, offscreen targets, synchronization and per-frame state
pub mod state;

/// Drawables, the shadow pass and the frame orchestrator
pub mod scene;

// Re-export core initialization types
pub use initialization::context::{PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanResult};

// Re-export resource types
pub use resources::buffer::Buffer;
pub use resources::mesh::{Mesh, MeshData};
pub use resources::texture::{PixelData, Texture};
pub use resources::uniform::SceneUniform;

// Re-export rendering types
pub use rendering::commands::{ActiveRenderPass, CommandPool, CommandRecorder, RenderCommands};

// Re-export state types
pub use state::swapchain::Swapchain;
pub use state::sync::{Fence, Semaphore};
pub use state::offscreen::OffscreenTarget;
pub use state::targets::PresentTarget;

// Re-export scene types
pub use scene::drawable::{DrawRole, Transform};
pub use scene::renderer::{DrawableId, FrameOutcome, SceneRenderer};
