//! # Renderer Configuration
//!
//! All tunables of the renderer in one serializable tree: memory pool sizes,
//! shader locations, shadow map parameters and frame pacing. Every struct
//! follows the same pattern: `Default` gives working values, `with_*`
//! builders adjust them, `validate` rejects nonsense before any device work
//! starts.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};

const MIB: u64 = 1024 * 1024;

/// How the bytes of colour textures are read when sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureEncoding {
    /// sRGB-encoded bytes, decoded to linear by the sampler
    #[default]
    Srgb,
    /// Bytes used as stored
    Linear,
}

/// # Memory Pool Configuration
///
/// Sizes of the three pools owned by the memory system. The staging pool is
/// reset after every upload batch, the uniform pool lives as long as the
/// renderer, and the resident pool grows in `device_block_size` steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Size in bytes of the host-visible staging block
    pub staging_pool_size: u64,
    /// Size in bytes of the host-visible block holding persistently mapped uniforms
    pub uniform_pool_size: u64,
    /// Minimum size in bytes of each device-local block
    pub device_block_size: u64,
    /// Optional cap on total device-local bytes reserved by the resident pool
    pub device_budget: Option<u64>,
}

impl MemoryConfig {
    /// Set the staging pool size
    pub fn with_staging_pool_size(mut self, bytes: u64) -> Self {
        self.staging_pool_size = bytes;
        self
    }

    /// Set the uniform pool size
    pub fn with_uniform_pool_size(mut self, bytes: u64) -> Self {
        self.uniform_pool_size = bytes;
        self
    }

    /// Set the device-local block size
    pub fn with_device_block_size(mut self, bytes: u64) -> Self {
        self.device_block_size = bytes;
        self
    }

    /// Cap the resident pool
    pub fn with_device_budget(mut self, bytes: u64) -> Self {
        self.device_budget = Some(bytes);
        self
    }

    /// Validate pool sizes
    pub fn validate(&self) -> Result<(), String> {
        if self.staging_pool_size == 0 {
            return Err("Staging pool size must be non-zero".to_string());
        }
        if self.uniform_pool_size == 0 {
            return Err("Uniform pool size must be non-zero".to_string());
        }
        if self.device_block_size == 0 {
            return Err("Device block size must be non-zero".to_string());
        }
        if let Some(budget) = self.device_budget {
            if budget < self.device_block_size {
                return Err(format!(
                    "Device budget ({budget} bytes) is smaller than one device block ({} bytes)",
                    self.device_block_size
                ));
            }
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            staging_pool_size: 64 * MIB,
            uniform_pool_size: MIB,
            device_block_size: 64 * MIB,
            device_budget: None,
        }
    }
}

/// # Shader Configuration
///
/// SPIR-V locations for the three pipelines. The depth-only pipeline has no
/// fragment stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Lit, textured, shadowed model vertex shader
    pub model_vertex: String,
    /// Lit, textured, shadowed model fragment shader
    pub model_fragment: String,
    /// Light-space depth vertex shader
    pub depth_vertex: String,
    /// Skybox vertex shader
    pub skybox_vertex: String,
    /// Skybox fragment shader
    pub skybox_fragment: String,
}

impl ShaderConfig {
    /// Directories searched, in order, when resolving shader paths
    pub const SEARCH_DIRS: [&'static str; 5] = [
        "target/shaders/",
        "shaders/",
        "resources/shaders/",
        "../target/shaders/",
        "./",
    ];

    /// Create shader config with automatic path resolution
    ///
    /// Each file name is looked up in [`Self::SEARCH_DIRS`]; names that are not
    /// found anywhere fall back to `target/shaders/<name>` so the error message
    /// from [`Self::validate`] points at the build output.
    pub fn with_path_resolution(
        model_vertex: &str,
        model_fragment: &str,
        depth_vertex: &str,
        skybox_vertex: &str,
        skybox_fragment: &str,
    ) -> Self {
        Self {
            model_vertex: Self::resolve(model_vertex),
            model_fragment: Self::resolve(model_fragment),
            depth_vertex: Self::resolve(depth_vertex),
            skybox_vertex: Self::resolve(skybox_vertex),
            skybox_fragment: Self::resolve(skybox_fragment),
        }
    }

    fn resolve(file_name: &str) -> String {
        Self::SEARCH_DIRS
            .iter()
            .map(|dir| format!("{dir}{file_name}"))
            .find(|candidate| Path::new(candidate).exists())
            .unwrap_or_else(|| format!("target/shaders/{file_name}"))
    }

    fn paths(&self) -> [&str; 5] {
        [
            &self.model_vertex,
            &self.model_fragment,
            &self.depth_vertex,
            &self.skybox_vertex,
            &self.skybox_fragment,
        ]
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        for path in self.paths() {
            if !Path::new(path).exists() {
                return Err(format!("Shader not found: {path}"));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution(
            "model.vert.spv",
            "model.frag.spv",
            "depth.vert.spv",
            "skybox.vert.spv",
            "skybox.frag.spv",
        )
    }
}

/// # Shadow Map Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Width and height of the square light depth target
    pub map_size: u32,
    /// Constant depth bias applied while rendering the depth pass
    pub depth_bias_constant: f32,
    /// Slope-scaled depth bias applied while rendering the depth pass
    pub depth_bias_slope: f32,
}

impl ShadowConfig {
    /// Set the shadow map resolution
    pub fn with_map_size(mut self, size: u32) -> Self {
        self.map_size = size;
        self
    }

    /// Validate shadow settings
    pub fn validate(&self) -> Result<(), String> {
        if self.map_size == 0 || self.map_size > 8192 {
            return Err(format!("Shadow map size must be in 1..=8192, got {}", self.map_size));
        }
        if self.depth_bias_constant < 0.0 || self.depth_bias_slope < 0.0 {
            return Err("Depth bias factors must not be negative".to_string());
        }
        Ok(())
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: 512,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
        }
    }
}

/// # Frame Pacing Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Upper bound in milliseconds on waiting for a presentable image
    pub acquire_timeout_ms: u64,
    /// Upper bound in milliseconds on waiting for a fence (frame reuse or upload)
    pub fence_timeout_ms: u64,
    /// Prefer FIFO presentation
    pub vsync: bool,
    /// Colour the main pass clears to
    pub clear_color: [f32; 4],
}

impl FrameConfig {
    /// Set the acquire timeout
    pub fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    /// Enable or disable vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Acquire timeout in nanoseconds, as Vulkan expects it
    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms.saturating_mul(1_000_000)
    }

    /// Fence timeout in nanoseconds
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }

    /// Validate frame settings
    pub fn validate(&self) -> Result<(), String> {
        if self.acquire_timeout_ms == 0 {
            return Err("Acquire timeout must be at least 1 ms".to_string());
        }
        if self.fence_timeout_ms == 0 {
            return Err("Fence timeout must be at least 1 ms".to_string());
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err("Clear colour components must be within 0..=1".to_string());
        }
        Ok(())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 1000,
            fence_timeout_ms: 10_000,
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// # Renderer Configuration
///
/// Top-level settings handed to [`crate::SceneRenderer`] and the device
/// context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers (auto-detected when `None`)
    pub enable_validation: Option<bool>,
    /// Maximum anisotropy requested for colour texture sampling
    pub max_anisotropy: f32,
    /// Encoding of colour texture bytes
    #[serde(default)]
    pub texture_encoding: TextureEncoding,
    /// Memory pool sizes
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Shader locations
    #[serde(default)]
    pub shaders: ShaderConfig,
    /// Shadow map settings
    #[serde(default)]
    pub shadow: ShadowConfig,
    /// Frame pacing settings
    #[serde(default)]
    pub frame: FrameConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: None,
            max_anisotropy: 16.0,
            texture_encoding: TextureEncoding::default(),
            memory: MemoryConfig::default(),
            shaders: ShaderConfig::default(),
            shadow: ShadowConfig::default(),
            frame: FrameConfig::default(),
        }
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set memory pool configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set shadow configuration
    pub fn with_shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = shadow;
        self
    }

    /// Set frame configuration
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Set how colour texture bytes are read
    pub fn with_texture_encoding(mut self, encoding: TextureEncoding) -> Self {
        self.texture_encoding = encoding;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate everything that can be checked without touching the disk
    ///
    /// Shader files are checked separately with [`ShaderConfig::validate`].
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if !(1.0..=16.0).contains(&self.max_anisotropy) {
            return Err(format!("Max anisotropy must be in 1..=16, got {}", self.max_anisotropy));
        }
        self.memory.validate()?;
        self.shadow.validate()?;
        self.frame.validate()?;
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Dragons")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_defaults_validate() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = RendererConfig::default().with_memory(MemoryConfig::default().with_staging_pool_size(0));
        assert!(config.validate().is_err());

        let config = RendererConfig::default().with_shadow(ShadowConfig::default().with_map_size(0));
        assert!(config.validate().is_err());

        let config = RendererConfig::default().with_frame(FrameConfig::default().with_acquire_timeout_ms(0));
        assert!(config.validate().is_err());

        let memory = MemoryConfig::default().with_device_block_size(64 * MIB).with_device_budget(MIB);
        assert!(memory.validate().is_err());
    }

    /// Both on-disk formats carry every field
    #[test]
    fn test_toml_and_ron_round_trip() {
        let config = RendererConfig::new("roundtrip")
            .with_validation(false)
            .with_memory(MemoryConfig::default().with_device_budget(512 * MIB))
            .with_frame(FrameConfig::default().with_vsync(false))
            .with_texture_encoding(TextureEncoding::Linear);

        for format in [ConfigFormat::Toml, ConfigFormat::Ron] {
            let text = config.to_string_as(format).unwrap();
            let parsed = RendererConfig::from_str_as(&text, format).unwrap();
            assert_eq!(parsed, config);
        }
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let text = r#"
            application_name = "partial"
            max_anisotropy = 8.0

            [shaders]
            model_vertex = "a.spv"
            model_fragment = "b.spv"
            depth_vertex = "c.spv"
            skybox_vertex = "d.spv"
            skybox_fragment = "e.spv"
        "#;
        let parsed = RendererConfig::from_str_as(text, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed.memory, MemoryConfig::default());
        assert_eq!(parsed.shadow.map_size, 512);
        assert_eq!(parsed.frame.acquire_timeout_ns(), 1_000_000_000);
        assert_eq!(parsed.texture_encoding, TextureEncoding::Srgb);
    }

    #[test]
    fn test_texture_encoding_from_toml() {
        let text = "application_name = \"linear\"\nmax_anisotropy = 4.0\ntexture_encoding = \"linear\"\n";
        let parsed = RendererConfig::from_str_as(text, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed.texture_encoding, TextureEncoding::Linear);
        assert!(RendererConfig::from_str_as(
            "application_name = \"x\"\nmax_anisotropy = 4.0\ntexture_encoding = \"gamma\"\n",
            ConfigFormat::Toml
        )
        .is_err());
    }
}
