//! The dragons demo: three shadowed models and a skybox
//!
//! Arrow keys orbit the camera, `V` toggles vsync and `Escape` quits.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ash::vk;
use nalgebra::{Matrix4, Vector3};
use scene_renderer::config::{Config, ConfigError};
use scene_renderer::prelude::{DrawRole, FrameOutcome, RendererConfig, SceneRenderer, Transform, VulkanContext};
use scene_renderer::render::backends::vulkan::DrawableId;
use scene_renderer::VulkanError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::image_loader::{load_cubemap_or_placeholder, load_or_placeholder};
use crate::assets::obj_loader::load_obj;
use crate::camera::{scene_uniform, to_mat4, Camera, Light};
use crate::window::{InputEvent, Window, WindowError};

/// Application errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Renderer error: {0}")]
    Renderer(#[from] VulkanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Dragons".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Everything the demo reads from `dragons.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the models, textures and cubemap
    pub resource_root: PathBuf,
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    pub window: WindowConfig,
    pub renderer: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            resource_root: PathBuf::from("resources"),
            fov_degrees: 45.0,
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

impl Config for AppConfig {}

/// Placement of one model in the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub scale: f32,
    pub position: [f32; 3],
    /// Rotation about +Y in radians
    pub yaw: f32,
}

impl Placement {
    pub const fn new(scale: f32, position: [f32; 3]) -> Self {
        Self {
            scale,
            position,
            yaw: 0.0,
        }
    }

    /// Translation, then rotation, then scale
    pub fn matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&Vector3::from(self.position))
            * Matrix4::from_axis_angle(&Vector3::y_axis(), self.yaw)
            * Matrix4::new_scaling(self.scale)
    }

    pub fn transform(&self) -> Transform {
        Transform::from_matrix(to_mat4(&self.matrix()))
    }
}

pub const DRAGON: Placement = Placement::new(0.5, [-0.1, 0.0, -0.25]);
pub const SUZANNE: Placement = Placement::new(0.25, [0.2, 0.0, 0.0]);
pub const PLANE: Placement = Placement::new(2.0, [0.0, -0.35, -0.5]);

/// Model files, texture files, role and placement of each scene object
const OBJECTS: [(&str, &str, DrawRole, Placement); 3] = [
    ("dragon.obj", "dragon_texture_color.png", DrawRole::Model, DRAGON),
    ("suzanne.obj", "suzanne_texture_color.png", DrawRole::Model, SUZANNE),
    ("plane.obj", "plane_texture_color.png", DrawRole::Plane, PLANE),
];

pub struct DragonsApp {
    // dropped before the window backing its surface
    renderer: SceneRenderer,
    window: Window,
    camera: Camera,
    light: Light,
    /// The spinning object, absent when its model failed to load
    suzanne: Option<DrawableId>,
    start_time: Instant,
    base_title: String,
}

impl DragonsApp {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        log::info!("Creating window...");
        let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;

        let context = VulkanContext::new(
            &mut window,
            &config.renderer.application_name,
            config.renderer.validation_enabled(),
        )?;
        log::info!("Using {}", context.physical_device().name());

        let (width, height) = window.get_framebuffer_size();
        let extent = vk::Extent2D { width, height };
        let mut renderer = SceneRenderer::new(context, config.renderer, extent)?;

        let suzanne = load_scene(&mut renderer, &config.resource_root)?;
        renderer.upload_resources()?;

        Ok(Self {
            renderer,
            window,
            camera: Camera::new(config.fov_degrees, width, height),
            light: Light::default(),
            suzanne,
            start_time: Instant::now(),
            base_title: config.window.title,
        })
    }

    pub fn run(&mut self) -> Result<(), AppError> {
        log::info!("Entering main loop");
        let mut frames = 0u32;
        let mut last_report = Instant::now();

        while !self.window.should_close() {
            for event in self.window.poll_input() {
                self.handle(event)?;
            }

            let time = self.start_time.elapsed().as_secs_f32();
            self.light.animate(time);
            if let Some(suzanne) = self.suzanne {
                self.renderer
                    .set_transform(suzanne, Placement { yaw: time, ..SUZANNE }.transform())?;
            }

            match self.renderer.render_frame(&scene_uniform(&self.camera, &self.light))? {
                FrameOutcome::Presented => frames += 1,
                FrameOutcome::Rebuilt => {
                    let extent = self.renderer.extent();
                    self.camera.set_size(extent.width, extent.height);
                }
                FrameOutcome::Timeout => log::warn!("Timed out waiting for a swapchain image"),
                FrameOutcome::Deferred => self.window.wait_events(),
            }

            let elapsed = last_report.elapsed().as_secs_f32();
            if elapsed >= 1.0 {
                let fps = frames as f32 / elapsed;
                let vsync = if self.renderer.vsync() { "on" } else { "off" };
                self.window
                    .set_title(&format!("{} - {fps:.0} fps (vsync {vsync})", self.base_title));
                frames = 0;
                last_report = Instant::now();
            }
        }

        log::info!("Main loop finished");
        Ok(())
    }

    fn handle(&mut self, event: InputEvent) -> Result<(), AppError> {
        match event {
            InputEvent::Close => self.window.set_should_close(true),
            InputEvent::ToggleVsync => {
                let enabled = self.renderer.toggle_vsync()?;
                log::info!("Vsync {}", if enabled { "enabled" } else { "disabled" });
            }
            InputEvent::Orbit { yaw, pitch } => self.camera.orbit(yaw, pitch),
            InputEvent::Resized { width, height } => {
                self.renderer.resize(vk::Extent2D { width, height })?;
                self.camera.set_size(width, height);
            }
        }
        Ok(())
    }
}

/// Add the models and skybox, returning the object that spins
///
/// Models that fail to load are left out of the scene; missing textures are
/// replaced with the placeholder.
fn load_scene(renderer: &mut SceneRenderer, root: &Path) -> Result<Option<DrawableId>, AppError> {
    let mut spinning = None;
    for (model, texture, role, placement) in OBJECTS {
        let mesh = match load_obj(root.join(model)) {
            Ok(mesh) => mesh,
            Err(e) => {
                log::warn!("Skipping {model}: {e}");
                continue;
            }
        };
        let pixels = load_or_placeholder(root.join(texture));
        let id = renderer.add_drawable(role, &mesh, &pixels, placement.transform())?;
        if placement == SUZANNE {
            spinning = Some(id);
        }
    }

    let faces = load_cubemap_or_placeholder(root.join("cubemap").join("cubemap"));
    renderer.set_skybox(&faces)?;

    Ok(spinning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;
    use scene_renderer::config::ConfigFormat;

    #[test]
    fn test_placement_scales_then_translates() {
        let m = PLANE.matrix();
        let corner = m * Vector4::new(1.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(corner, Vector4::new(2.0, -0.35, 1.5, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_placement_rotates_about_y() {
        let spun = Placement {
            yaw: std::f32::consts::FRAC_PI_2,
            ..SUZANNE
        };
        let p = spun.matrix() * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p, Vector4::new(0.2, 0.0, -0.25, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_plane_does_not_cast_shadows() {
        let casters: Vec<_> = OBJECTS.iter().filter(|o| o.2.casts_shadow()).map(|o| o.0).collect();
        assert_eq!(casters, ["dragon.obj", "suzanne.obj"]);
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = AppConfig::default();
        config.window.width = 640;
        config.resource_root = PathBuf::from("assets");
        let text = config.to_string_as(ConfigFormat::Toml).unwrap();
        assert_eq!(AppConfig::from_str_as(&text, ConfigFormat::Toml).unwrap(), config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = AppConfig::from_str_as("fov_degrees = 60.0\n", ConfigFormat::Toml).unwrap();
        assert_eq!(config.fov_degrees, 60.0);
        assert_eq!(config.window, WindowConfig::default());
    }
}
