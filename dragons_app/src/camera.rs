//! Camera and light math for the demo scene
//!
//! Everything here is plain nalgebra; the renderer only sees the resulting
//! column-major matrices packed into a [`SceneUniform`].

use nalgebra::{Matrix4, Orthographic3, Perspective3, Point3, Vector3};
use scene_renderer::render::backends::vulkan::resources::uniform::Mat4;
use scene_renderer::SceneUniform;

/// Maps OpenGL clip space (y up, z in -1..1) to Vulkan's (y down, z in 0..1)
pub fn vulkan_clip() -> Matrix4<f32> {
    #[rustfmt::skip]
    let clip = Matrix4::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.5,
        0.0,  0.0, 0.0, 1.0,
    );
    clip
}

/// Pack a matrix the way the shaders read it
pub fn to_mat4(matrix: &Matrix4<f32>) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for (column, slot) in out.iter_mut().enumerate() {
        for (row, value) in slot.iter_mut().enumerate() {
            *value = matrix[(row, column)];
        }
    }
    out
}

/// Perspective camera orbiting a target
#[derive(Debug, Clone)]
pub struct Camera {
    position: Point3<f32>,
    target: Point3<f32>,
    fov_y_degrees: f32,
    aspect: f32,
    near: f32,
    far: f32,
}

impl Camera {
    pub const NEAR: f32 = 0.01;
    pub const FAR: f32 = 100.0;
    /// Radians turned per orbit step
    pub const ORBIT_STEP: f32 = 0.05;

    pub fn new(fov_y_degrees: f32, width: u32, height: u32) -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 1.0),
            target: Point3::origin(),
            fov_y_degrees,
            aspect: aspect_ratio(width, height),
            near: Self::NEAR,
            far: Self::FAR,
        }
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    /// Update the aspect ratio; zero sizes keep the previous one
    pub fn set_size(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = aspect_ratio(width, height);
        }
    }

    /// Rotate around the target by whole orbit steps
    ///
    /// Pitch stops short of the poles so the up vector stays valid.
    pub fn orbit(&mut self, yaw_steps: i32, pitch_steps: i32) {
        let offset = self.position - self.target;
        let radius = offset.norm();
        if radius <= f32::EPSILON {
            return;
        }

        let limit = std::f32::consts::FRAC_PI_2 - 0.01;
        let mut yaw = offset.x.atan2(offset.z);
        let mut pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();
        yaw += yaw_steps as f32 * Self::ORBIT_STEP;
        pitch = (pitch + pitch_steps as f32 * Self::ORBIT_STEP).clamp(-limit, limit);

        let direction = Vector3::new(pitch.cos() * yaw.sin(), pitch.sin(), pitch.cos() * yaw.cos());
        self.position = self.target + direction * radius;
    }

    /// Projection into Vulkan clip space
    pub fn projection(&self) -> Matrix4<f32> {
        let perspective = Perspective3::new(self.aspect, self.fov_y_degrees.to_radians(), self.near, self.far);
        vulkan_clip() * perspective.to_homogeneous()
    }

    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.position, &self.target, &Vector3::y())
    }

    /// View with the translation removed, so the skybox stays at infinity
    pub fn rotation_only_view(&self) -> Matrix4<f32> {
        let mut view = self.view();
        view[(0, 3)] = 0.0;
        view[(1, 3)] = 0.0;
        view[(2, 3)] = 0.0;
        view
    }
}

fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

/// Directional shadow-casting light looking at the origin
#[derive(Debug, Clone)]
pub struct Light {
    position: Point3<f32>,
    half_extent: f32,
    near: f32,
    far: f32,
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Point3::new(2.0, 1.5, 2.0),
            half_extent: 1.5,
            near: 0.1,
            far: 10.0,
            ambient: [0.3, 0.3, 0.3],
            diffuse: [0.8, 0.8, 0.8],
            specular: [1.0, 1.0, 1.0],
            shininess: 32.0,
        }
    }
}

impl Light {
    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    /// Move along the demo's bobbing path at `time` seconds
    pub fn animate(&mut self, time: f32) {
        self.position = Point3::new(2.0, 1.5 + (0.5 * time).sin(), 2.0);
    }

    /// Orthographic projection covering the scene, in Vulkan clip space
    pub fn projection(&self) -> Matrix4<f32> {
        let e = self.half_extent;
        let ortho = Orthographic3::new(-e, e, -e, e, self.near, self.far);
        vulkan_clip() * ortho.to_homogeneous()
    }

    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.position, &Point3::origin(), &Vector3::y())
    }
}

/// Build the per-frame uniform block
pub fn scene_uniform(camera: &Camera, light: &Light) -> SceneUniform {
    let view = camera.view();
    let view_inverse = view.try_inverse().unwrap_or_else(Matrix4::identity);
    let p = light.position();
    let pad = |c: [f32; 3]| [c[0], c[1], c[2], 0.0];

    SceneUniform {
        cam_projection: to_mat4(&camera.projection()),
        cam_view: to_mat4(&view),
        cam_rotation_only_view: to_mat4(&camera.rotation_only_view()),
        cam_view_inverse: to_mat4(&view_inverse),
        light_projection: to_mat4(&light.projection()),
        light_view: to_mat4(&light.view()),
        light_position: [p.x, p.y, p.z, 1.0],
        light_ia: pad(light.ambient),
        light_id: pad(light.diffuse),
        light_is: pad(light.specular),
        light_shininess: light.shininess,
        ..SceneUniform::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_to_mat4_is_column_major() {
        let m = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0));
        let packed = to_mat4(&m);
        assert_eq!(packed[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(packed[0], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_projection_maps_depth_to_unit_range() {
        let camera = Camera::new(45.0, 800, 600);
        let projection = camera.projection();

        let near = projection * Vector4::new(0.0, 0.0, -Camera::NEAR, 1.0);
        let far = projection * Vector4::new(0.0, 0.0, -Camera::FAR, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-4);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::new(45.0, 600, 600);
        let up = camera.projection() * Vector4::new(0.0, 0.1, -1.0, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn test_view_looks_down_negative_z() {
        let camera = Camera::new(45.0, 800, 600);
        let origin = camera.view() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin, Vector4::new(0.0, 0.0, -1.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_only_view_drops_translation() {
        let mut camera = Camera::new(45.0, 800, 600);
        camera.orbit(7, 3);
        let view = camera.rotation_only_view();
        assert_relative_eq!(view.fixed_view::<3, 1>(0, 3).norm(), 0.0);
        assert_relative_eq!(
            view.fixed_view::<3, 3>(0, 0).into_owned(),
            camera.view().fixed_view::<3, 3>(0, 0).into_owned()
        );
    }

    #[test]
    fn test_orbit_keeps_radius_and_clamps_pitch() {
        let mut camera = Camera::new(45.0, 800, 600);
        camera.orbit(10, 0);
        assert_relative_eq!(camera.position().coords.norm(), 1.0, epsilon = 1e-5);
        assert!(camera.position().x > 0.0);

        camera.orbit(0, 1000);
        assert!(camera.position().y < 1.0);
        assert_relative_eq!(camera.position().coords.norm(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_size_keeps_aspect() {
        let mut camera = Camera::new(45.0, 800, 400);
        let before = camera.projection();
        camera.set_size(0, 0);
        assert_relative_eq!(camera.projection(), before);
    }

    #[test]
    fn test_light_animation_path() {
        let mut light = Light::default();
        light.animate(std::f32::consts::PI);
        assert_relative_eq!(light.position(), Point3::new(2.0, 2.5, 2.0), epsilon = 1e-5);
    }

    #[test]
    fn test_uniform_inverse_view() {
        let camera = Camera::new(45.0, 800, 600);
        let uniform = scene_uniform(&camera, &Light::default());
        // camera sits at z = 1
        assert_relative_eq!(uniform.cam_view_inverse[3][2], 1.0, epsilon = 1e-6);
        assert_eq!(uniform.light_position[3], 1.0);
        assert_eq!(uniform.light_shininess, 32.0);
    }
}
