//! Window management using GLFW
//!
//! Provides the presentation surface for the renderer and collects the input
//! events the demo reacts to.

use ash::vk::{self, Handle};
use scene_renderer::prelude::SurfaceSource;
use scene_renderer::{VulkanError, VulkanResult};
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,
}

pub type WindowResult<T> = Result<T, WindowError>;

/// Input the application loop acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Close requested by key or window manager
    Close,
    /// Toggle vertical sync
    ToggleVsync,
    /// Orbit the camera by whole steps around the vertical and horizontal axes
    Orbit { yaw: i32, pitch: i32 },
    /// Drawable size changed
    Resized { width: u32, height: u32 },
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        // Vulkan only, no OpenGL context
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Block until an event arrives, used while minimized
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Poll the window system and translate what the demo cares about
    pub fn poll_input(&mut self) -> Vec<InputEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| translate(event))
            .collect()
    }

    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }
}

fn translate(event: glfw::WindowEvent) -> Option<InputEvent> {
    use glfw::{Action, Key, WindowEvent};

    match event {
        WindowEvent::Close => Some(InputEvent::Close),
        WindowEvent::FramebufferSize(width, height) => Some(InputEvent::Resized {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        }),
        WindowEvent::Key(key, _, Action::Press | Action::Repeat, _) => match key {
            Key::Escape => Some(InputEvent::Close),
            Key::V => Some(InputEvent::ToggleVsync),
            Key::Left => Some(InputEvent::Orbit { yaw: -1, pitch: 0 }),
            Key::Right => Some(InputEvent::Orbit { yaw: 1, pitch: 0 }),
            Key::Up => Some(InputEvent::Orbit { yaw: 0, pitch: 1 }),
            Key::Down => Some(InputEvent::Orbit { yaw: 0, pitch: -1 }),
            _ => None,
        },
        _ => None,
    }
}

impl SurfaceSource for Window {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()))
    }

    fn create_surface(&mut self, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            log::debug!("Created window surface {:#x}", surface.as_raw());
            Ok(surface)
        } else {
            Err(VulkanError::ResourceCreation {
                what: "window surface",
                result,
            })
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.get_framebuffer_size();
        vk::Extent2D { width, height }
    }
}
