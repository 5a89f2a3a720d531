//! Command recording, shaders, pipelines and render passes

pub mod commands;
pub mod pipelines;
pub mod render_pass;
pub mod shader;
pub mod vertex_layout;
