//! Scene layer: drawables, the shadow pass, per-frame command recording and
//! the renderer that owns them

pub mod drawable;
pub mod orchestrator;
pub mod renderer;
pub mod shadow;
