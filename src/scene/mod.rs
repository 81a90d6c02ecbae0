//! Scene-side types the compositor consumes
//!
//! The compositor never owns a scene. Cameras are bound per workspace by the
//! host, and lights and renderables come from a [`SceneQuery`](crate::backend::SceneQuery).

mod camera;
mod light;

pub use camera::*;
pub use light::*;

/// Opaque id of a renderable reported by the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderableId(pub u64);

/// A renderable as filtered by render_scene passes
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub id: RenderableId,
    pub render_queue: u8,
    pub visibility_flags: u32,
    pub casts_shadows: bool,
}

impl Renderable {
    pub fn new(id: u64, render_queue: u8) -> Self {
        Self {
            id: RenderableId(id),
            render_queue,
            visibility_flags: u32::MAX,
            casts_shadows: true,
        }
    }

    pub fn with_visibility_flags(mut self, flags: u32) -> Self {
        self.visibility_flags = flags;
        self
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows;
        self
    }
}
