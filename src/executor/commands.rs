//! Recorded GPU commands

use glam::{Mat4, Vec4};

use crate::backend::{MaterialHandle, TextureHandle};
use crate::definition::{ClearBuffers, MipmapMethod, Queue, StencilState, UavAccess};
use crate::plan::BarrierKind;
use crate::scene::RenderableId;

/// Pixel rectangle inside a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32, u32, u32)> for PixelRect {
    fn from((x, y, width, height): (u32, u32, u32, u32)) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A texture bound for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledTexture {
    pub texture: TextureHandle,
    /// Multisampled; the shader resolves while sampling
    pub implicit_resolve: bool,
}

/// A texture bound as an unordered access view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundUav {
    pub slot: u32,
    pub texture: TextureHandle,
    pub access: UavAccess,
    pub mip_level: u32,
}

/// One command of a frame, in submission order
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        texture: TextureHandle,
        kind: BarrierKind,
    },
    BindTarget {
        texture: TextureHandle,
        viewport: PixelRect,
    },
    Clear {
        texture: TextureHandle,
        buffers: ClearBuffers,
        colour: Vec4,
        depth: f32,
        stencil: u32,
    },
    SetStencil(StencilState),
    DrawQuad {
        material: MaterialHandle,
        inputs: Vec<SampledTexture>,
    },
    DrawRenderables {
        view_projection: Mat4,
        renderables: Vec<RenderableId>,
        lod_bias: f32,
        material_scheme: Option<String>,
        shadow_maps: Vec<TextureHandle>,
    },
    BindUavs(Vec<BoundUav>),
    Dispatch {
        job: MaterialHandle,
        inputs: Vec<SampledTexture>,
        uavs: Vec<BoundUav>,
        thread_groups: [u32; 3],
        queue: Queue,
    },
    Resolve {
        source: TextureHandle,
        destination: TextureHandle,
    },
    GenerateMipmaps {
        texture: TextureHandle,
        mip_levels: u32,
        method: MipmapMethod,
    },
}

/// Commands recorded for one frame (or one target of it)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Append another list, keeping its order.
    pub fn append(&mut self, other: &mut CommandList) {
        self.commands.append(&mut other.commands);
    }

    /// Drop recorded commands, keeping the allocation.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
