//! Pass definitions.
//!
//! A pass is one GPU operation inside a target. The set of pass kinds is
//! small and fixed, so [`PassOp`] is a closed enum with one payload struct per
//! kind, and the executor dispatches with a single `match`.

use bitflags::bitflags;
use glam::Vec4;

use crate::definition::TextureRef;
use crate::types::{CompareFunction, StencilOperation, Viewport};

/// Discriminant of [`PassOp`], used in errors and listener callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Clear,
    Quad,
    RenderScene,
    Resolve,
    Stencil,
    UavQueue,
    Compute,
    GenerateMipmaps,
}

/// Reuse annotation shared by workspace connections and shadow node usage.
///
/// - `Recalculate`: always produce the value again
/// - `Reuse`: use the already-produced value when it is still valid
/// - `First`: produce once per frame, reuse afterwards
///
/// On a connection whose producer runs after the reader, `Reuse` reads the
/// previous frame's result, `First` records the producer ahead of the reader
/// on the workspace's first frame only, and `Recalculate` does so every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReusePolicy {
    Recalculate,
    Reuse,
    First,
}

bitflags! {
    /// Which buffers a clear pass touches
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearBuffers: u8 {
        const COLOUR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
        const DEPTH_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
        const ALL = Self::COLOUR.bits() | Self::DEPTH_STENCIL.bits();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClearPass {
    pub buffers: ClearBuffers,
    pub colour: Vec4,
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearPass {
    fn default() -> Self {
        Self {
            buffers: ClearBuffers::ALL,
            colour: Vec4::new(0.0, 0.0, 0.0, 1.0),
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuadPass {
    pub material: String,
    pub inputs: Vec<TextureRef>,
}

/// A render_scene pass requesting a shadow node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowNodeUse {
    pub node: String,
    pub policy: ReusePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenePass {
    pub first_render_queue: u8,
    /// Exclusive upper bound
    pub last_render_queue: u8,
    pub visibility_mask: u32,
    pub lod_bias: f32,
    pub material_scheme: Option<String>,
    /// Named camera binding; `None` uses the workspace's default camera
    pub camera: Option<String>,
    pub shadows: Option<ShadowNodeUse>,
    /// Inside a shadow node: which shadow map's camera renders this pass
    pub shadow_map: Option<usize>,
}

impl Default for ScenePass {
    fn default() -> Self {
        Self {
            first_render_queue: 0,
            last_render_queue: u8::MAX,
            visibility_mask: u32::MAX,
            lod_bias: 1.0,
            material_scheme: None,
            camera: None,
            shadows: None,
            shadow_map: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvePass {
    /// Multisampled source; the pass's target is the destination
    pub source: TextureRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub enabled: bool,
    pub compare: CompareFunction,
    pub reference: u32,
    pub read_mask: u32,
    pub write_mask: u32,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
    pub two_sided: bool,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            enabled: false,
            compare: CompareFunction::Always,
            reference: 0,
            read_mask: 0xFFFF_FFFF,
            write_mask: 0xFFFF_FFFF,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
            two_sided: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UavAccess {
    Read,
    Write,
    ReadWrite,
}

impl UavAccess {
    pub fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UavBinding {
    pub slot: u32,
    pub texture: TextureRef,
    pub access: UavAccess,
    pub mip_level: u32,
}

impl UavBinding {
    pub fn new(slot: u32, texture: TextureRef, access: UavAccess) -> Self {
        Self {
            slot,
            texture,
            access,
            mip_level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UavQueuePass {
    pub uavs: Vec<UavBinding>,
}

/// GPU queue a compute pass is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Queue {
    #[default]
    Graphics,
    AsyncCompute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePass {
    pub job: String,
    pub inputs: Vec<TextureRef>,
    pub uavs: Vec<UavBinding>,
    pub thread_groups: [u32; 3],
    pub queue: Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MipmapMethod {
    /// Whatever the graphics API offers
    #[default]
    ApiDefault,
    /// Box filter in a compute shader
    Compute,
    /// Separable gaussian in a compute shader
    ComputeHq { kernel_radius: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MipmapPass {
    pub method: MipmapMethod,
}

/// Kind-specific payload of a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOp {
    Clear(ClearPass),
    Quad(QuadPass),
    RenderScene(ScenePass),
    Resolve(ResolvePass),
    Stencil(StencilState),
    UavQueue(UavQueuePass),
    Compute(ComputePass),
    GenerateMipmaps(MipmapPass),
}

/// One GPU operation within a target
#[derive(Debug, Clone, PartialEq)]
pub struct PassDefinition {
    /// User value forwarded to pass listeners
    pub identifier: u32,
    /// Bitmask ANDed with the executing slot's bit; zero bits skip the pass
    pub execution_mask: u8,
    /// Bits whose execution slot applies its viewport modifier to this pass
    pub viewport_modifier_mask: u8,
    /// Execute only on the first frame the workspace runs
    pub only_initial: bool,
    pub viewport: Viewport,
    pub op: PassOp,
}

impl PassDefinition {
    fn from_op(op: PassOp) -> Self {
        Self {
            identifier: 0,
            execution_mask: 0xFF,
            viewport_modifier_mask: 0xFF,
            only_initial: false,
            viewport: Viewport::FULL,
            op,
        }
    }

    pub fn clear() -> Self {
        Self::from_op(PassOp::Clear(ClearPass::default()))
    }

    pub fn clear_with(clear: ClearPass) -> Self {
        Self::from_op(PassOp::Clear(clear))
    }

    pub fn quad(material: impl Into<String>) -> Self {
        Self::from_op(PassOp::Quad(QuadPass {
            material: material.into(),
            inputs: Vec::new(),
        }))
    }

    pub fn render_scene() -> Self {
        Self::from_op(PassOp::RenderScene(ScenePass::default()))
    }

    pub fn render_scene_with(scene: ScenePass) -> Self {
        Self::from_op(PassOp::RenderScene(scene))
    }

    pub fn resolve(source: TextureRef) -> Self {
        Self::from_op(PassOp::Resolve(ResolvePass { source }))
    }

    pub fn stencil(state: StencilState) -> Self {
        Self::from_op(PassOp::Stencil(state))
    }

    pub fn uav_queue(uavs: Vec<UavBinding>) -> Self {
        Self::from_op(PassOp::UavQueue(UavQueuePass { uavs }))
    }

    pub fn compute(job: impl Into<String>) -> Self {
        Self::from_op(PassOp::Compute(ComputePass {
            job: job.into(),
            inputs: Vec::new(),
            uavs: Vec::new(),
            thread_groups: [1, 1, 1],
            queue: Queue::Graphics,
        }))
    }

    pub fn generate_mipmaps(method: MipmapMethod) -> Self {
        Self::from_op(PassOp::GenerateMipmaps(MipmapPass { method }))
    }

    /// Add a sampled input. Only quad and compute passes sample inputs.
    pub fn with_input(mut self, texture: TextureRef) -> Self {
        let kind = self.op.kind();
        match &mut self.op {
            PassOp::Quad(quad) => quad.inputs.push(texture),
            PassOp::Compute(compute) => compute.inputs.push(texture),
            _ => log::warn!("with_input ignored on {:?} pass", kind),
        }
        self
    }

    /// Add a UAV binding to a compute or uav_queue pass.
    pub fn with_uav(mut self, binding: UavBinding) -> Self {
        let kind = self.op.kind();
        match &mut self.op {
            PassOp::Compute(compute) => compute.uavs.push(binding),
            PassOp::UavQueue(queue) => queue.uavs.push(binding),
            _ => log::warn!("with_uav ignored on {:?} pass", kind),
        }
        self
    }

    pub fn on_queue(mut self, queue: Queue) -> Self {
        if let PassOp::Compute(compute) = &mut self.op {
            compute.queue = queue;
        }
        self
    }

    pub fn with_thread_groups(mut self, x: u32, y: u32, z: u32) -> Self {
        if let PassOp::Compute(compute) = &mut self.op {
            compute.thread_groups = [x, y, z];
        }
        self
    }

    pub fn with_identifier(mut self, identifier: u32) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_execution_mask(mut self, mask: u8) -> Self {
        self.execution_mask = mask;
        self
    }

    pub fn with_viewport_modifier_mask(mut self, mask: u8) -> Self {
        self.viewport_modifier_mask = mask;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn only_initial(mut self) -> Self {
        self.only_initial = true;
        self
    }

    pub fn kind(&self) -> PassKind {
        self.op.kind()
    }

    /// Textures read through samplers or read-capable UAVs.
    pub fn reads(&self) -> Vec<&TextureRef> {
        match &self.op {
            PassOp::Quad(quad) => quad.inputs.iter().collect(),
            PassOp::Resolve(resolve) => vec![&resolve.source],
            PassOp::Compute(compute) => compute
                .inputs
                .iter()
                .chain(
                    compute
                        .uavs
                        .iter()
                        .filter(|uav| uav.access.reads())
                        .map(|uav| &uav.texture),
                )
                .collect(),
            PassOp::UavQueue(queue) => queue
                .uavs
                .iter()
                .filter(|uav| uav.access.reads())
                .map(|uav| &uav.texture)
                .collect(),
            PassOp::Clear(_)
            | PassOp::RenderScene(_)
            | PassOp::Stencil(_)
            | PassOp::GenerateMipmaps(_) => Vec::new(),
        }
    }

    /// Textures written through unordered access views.
    pub fn uav_writes(&self) -> Vec<&TextureRef> {
        let uavs = match &self.op {
            PassOp::Compute(compute) => &compute.uavs,
            PassOp::UavQueue(queue) => &queue.uavs,
            _ => return Vec::new(),
        };
        uavs.iter()
            .filter(|uav| uav.access.writes())
            .map(|uav| &uav.texture)
            .collect()
    }

    /// Whether the pass writes its target as a render target.
    pub fn writes_target(&self) -> bool {
        match &self.op {
            PassOp::Clear(_)
            | PassOp::Quad(_)
            | PassOp::RenderScene(_)
            | PassOp::Resolve(_)
            | PassOp::GenerateMipmaps(_) => true,
            PassOp::Stencil(_) | PassOp::UavQueue(_) | PassOp::Compute(_) => false,
        }
    }

    /// Whether the pass reads the target's previous contents.
    pub fn reads_target(&self) -> bool {
        match &self.op {
            // Clear discards, resolve overwrites
            PassOp::Clear(_) | PassOp::Resolve(_) => false,
            PassOp::Quad(_) | PassOp::RenderScene(_) | PassOp::GenerateMipmaps(_) => true,
            PassOp::Stencil(_) | PassOp::UavQueue(_) | PassOp::Compute(_) => false,
        }
    }
}

impl PassOp {
    pub fn kind(&self) -> PassKind {
        match self {
            PassOp::Clear(_) => PassKind::Clear,
            PassOp::Quad(_) => PassKind::Quad,
            PassOp::RenderScene(_) => PassKind::RenderScene,
            PassOp::Resolve(_) => PassKind::Resolve,
            PassOp::Stencil(_) => PassKind::Stencil,
            PassOp::UavQueue(_) => PassKind::UavQueue,
            PassOp::Compute(_) => PassKind::Compute,
            PassOp::GenerateMipmaps(_) => PassKind::GenerateMipmaps,
        }
    }
}
