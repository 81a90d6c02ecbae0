//! RedLilium Compositor - a render-graph execution engine
//!
//! Rendering is described declaratively:
//! - **Nodes** expose named input/output texture channels and an ordered list
//!   of targets, each running a sequence of passes
//! - **Shadow nodes** are nodes producing shadow maps for the closest lights
//! - **Workspaces** instantiate nodes, connect their channels, declare global
//!   textures and bind the final output
//!
//! Instantiating a workspace compiles it into an [`ExecutionPlan`]:
//! - [`DependencyResolver`] orders node instances (cycles are allowed only
//!   through annotated edges)
//! - [`ResourceAllocator`] aliases transient textures into shared physical
//!   textures and inserts explicit MSAA resolves
//! - [`SynchronizationManager`] places UAV barriers and cross-queue fences
//!
//! Every frame, the [`Compositor`] replays the plan through the
//! [`PassExecutor`] once per enabled execution slot and submits the recorded
//! [`CommandList`] to the [`RenderDevice`].
//!
//! # Features
//! - `parallel` (default): record independent targets on the rayon pool

pub mod allocator;
pub mod backend;
pub mod compositor;
pub mod definition;
pub mod error;
pub mod executor;
pub mod frame;
pub mod plan;
pub mod resolver;
pub mod scene;
pub mod shadow;
pub mod store;
pub mod sync;
pub mod types;
pub mod workspace;

pub use allocator::{
    Allocation, AliasSlot, PhysicalTexture, PhysicalTextureId, PoolStats, ResourceAllocator,
    SlotAssignment, TexturePool,
};
pub use backend::{
    BackendError, BackendResult, DummyDevice, MaterialHandle, MaterialLibrary, MaterialStatus,
    RenderDevice, SceneQuery, StaticMaterials, StaticScene, TextureHandle,
};
pub use compositor::{Compositor, WorkspaceHandle};
pub use definition::*;
pub use error::{
    AllocationError, CompositorError, CompositorResult, DefinitionError, HazardError,
    PassExecutionError, PassFailure, StateError,
};
pub use executor::{BoundUav, Command, CommandList, PassContext, PassExecutor, PixelRect, SampledTexture};
pub use frame::{FrameExecutor, FrameReport, PassListener};
pub use plan::{
    Barrier, BarrierKind, ExecutionPlan, LogicalTexture, LogicalTextureId, PassInvocation,
    Refresh, TextureOrigin,
};
pub use resolver::{DependencyResolver, EdgeKind};
pub use scene::{Camera, Light, LightKind, Projection, Renderable, RenderableId, ViewTolerance};
pub use shadow::{ShadowDecision, ShadowNodeCache, ShadowNodeInstance};
pub use store::GraphDefinitionStore;
pub use sync::SynchronizationManager;
pub use types::*;
pub use workspace::{CameraSet, OutputTarget, Workspace, WorkspaceState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What the frame executor does when a pass fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassErrorPolicy {
    /// Discard the whole frame and return the error to the host
    #[default]
    AbortFrame,
    /// Log, skip the rest of the failing target and keep recording
    SkipTarget,
}

/// Configuration for the compositor
#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Upper bound on the bytes of physical textures per workspace
    pub texture_budget: Option<u64>,
    pub pass_error_policy: PassErrorPolicy,
    /// Record independent targets concurrently (requires the `parallel` feature)
    pub parallel_recording: bool,
    /// How close two cameras must be for a shadow node to reuse its maps
    pub view_tolerance: ViewTolerance,
    /// Released textures kept for reuse before the oldest is destroyed
    pub pool_cache_capacity: usize,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            texture_budget: None,
            pass_error_policy: PassErrorPolicy::AbortFrame,
            parallel_recording: cfg!(feature = "parallel"),
            view_tolerance: ViewTolerance::default(),
            pool_cache_capacity: 64,
        }
    }
}

impl CompositorConfig {
    pub fn with_texture_budget(mut self, bytes: u64) -> Self {
        self.texture_budget = Some(bytes);
        self
    }

    pub fn with_pass_error_policy(mut self, policy: PassErrorPolicy) -> Self {
        self.pass_error_policy = policy;
        self
    }

    pub fn with_parallel_recording(mut self, enabled: bool) -> Self {
        self.parallel_recording = enabled;
        self
    }

    pub fn with_view_tolerance(mut self, tolerance: ViewTolerance) -> Self {
        self.view_tolerance = tolerance;
        self
    }

    pub fn with_pool_cache_capacity(mut self, capacity: usize) -> Self {
        self.pool_cache_capacity = capacity;
        self
    }
}
