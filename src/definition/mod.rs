//! Declarative compositor definitions.
//!
//! Definitions are the parsed object graph a script loader (or application
//! code) hands to the compositor:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`NodeDefinition`] | Reusable unit with input/output channels and targets |
//! | [`TargetDefinition`] | One render target and its ordered passes |
//! | [`PassDefinition`] | One GPU operation, a closed [`PassOp`] enum |
//! | [`TextureDeclaration`] | Logical texture: format, size policy, MSAA, persistence |
//! | [`ShadowNodeDefinition`] | Node rendering shadow maps for the closest lights |
//! | [`WorkspaceDefinition`] | Node instances, connections, globals, output binding |
//!
//! All definitions are plain data; they are validated when registered in a
//! [`GraphDefinitionStore`](crate::store::GraphDefinitionStore) and compiled
//! when a workspace is instantiated.

mod node;
mod pass;
mod shadow;
mod texture;
mod workspace;

pub use node::{InputChannel, NodeDefinition, OutputChannel, TargetDefinition};
pub use pass::{
    ClearBuffers, ClearPass, ComputePass, MipmapMethod, MipmapPass, PassDefinition, PassKind,
    PassOp, Queue, QuadPass, ResolvePass, ReusePolicy, ScenePass, ShadowNodeUse, StencilState,
    UavAccess, UavBinding, UavQueuePass,
};
pub use shadow::{ShadowMapDefinition, ShadowNodeDefinition, ShadowTechnique};
pub use texture::{MsaaResolve, SizePolicy, TextureDeclaration, TextureRef};
pub use workspace::{
    Connection, GlobalTexture, OutputBinding, WorkspaceDefinition, IDENTITY_VIEWPORT_MODIFIER,
    MAX_EXECUTION_SLOTS,
};
