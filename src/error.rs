//! Compositor error types.
//!
//! Errors are grouped by the phase that raises them:
//!
//! | Phase | Type | Effect |
//! |-------|------|--------|
//! | Definition / compilation | [`DefinitionError`] | instantiation fails, nothing allocated |
//! | Allocation | [`AllocationError`] | instantiation fails, nothing allocated |
//! | Frame replay | [`PassExecutionError`] | the rest of the frame (or target) is skipped |
//! | Internal invariant | [`HazardError`] | fatal, the resolver produced an invalid order |
//!
//! [`CompositorError`] wraps all of them for the host-facing API.

use thiserror::Error;

use crate::backend::BackendError;
use crate::definition::PassKind;
use crate::types::TextureFormat;
use crate::workspace::WorkspaceState;

/// Errors raised while registering or compiling definitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("definition '{0}' is already registered with a different body")]
    DuplicateName(String),
    #[error("unknown reference '{name}' in {context}")]
    UnknownReference { name: String, context: String },
    #[error("unresolved dependency cycle: {}", .0.join(" -> "))]
    UnresolvedCycle(Vec<String>),
    #[error("channel arity mismatch on node '{node}': {reason}")]
    ChannelArity { node: String, reason: String },
    #[error(
        "channel type mismatch: '{producer}' feeds {actual:?} into '{consumer}.{channel}' which expects {expected:?}"
    )]
    ChannelType {
        producer: String,
        consumer: String,
        channel: String,
        expected: TextureFormat,
        actual: TextureFormat,
    },
    #[error("global texture '{texture}' is written by '{first}' and '{second}'")]
    GlobalWriteConflict {
        texture: String,
        first: String,
        second: String,
    },
    #[error("node '{node}' reads '{texture}' before any of its passes write it")]
    ReadBeforeWrite { node: String, texture: String },
    #[error("invalid definition '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Errors raised while binding logical textures to physical ones.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    #[error(
        "texture budget of {budget} bytes exceeded ({required} bytes required) by: {}",
        .declarations.join(", ")
    )]
    OutOfTextureBudget {
        budget: u64,
        required: u64,
        declarations: Vec<String>,
    },
    #[error("texture creation failed: {0}")]
    Backend(#[from] BackendError),
}

/// Why a single pass failed to record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PassFailure {
    #[error("material '{0}' has not finished compiling")]
    MaterialNotReady(String),
    #[error("material '{0}' does not exist")]
    MissingMaterial(String),
    #[error("no camera bound (requested {0:?})")]
    NoCameraBound(Option<String>),
    #[error("resolve source has {0} sample(s), expected more than one")]
    SingleSampledResolveSource(u32),
    #[error("texture '{0}' is not bound to a physical resource")]
    UnboundTexture(String),
    #[error("shadow node '{0}' is not instantiated")]
    MissingShadowNode(String),
}

/// A pass failed while the frame executor was replaying the plan.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?} pass '{pass}' failed: {reason}")]
pub struct PassExecutionError {
    pub kind: PassKind,
    pub pass: String,
    pub reason: PassFailure,
}

impl PassExecutionError {
    pub fn new(kind: PassKind, pass: impl Into<String>, reason: PassFailure) -> Self {
        Self {
            kind,
            pass: pass.into(),
            reason,
        }
    }
}

/// Internal invariant violations found while annotating barriers.
///
/// These never come from user input; they mean the resolver emitted an
/// order in which a consumer runs before its producer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HazardError {
    #[error(
        "unresolvable hazard: pass #{reader} reads '{texture}' before its first writer (pass #{first_writer})"
    )]
    UnresolvableHazard {
        texture: String,
        reader: usize,
        first_writer: usize,
    },
}

/// Workspace lifecycle misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot {action} a workspace in state {state:?}")]
    InvalidTransition {
        state: WorkspaceState,
        action: &'static str,
    },
    #[error("workspace handle is stale or was never issued")]
    StaleHandle,
}

/// Top-level error returned by the host API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositorError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Pass(#[from] PassExecutionError),
    #[error(transparent)]
    Hazard(#[from] HazardError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CompositorError {
    /// Internal errors indicate a bug in the compositor rather than in the
    /// definitions it was given.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Hazard(_))
    }
}

pub type CompositorResult<T> = Result<T, CompositorError>;
