//! Collaborator traits
//!
//! The compositor talks to the outside world through three traits: the
//! graphics API ([`RenderDevice`]), the material system ([`MaterialLibrary`])
//! and the scene ([`SceneQuery`]).

use std::ops::Range;

use thiserror::Error;

use crate::executor::CommandList;
use crate::scene::{Camera, Light, Renderable};
use crate::types::TextureDescriptor;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to submit commands: {0}")]
    SubmissionFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture owned by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl TextureHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Handle to a compiled material or compute job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub(crate) u64);

impl MaterialHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Result of a material or compute job lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialStatus {
    Ready(MaterialHandle),
    /// Known but its shaders are still compiling
    Compiling,
    Missing,
}

/// The low-level graphics API.
pub trait RenderDevice: Send + Sync {
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        label: &str,
    ) -> BackendResult<TextureHandle>;

    fn destroy_texture(&self, texture: TextureHandle);

    /// Submit a recorded frame.
    fn submit(&self, commands: &CommandList) -> BackendResult<()>;
}

/// Lookup of materials (quad passes) and compute jobs by name.
pub trait MaterialLibrary: Send + Sync {
    fn material(&self, name: &str) -> MaterialStatus;

    fn compute_job(&self, name: &str) -> MaterialStatus;
}

/// Read-only view of the scene.
pub trait SceneQuery: Send + Sync {
    /// Renderables in render queues `queues` visible through `visibility_mask`.
    fn renderables(
        &self,
        camera: &Camera,
        queues: Range<u8>,
        visibility_mask: u32,
    ) -> Vec<Renderable>;

    fn lights(&self) -> Vec<Light>;
}
