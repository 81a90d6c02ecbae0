//! In-process collaborators for testing and headless runs.
//!
//! [`DummyDevice`] performs no GPU work; it hands out texture handles, keeps
//! track of live textures and stores every submitted command list so tests can
//! inspect what a frame recorded. [`StaticMaterials`] and [`StaticScene`] are
//! fixed-content material and scene providers.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    BackendError, BackendResult, MaterialHandle, MaterialLibrary, MaterialStatus, RenderDevice,
    SceneQuery, TextureHandle,
};
use crate::executor::CommandList;
use crate::scene::{Camera, Light, Renderable};
use crate::types::TextureDescriptor;

/// Dummy render device.
#[derive(Debug, Default)]
pub struct DummyDevice {
    next_handle: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    live: Mutex<HashSet<TextureHandle>>,
    submitted: Mutex<Vec<CommandList>>,
    /// Remaining successful creations before `OutOfMemory`; `None` is unlimited
    creation_limit: Mutex<Option<u64>>,
}

impl DummyDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail texture creation with `OutOfMemory` after `count` more successes.
    pub fn fail_after(&self, count: u64) {
        *self.creation_limit.lock() = Some(count);
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn destroyed_count(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    /// Textures created and not yet destroyed.
    pub fn live_textures(&self) -> usize {
        self.live.lock().len()
    }

    pub fn submission_count(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Take every command list submitted so far.
    pub fn take_submitted(&self) -> Vec<CommandList> {
        std::mem::take(&mut *self.submitted.lock())
    }
}

impl RenderDevice for DummyDevice {
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        label: &str,
    ) -> BackendResult<TextureHandle> {
        {
            let mut limit = self.creation_limit.lock();
            if let Some(remaining) = limit.as_mut() {
                if *remaining == 0 {
                    return Err(BackendError::OutOfMemory);
                }
                *remaining -= 1;
            }
        }

        let handle = TextureHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        log::trace!(
            "DummyDevice: creating texture '{}' {:?} ({}x{}, {} sample(s), {} mip(s))",
            label,
            descriptor.format,
            descriptor.width,
            descriptor.height,
            descriptor.sample_count,
            descriptor.mip_levels
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(handle);
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        log::trace!("DummyDevice: destroying texture {:?}", texture);
        if self.live.lock().remove(&texture) {
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        } else {
            log::warn!("DummyDevice: destroying unknown texture {:?}", texture);
        }
    }

    fn submit(&self, commands: &CommandList) -> BackendResult<()> {
        log::trace!("DummyDevice: submitting {} command(s)", commands.len());
        self.submitted.lock().push(commands.clone());
        Ok(())
    }
}

/// Material library with a fixed set of entries.
#[derive(Debug, Default)]
pub struct StaticMaterials {
    materials: HashMap<String, MaterialStatus>,
    compute_jobs: HashMap<String, MaterialStatus>,
    next_handle: u64,
}

impl StaticMaterials {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> MaterialHandle {
        self.next_handle += 1;
        MaterialHandle(self.next_handle)
    }

    pub fn with_material(mut self, name: impl Into<String>) -> Self {
        let handle = self.next();
        self.materials
            .insert(name.into(), MaterialStatus::Ready(handle));
        self
    }

    /// A material whose shaders never finish compiling.
    pub fn with_compiling_material(mut self, name: impl Into<String>) -> Self {
        self.materials.insert(name.into(), MaterialStatus::Compiling);
        self
    }

    pub fn with_compute_job(mut self, name: impl Into<String>) -> Self {
        let handle = self.next();
        self.compute_jobs
            .insert(name.into(), MaterialStatus::Ready(handle));
        self
    }
}

impl MaterialLibrary for StaticMaterials {
    fn material(&self, name: &str) -> MaterialStatus {
        self.materials
            .get(name)
            .copied()
            .unwrap_or(MaterialStatus::Missing)
    }

    fn compute_job(&self, name: &str) -> MaterialStatus {
        self.compute_jobs
            .get(name)
            .copied()
            .unwrap_or(MaterialStatus::Missing)
    }
}

/// Scene with a fixed list of renderables and lights; no culling.
#[derive(Debug, Default, Clone)]
pub struct StaticScene {
    pub renderables: Vec<Renderable>,
    pub lights: Vec<Light>,
}

impl StaticScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderable(mut self, renderable: Renderable) -> Self {
        self.renderables.push(renderable);
        self
    }

    pub fn with_light(mut self, light: Light) -> Self {
        self.lights.push(light);
        self
    }
}

impl SceneQuery for StaticScene {
    fn renderables(
        &self,
        _camera: &Camera,
        queues: Range<u8>,
        visibility_mask: u32,
    ) -> Vec<Renderable> {
        self.renderables
            .iter()
            .filter(|r| queues.contains(&r.render_queue) && r.visibility_flags & visibility_mask != 0)
            .cloned()
            .collect()
    }

    fn lights(&self) -> Vec<Light> {
        self.lights.clone()
    }
}
