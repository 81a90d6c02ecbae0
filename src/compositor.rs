//! Host-facing compositor
//!
//! The [`Compositor`] owns every workspace instance and shadow node instance
//! of a process, the shared texture pool and the frame counter. Hosts drive
//! it with [`Compositor::tick`] (one workspace is one frame) or
//! [`Compositor::tick_all`] (every workspace shares one frame, so shadow maps
//! can be reused across them).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::allocator::{PoolStats, ResourceAllocator, TexturePool};
use crate::backend::{MaterialLibrary, RenderDevice, SceneQuery, TextureHandle};
use crate::definition::{PassKind, IDENTITY_VIEWPORT_MODIFIER};
use crate::error::{
    CompositorError, CompositorResult, DefinitionError, PassExecutionError, PassFailure,
    StateError,
};
use crate::executor::{CommandList, PassContext};
use crate::frame::{FrameExecutor, FrameReport, PassListener};
use crate::resolver::DependencyResolver;
use crate::scene::Camera;
use crate::shadow::{ShadowDecision, ShadowNodeCache, ShadowNodeInstance};
use crate::store::GraphDefinitionStore;
use crate::sync::SynchronizationManager;
use crate::workspace::{CameraSet, OutputTarget, Workspace, WorkspaceState};
use crate::{CompositorConfig, PassErrorPolicy};

/// Handle to a workspace instance.
///
/// Handles of torn down workspaces are stale; using them fails with
/// [`StateError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceHandle {
    index: u32,
    generation: u32,
}

impl WorkspaceHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct WorkspaceSlot {
    generation: u32,
    workspace: Option<Workspace>,
}

/// Render-graph compositor.
pub struct Compositor {
    config: CompositorConfig,
    store: Arc<GraphDefinitionStore>,
    device: Arc<dyn RenderDevice>,
    materials: Arc<dyn MaterialLibrary>,
    scene: Arc<dyn SceneQuery>,
    pool: Arc<Mutex<TexturePool>>,
    workspaces: Vec<WorkspaceSlot>,
    shadow_nodes: ShadowNodeCache,
    frame: u64,
}

impl Compositor {
    pub fn new(
        store: Arc<GraphDefinitionStore>,
        device: Arc<dyn RenderDevice>,
        materials: Arc<dyn MaterialLibrary>,
        scene: Arc<dyn SceneQuery>,
        config: CompositorConfig,
    ) -> Self {
        let pool = Arc::new(Mutex::new(TexturePool::new(config.pool_cache_capacity)));
        Self {
            config,
            store,
            device,
            materials,
            scene,
            pool,
            workspaces: Vec::new(),
            shadow_nodes: ShadowNodeCache::new(),
            frame: 0,
        }
    }

    /// Share an existing texture pool, e.g. with another compositor on the
    /// same device.
    pub fn with_shared_pool(mut self, pool: Arc<Mutex<TexturePool>>) -> Self {
        self.pool = pool;
        self
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphDefinitionStore {
        &self.store
    }

    pub fn pool(&self) -> &Arc<Mutex<TexturePool>> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.lock().stats()
    }

    /// Last frame number started by `tick` or `tick_all`.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces
            .iter()
            .filter(|slot| slot.workspace.is_some())
            .count()
    }

    pub fn workspace(&self, handle: WorkspaceHandle) -> Option<&Workspace> {
        self.workspaces
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.workspace.as_ref())
    }

    /// State of the workspace behind `handle`. Handles whose workspace was
    /// torn down report [`WorkspaceState::TornDown`].
    pub fn workspace_state(&self, handle: WorkspaceHandle) -> WorkspaceState {
        match self.workspaces.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => slot
                .workspace
                .as_ref()
                .map_or(WorkspaceState::TornDown, Workspace::state),
            Some(slot) if slot.generation > handle.generation => WorkspaceState::TornDown,
            _ => WorkspaceState::Uninstantiated,
        }
    }

    fn workspace_mut(&mut self, handle: WorkspaceHandle) -> Result<&mut Workspace, StateError> {
        self.workspaces
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.workspace.as_mut())
            .ok_or(StateError::StaleHandle)
    }

    pub fn shadow_node(&self, name: &str) -> Option<&ShadowNodeInstance> {
        self.shadow_nodes.get(name)
    }

    /// Compile, allocate and annotate a workspace.
    ///
    /// Either the workspace and every shadow node it needs are fully
    /// instantiated, or nothing stays allocated.
    pub fn instantiate_workspace(
        &mut self,
        name: &str,
        output: Option<OutputTarget>,
        cameras: CameraSet,
    ) -> CompositorResult<WorkspaceHandle> {
        let definition = self
            .store
            .workspace(name)
            .ok_or_else(|| DefinitionError::UnknownReference {
                name: name.to_string(),
                context: "compositor".into(),
            })?;

        let resolver = DependencyResolver::new(&self.store);
        let mut plan = resolver.resolve(&definition, output.as_ref())?;

        let allocator = ResourceAllocator::new(self.config.texture_budget);
        let device = &*self.device;
        let mut pool = self.pool.lock();
        let allocation = allocator.allocate(&mut plan, output.as_ref(), &mut pool, device)?;

        if let Err(err) = SynchronizationManager::new().annotate(&mut plan) {
            log::error!("Workspace '{}': {}", name, err);
            allocation.discard(&mut pool, device);
            return Err(err.into());
        }

        let mut created = Vec::new();
        for node in &plan.shadow_nodes {
            if self.shadow_nodes.contains(node) {
                continue;
            }
            let instance = self
                .store
                .shadow_node(node)
                .ok_or_else(|| {
                    CompositorError::from(DefinitionError::UnknownReference {
                        name: node.clone(),
                        context: format!("workspace '{name}'"),
                    })
                })
                .and_then(|definition| {
                    ShadowNodeInstance::instantiate(
                        definition,
                        &resolver,
                        &allocator,
                        &mut pool,
                        device,
                        plan.output_size,
                    )
                });
            match instance {
                Ok(instance) => {
                    self.shadow_nodes.insert(instance);
                    created.push(node.clone());
                }
                Err(err) => {
                    for node in created {
                        self.shadow_nodes.discard(&node, &mut pool, device);
                    }
                    allocation.discard(&mut pool, device);
                    return Err(err);
                }
            }
        }
        for node in &plan.shadow_nodes {
            self.shadow_nodes.retain(node);
        }
        drop(pool);

        let workspace = Workspace::new(definition, plan, allocation, output, cameras);
        Ok(self.insert_workspace(workspace))
    }

    fn insert_workspace(&mut self, workspace: Workspace) -> WorkspaceHandle {
        if let Some(index) = self.workspaces.iter().position(|slot| slot.workspace.is_none()) {
            let slot = &mut self.workspaces[index];
            slot.workspace = Some(workspace);
            return WorkspaceHandle {
                index: index as u32,
                generation: slot.generation,
            };
        }
        self.workspaces.push(WorkspaceSlot {
            generation: 0,
            workspace: Some(workspace),
        });
        WorkspaceHandle {
            index: (self.workspaces.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Release a workspace's textures and invalidate its handle.
    pub fn teardown_workspace(&mut self, handle: WorkspaceHandle) -> CompositorResult<()> {
        let slot = self
            .workspaces
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(StateError::StaleHandle)?;
        let mut workspace = slot.workspace.take().ok_or(StateError::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);

        let device = &*self.device;
        let mut pool = self.pool.lock();
        workspace.teardown(&mut pool, device)?;
        for node in &workspace.plan().shadow_nodes {
            self.shadow_nodes.release(node, &mut pool, device);
        }
        Ok(())
    }

    /// Start a new frame and tick one workspace.
    pub fn tick(&mut self, handle: WorkspaceHandle) -> CompositorResult<FrameReport> {
        self.frame += 1;
        self.tick_workspace(handle)
    }

    /// Start a new frame and tick every workspace in handle order.
    pub fn tick_all(&mut self) -> Vec<(WorkspaceHandle, CompositorResult<FrameReport>)> {
        self.frame += 1;
        let handles: Vec<WorkspaceHandle> = self
            .workspaces
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.workspace.is_some())
            .map(|(index, slot)| WorkspaceHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| (handle, self.tick_workspace(handle)))
            .collect()
    }

    fn tick_workspace(&mut self, handle: WorkspaceHandle) -> CompositorResult<FrameReport> {
        let frame = self.frame;
        let Self {
            config,
            device,
            materials,
            scene,
            workspaces,
            shadow_nodes,
            ..
        } = self;
        let workspace = workspaces
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.workspace.as_mut())
            .ok_or(StateError::StaleHandle)?;

        match workspace.state() {
            WorkspaceState::Instantiated => workspace.activate()?,
            WorkspaceState::Active => {}
            WorkspaceState::Suspended => {
                log::trace!("Workspace '{}' is suspended", workspace.name());
                return Ok(FrameReport::new(frame));
            }
            state => {
                return Err(StateError::InvalidTransition {
                    state,
                    action: "tick",
                }
                .into())
            }
        }

        let mut report = FrameReport::new(frame);
        let mut commands = CommandList::new();
        let mut shadow_maps: HashMap<String, Vec<TextureHandle>> = HashMap::new();
        let mut rendered: Vec<(String, Camera)> = Vec::new();

        for (node, policy) in workspace.shadow_policies() {
            let Some(instance) = shadow_nodes.get(node) else {
                continue;
            };
            let Some(camera) = workspace.shadow_node_camera(node).cloned() else {
                let err = PassExecutionError::new(
                    PassKind::RenderScene,
                    node.clone(),
                    PassFailure::NoCameraBound(None),
                );
                match config.pass_error_policy {
                    PassErrorPolicy::AbortFrame => return Err(err.into()),
                    PassErrorPolicy::SkipTarget => {
                        log::warn!("Skipping shadow node: {}", err);
                        report.errors.push(err);
                        continue;
                    }
                }
            };

            match instance.decide(*policy, frame, &camera, &config.view_tolerance) {
                ShadowDecision::Reuse => {
                    log::trace!("Frame {}: reusing shadow node '{}'", frame, node);
                    report.shadow_nodes_reused.push(node.clone());
                }
                ShadowDecision::Render => {
                    log::trace!("Frame {}: rendering shadow node '{}'", frame, node);
                    let lights = scene.lights();
                    let shadow_cameras = instance.shadow_cameras(&camera, &lights);
                    let no_maps = HashMap::new();
                    let ctx = PassContext {
                        plan: instance.plan(),
                        allocation: instance.allocation(),
                        materials: &**materials,
                        scene: &**scene,
                        cameras: workspace.cameras(),
                        slot_bit: 0x01,
                        viewport_modifier: IDENTITY_VIEWPORT_MODIFIER,
                        shadow_maps: &no_maps,
                        shadow_cameras: &shadow_cameras,
                    };
                    FrameExecutor::new(workspace.listeners(), config.pass_error_policy)
                        .with_parallel_recording(config.parallel_recording)
                        .replay(
                            &ctx,
                            instance.batches(),
                            instance.render_count() == 0,
                            &mut report,
                            &mut commands,
                        )?;
                    report.shadow_nodes_rendered.push(node.clone());
                    rendered.push((node.clone(), camera));
                }
            }
            shadow_maps.insert(node.clone(), instance.shadow_maps().to_vec());
        }

        workspace.record(
            config,
            &**materials,
            &**scene,
            &shadow_maps,
            &mut report,
            &mut commands,
        )?;
        device.submit(&commands)?;

        for (node, camera) in rendered {
            if let Some(instance) = shadow_nodes.get_mut(&node) {
                instance.mark_rendered(frame, camera);
            }
        }
        workspace.frame_executed();
        log::trace!(
            "Frame {}: workspace '{}' submitted {} command(s)",
            frame,
            workspace.name(),
            commands.len()
        );
        Ok(report)
    }

    /// Camera a shadow node renders for in this workspace, instead of the
    /// workspace's default camera.
    pub fn set_shadow_node_camera(
        &mut self,
        handle: WorkspaceHandle,
        node: &str,
        camera: Camera,
    ) -> CompositorResult<()> {
        let workspace = self.workspace_mut(handle)?;
        if !workspace.requests_shadow_node(node) {
            return Err(DefinitionError::UnknownReference {
                name: node.to_string(),
                context: format!("shadow nodes of workspace '{}'", workspace.name()),
            }
            .into());
        }
        workspace.set_shadow_node_camera(node, camera);
        Ok(())
    }

    /// Bind a named camera, or the default camera for `None`.
    pub fn set_camera(
        &mut self,
        handle: WorkspaceHandle,
        name: Option<&str>,
        camera: Camera,
    ) -> CompositorResult<()> {
        self.workspace_mut(handle)?.set_camera(name, camera);
        Ok(())
    }

    pub fn set_execution_mask(&mut self, handle: WorkspaceHandle, mask: u8) -> CompositorResult<()> {
        self.workspace_mut(handle)?.set_execution_mask(mask);
        Ok(())
    }

    pub fn set_viewport_modifier(
        &mut self,
        handle: WorkspaceHandle,
        slot: usize,
        modifier: glam::Vec4,
    ) -> CompositorResult<()> {
        self.workspace_mut(handle)?.set_viewport_modifier(slot, modifier);
        Ok(())
    }

    /// Suspend (`false`) or resume (`true`) a workspace.
    pub fn set_enabled(&mut self, handle: WorkspaceHandle, enabled: bool) -> CompositorResult<()> {
        self.workspace_mut(handle)?.set_enabled(enabled)?;
        Ok(())
    }

    pub fn set_output_texture(
        &mut self,
        handle: WorkspaceHandle,
        texture: TextureHandle,
    ) -> CompositorResult<()> {
        self.workspace_mut(handle)?.set_output_texture(texture);
        Ok(())
    }

    /// Recompile a workspace for a resized or reformatted output target.
    ///
    /// Output-relative textures are reallocated at the new size, and so are
    /// the textures of shadow nodes sized against the output. The new plan is
    /// allocated before the old one is released: on failure the workspace
    /// keeps rendering with its current plan.
    pub fn resize_output(
        &mut self,
        handle: WorkspaceHandle,
        output: OutputTarget,
    ) -> CompositorResult<()> {
        let definition = self.workspace_mut(handle)?.shared_definition();

        let resolver = DependencyResolver::new(&self.store);
        let mut plan = resolver.resolve(&definition, Some(&output))?;
        let allocator = ResourceAllocator::new(self.config.texture_budget);
        let device = &*self.device;
        let mut pool = self.pool.lock();
        let allocation = allocator.allocate(&mut plan, Some(&output), &mut pool, device)?;
        if let Err(err) = SynchronizationManager::new().annotate(&mut plan) {
            log::error!("Workspace '{}': {}", definition.name, err);
            allocation.discard(&mut pool, device);
            return Err(err.into());
        }

        for node in &plan.shadow_nodes {
            let stale = self
                .shadow_nodes
                .get(node)
                .map_or(false, |instance| {
                    instance.follows_output_size() && instance.output_size() != plan.output_size
                });
            let Some(shadow_definition) = self.store.shadow_node(node).filter(|_| stale) else {
                continue;
            };
            match ShadowNodeInstance::instantiate(
                shadow_definition,
                &resolver,
                &allocator,
                &mut pool,
                device,
                plan.output_size,
            ) {
                Ok(instance) => self.shadow_nodes.replace(instance, &mut pool, device),
                Err(err) => log::warn!("Shadow node '{}' keeps its old size: {}", node, err),
            }
        }

        let slot = self
            .workspaces
            .get_mut(handle.index as usize)
            .and_then(|slot| slot.workspace.as_mut());
        match slot {
            Some(workspace) => {
                if let Some(old) = workspace.rebuild(plan, allocation, output) {
                    old.release(&mut pool, device);
                }
                Ok(())
            }
            None => {
                allocation.discard(&mut pool, device);
                Err(StateError::StaleHandle.into())
            }
        }
    }

    pub fn add_listener(
        &mut self,
        handle: WorkspaceHandle,
        listener: Arc<dyn PassListener>,
    ) -> CompositorResult<()> {
        self.workspace_mut(handle)?.add_listener(listener);
        Ok(())
    }

    /// Destroy pooled textures no workspace uses. Returns how many were destroyed.
    pub fn evict_unused(&mut self) -> usize {
        let evicted = self.pool.lock().evict_unused(&*self.device);
        if evicted > 0 {
            log::debug!("Evicted {} cached texture(s)", evicted);
        }
        evicted
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        let handles: Vec<WorkspaceHandle> = self
            .workspaces
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.workspace.is_some())
            .map(|(index, slot)| WorkspaceHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        for handle in handles {
            if let Err(err) = self.teardown_workspace(handle) {
                log::warn!("Failed to tear down workspace on drop: {}", err);
            }
        }
    }
}
