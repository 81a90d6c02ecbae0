//! Workspace instances
//!
//! A [`Workspace`] is a [`WorkspaceDefinition`] compiled against one output
//! target. It owns its execution plan and physical textures for its whole
//! lifetime:
//!
//! ```text
//! Uninstantiated -> Instantiated -> Active <-> Suspended
//!                        |            |           |
//!                        +------------+-----------+--> TornDown
//! ```

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use glam::Vec4;

use crate::allocator::{Allocation, TexturePool};
use crate::backend::{MaterialLibrary, RenderDevice, SceneQuery, TextureHandle};
use crate::definition::{PassOp, ReusePolicy, WorkspaceDefinition, MAX_EXECUTION_SLOTS};
use crate::error::{PassExecutionError, StateError};
use crate::executor::{CommandList, PassContext};
use crate::frame::{batch_groups, FrameExecutor, FrameReport, PassListener};
use crate::plan::ExecutionPlan;
use crate::scene::Camera;
use crate::types::TextureFormat;
use crate::CompositorConfig;

/// Lifecycle of a workspace instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceState {
    /// No instance behind the handle was ever created by this compositor
    Uninstantiated,
    /// Compiled and allocated, not ticked yet
    Instantiated,
    Active,
    /// Disabled: ticks do nothing, allocations are kept
    Suspended,
    TornDown,
}

/// The external texture a workspace renders into, e.g. a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTarget {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub sample_count: u32,
}

impl OutputTarget {
    pub fn new(texture: TextureHandle, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            texture,
            width,
            height,
            format,
            sample_count: 1,
        }
    }

    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }
}

/// Cameras bound to a workspace: one default plus named bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSet {
    default: Option<Camera>,
    named: HashMap<String, Camera>,
}

impl CameraSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, camera: Camera) -> Self {
        self.default = Some(camera);
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, camera: Camera) -> Self {
        self.named.insert(name.into(), camera);
        self
    }

    /// Bind `camera` to `name`, or as the default camera when `name` is `None`.
    pub fn set(&mut self, name: Option<&str>, camera: Camera) {
        match name {
            Some(name) => {
                self.named.insert(name.to_string(), camera);
            }
            None => self.default = Some(camera),
        }
    }

    /// A named camera, or the default one for `None`.
    pub fn get(&self, name: Option<&str>) -> Option<&Camera> {
        match name {
            Some(name) => self.named.get(name),
            None => self.default.as_ref(),
        }
    }

    pub fn default_camera(&self) -> Option<&Camera> {
        self.default.as_ref()
    }
}

/// A compiled, allocated workspace.
pub struct Workspace {
    definition: Arc<WorkspaceDefinition>,
    state: WorkspaceState,
    plan: ExecutionPlan,
    batches: Vec<Vec<Range<usize>>>,
    allocation: Option<Allocation>,
    output: Option<OutputTarget>,
    cameras: CameraSet,
    /// Per shadow node camera overrides
    shadow_cameras: HashMap<String, Camera>,
    /// Requested shadow nodes with their combined policy, sorted by name
    shadow_policies: Vec<(String, ReusePolicy)>,
    execution_mask: u8,
    viewport_modifiers: [Vec4; MAX_EXECUTION_SLOTS],
    listeners: Vec<Arc<dyn PassListener>>,
    frames_executed: u64,
    /// Frames executed since the current plan was built
    frames_on_plan: u64,
}

impl Workspace {
    pub(crate) fn new(
        definition: Arc<WorkspaceDefinition>,
        plan: ExecutionPlan,
        allocation: Allocation,
        output: Option<OutputTarget>,
        cameras: CameraSet,
    ) -> Self {
        let shadow_policies = shadow_policies(&plan);
        let batches = batch_groups(&plan);
        log::info!(
            "Instantiated workspace '{}': {} pass(es), {} physical texture(s)",
            definition.name,
            plan.pass_count(),
            allocation.physical_count()
        );
        Self {
            state: WorkspaceState::Instantiated,
            execution_mask: definition.execution_mask,
            viewport_modifiers: definition.viewport_modifiers,
            definition,
            plan,
            batches,
            allocation: Some(allocation),
            output,
            cameras,
            shadow_cameras: HashMap::new(),
            shadow_policies,
            listeners: Vec::new(),
            frames_executed: 0,
            frames_on_plan: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &WorkspaceDefinition {
        &self.definition
    }

    pub(crate) fn shared_definition(&self) -> Arc<WorkspaceDefinition> {
        Arc::clone(&self.definition)
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    pub fn output(&self) -> Option<&OutputTarget> {
        self.output.as_ref()
    }

    pub fn cameras(&self) -> &CameraSet {
        &self.cameras
    }

    pub fn execution_mask(&self) -> u8 {
        self.execution_mask
    }

    /// Frames recorded and submitted successfully.
    pub fn frames_executed(&self) -> u64 {
        self.frames_executed
    }

    pub fn set_camera(&mut self, name: Option<&str>, camera: Camera) {
        self.cameras.set(name, camera);
    }

    pub fn set_execution_mask(&mut self, mask: u8) {
        if mask == 0 {
            log::warn!("Workspace '{}': empty execution mask, nothing will render", self.name());
        }
        self.execution_mask = mask;
    }

    pub fn set_viewport_modifier(&mut self, slot: usize, modifier: Vec4) {
        match self.viewport_modifiers.get_mut(slot) {
            Some(entry) => *entry = modifier,
            None => log::warn!("Workspace '{}': no execution slot {}", self.name(), slot),
        }
    }

    /// Rebind the output texture, e.g. to this frame's swapchain image.
    pub fn set_output_texture(&mut self, texture: TextureHandle) {
        if let Some(output) = &mut self.output {
            output.texture = texture;
        }
        if let Some(allocation) = &mut self.allocation {
            allocation.rebind_output(&self.plan, texture);
        }
    }

    /// Swap in a plan compiled for a new output target and return the
    /// textures of the old one.
    ///
    /// The next tick counts as the plan's first frame again.
    pub(crate) fn rebuild(
        &mut self,
        plan: ExecutionPlan,
        allocation: Allocation,
        output: OutputTarget,
    ) -> Option<Allocation> {
        log::info!(
            "Rebuilt workspace '{}' for {}x{} output: {} pass(es), {} physical texture(s)",
            self.name(),
            output.width,
            output.height,
            plan.pass_count(),
            allocation.physical_count()
        );
        self.shadow_policies = shadow_policies(&plan);
        self.batches = batch_groups(&plan);
        self.plan = plan;
        self.output = Some(output);
        self.frames_on_plan = 0;
        self.allocation.replace(allocation)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn PassListener>) {
        self.listeners.push(listener);
    }

    pub fn listeners(&self) -> &[Arc<dyn PassListener>] {
        &self.listeners
    }

    /// Shadow nodes this workspace requests, with the policy applied to them.
    pub fn shadow_policies(&self) -> &[(String, ReusePolicy)] {
        &self.shadow_policies
    }

    pub(crate) fn requests_shadow_node(&self, node: &str) -> bool {
        self.shadow_policies.iter().any(|(name, _)| name == node)
    }

    pub(crate) fn set_shadow_node_camera(&mut self, node: &str, camera: Camera) {
        self.shadow_cameras.insert(node.to_string(), camera);
    }

    /// Camera a shadow node renders for: the override, else the default camera.
    pub fn shadow_node_camera(&self, node: &str) -> Option<&Camera> {
        self.shadow_cameras
            .get(node)
            .or_else(|| self.cameras.default_camera())
    }

    /// Enter `Active`. Valid from `Instantiated` and `Suspended`.
    pub fn activate(&mut self) -> Result<(), StateError> {
        self.transition("activate", |state| {
            matches!(
                state,
                WorkspaceState::Instantiated | WorkspaceState::Active | WorkspaceState::Suspended
            )
            .then_some(WorkspaceState::Active)
        })
    }

    /// Enter `Suspended`. Valid from `Instantiated` and `Active`.
    pub fn suspend(&mut self) -> Result<(), StateError> {
        self.transition("suspend", |state| {
            matches!(
                state,
                WorkspaceState::Instantiated | WorkspaceState::Active | WorkspaceState::Suspended
            )
            .then_some(WorkspaceState::Suspended)
        })
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), StateError> {
        if enabled {
            self.activate()
        } else {
            self.suspend()
        }
    }

    /// Return every physical texture to the pool and enter `TornDown`.
    pub fn teardown(
        &mut self,
        pool: &mut TexturePool,
        device: &dyn RenderDevice,
    ) -> Result<(), StateError> {
        self.transition("tear down", |state| {
            (state != WorkspaceState::TornDown).then_some(WorkspaceState::TornDown)
        })?;
        if let Some(allocation) = self.allocation.take() {
            allocation.release(pool, device);
        }
        log::info!("Tore down workspace '{}'", self.name());
        Ok(())
    }

    fn transition(
        &mut self,
        action: &'static str,
        next: impl FnOnce(WorkspaceState) -> Option<WorkspaceState>,
    ) -> Result<(), StateError> {
        match next(self.state) {
            Some(state) => {
                if state != self.state {
                    log::debug!("Workspace '{}': {:?} -> {:?}", self.name(), self.state, state);
                }
                self.state = state;
                Ok(())
            }
            None => Err(StateError::InvalidTransition {
                state: self.state,
                action,
            }),
        }
    }

    /// Record the main plan once per enabled execution slot.
    pub(crate) fn record(
        &self,
        config: &CompositorConfig,
        materials: &dyn MaterialLibrary,
        scene: &dyn SceneQuery,
        shadow_maps: &HashMap<String, Vec<TextureHandle>>,
        report: &mut FrameReport,
        commands: &mut CommandList,
    ) -> Result<(), PassExecutionError> {
        let Some(allocation) = &self.allocation else {
            return Ok(());
        };
        let executor = FrameExecutor::new(&self.listeners, config.pass_error_policy)
            .with_parallel_recording(config.parallel_recording);
        let first_frame = self.frames_on_plan == 0;

        for slot in 0..MAX_EXECUTION_SLOTS {
            let slot_bit = 1u8 << slot;
            if self.execution_mask & slot_bit == 0 {
                continue;
            }
            let ctx = PassContext {
                plan: &self.plan,
                allocation,
                materials,
                scene,
                cameras: &self.cameras,
                slot_bit,
                viewport_modifier: self.viewport_modifiers[slot],
                shadow_maps,
                shadow_cameras: &[],
            };
            executor.replay(&ctx, &self.batches, first_frame, report, commands)?;
        }
        Ok(())
    }

    pub(crate) fn frame_executed(&mut self) {
        self.frames_executed += 1;
        self.frames_on_plan += 1;
    }
}

/// Combined policy per requested shadow node; the most demanding request
/// wins (`Recalculate` over `First` over `Reuse`).
fn shadow_policies(plan: &ExecutionPlan) -> Vec<(String, ReusePolicy)> {
    fn rank(policy: ReusePolicy) -> u8 {
        match policy {
            ReusePolicy::Reuse => 0,
            ReusePolicy::First => 1,
            ReusePolicy::Recalculate => 2,
        }
    }

    let mut policies: HashMap<&str, ReusePolicy> = HashMap::new();
    for invocation in &plan.invocations {
        let PassOp::RenderScene(scene) = &invocation.pass.op else {
            continue;
        };
        let Some(shadows) = &scene.shadows else {
            continue;
        };
        policies
            .entry(shadows.node.as_str())
            .and_modify(|current| {
                if rank(shadows.policy) > rank(*current) {
                    *current = shadows.policy;
                }
            })
            .or_insert(shadows.policy);
    }

    let mut sorted: Vec<(String, ReusePolicy)> = policies
        .into_iter()
        .map(|(name, policy)| (name.to_string(), policy))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
}
