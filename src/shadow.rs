//! Shadow node instances and shadow camera setup.
//!
//! A shadow node is compiled and allocated once per compositor, no matter how
//! many workspaces request it. Each frame, every requesting workspace asks the
//! instance whether its maps must be rendered again for its camera:
//!
//! | Policy        | Renders when                                                    |
//! |---------------|-----------------------------------------------------------------|
//! | `Recalculate` | always                                                          |
//! | `First`       | not yet rendered this frame                                     |
//! | `Reuse`       | not yet rendered this frame for a camera within tolerance       |
//!
//! Shadow cameras are orthographic cameras looking along the light, fitted to
//! (a slice of) the viewer's frustum according to the map's technique.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;

use crate::allocator::{Allocation, ResourceAllocator, TexturePool};
use crate::backend::{RenderDevice, TextureHandle};
use crate::definition::{
    PassOp, ReusePolicy, ShadowMapDefinition, ShadowNodeDefinition, ShadowTechnique, SizePolicy,
};
use crate::error::{CompositorResult, DefinitionError};
use crate::plan::ExecutionPlan;
use crate::resolver::DependencyResolver;
use crate::scene::{Camera, Light, LightKind, Projection, ViewTolerance};
use crate::sync::SynchronizationManager;

/// Outcome of evaluating a shadow node's policy for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowDecision {
    Render,
    Reuse,
}

/// Last time an instance's maps were rendered
#[derive(Debug, Clone)]
struct LastRender {
    frame: u64,
    camera: Camera,
}

/// A compiled, allocated shadow node shared by every workspace using it.
pub struct ShadowNodeInstance {
    definition: Arc<ShadowNodeDefinition>,
    plan: ExecutionPlan,
    allocation: Allocation,
    /// Physical texture of each shadow map, in declaration order
    maps: Vec<TextureHandle>,
    batches: Vec<Vec<std::ops::Range<usize>>>,
    output_size: (u32, u32),
    /// Union of the visibility masks of the node's shadow map passes
    light_mask: u32,
    users: usize,
    last_render: Option<LastRender>,
    render_count: u64,
}

impl ShadowNodeInstance {
    /// Compile and allocate a shadow node. Nothing stays allocated on failure.
    pub fn instantiate(
        definition: Arc<ShadowNodeDefinition>,
        resolver: &DependencyResolver<'_>,
        allocator: &ResourceAllocator,
        pool: &mut TexturePool,
        device: &dyn RenderDevice,
        output_size: (u32, u32),
    ) -> CompositorResult<Self> {
        let mut plan = resolver.resolve_shadow_node(&definition, output_size)?;
        let allocation = allocator.allocate(&mut plan, None, pool, device)?;

        let bound: CompositorResult<Vec<TextureHandle>> = SynchronizationManager::new()
            .annotate(&mut plan)
            .map_err(Into::into)
            .and_then(|_| map_handles(&definition, &plan, &allocation).map_err(Into::into));
        let maps = match bound {
            Ok(maps) => maps,
            Err(err) => {
                allocation.discard(pool, device);
                return Err(err);
            }
        };

        log::info!(
            "Instantiated shadow node '{}' ({} map(s), {} pass(es))",
            definition.name(),
            maps.len(),
            plan.pass_count()
        );
        let batches = crate::frame::batch_groups(&plan);
        let light_mask = plan
            .invocations
            .iter()
            .filter_map(|invocation| match &invocation.pass.op {
                PassOp::RenderScene(scene) if scene.shadow_map.is_some() => {
                    Some(scene.visibility_mask)
                }
                _ => None,
            })
            .fold(0, |mask, pass_mask| mask | pass_mask);
        Ok(Self {
            definition,
            plan,
            allocation,
            maps,
            batches,
            output_size,
            light_mask,
            users: 0,
            last_render: None,
            render_count: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &ShadowNodeDefinition {
        &self.definition
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub(crate) fn batches(&self) -> &[Vec<std::ops::Range<usize>>] {
        &self.batches
    }

    /// Physical texture of each shadow map, in declaration order.
    pub fn shadow_maps(&self) -> &[TextureHandle] {
        &self.maps
    }

    /// Output size the node's textures were sized against.
    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    /// Whether any texture of the node is sized relative to the output.
    pub fn follows_output_size(&self) -> bool {
        self.definition
            .node
            .textures
            .iter()
            .any(|texture| !matches!(texture.size, SizePolicy::Explicit { .. }))
    }

    /// Number of workspaces currently using this instance.
    pub fn users(&self) -> usize {
        self.users
    }

    /// How many times the maps were rendered since instantiation.
    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    /// Decide whether a request for `camera` in `frame` must render.
    pub fn decide(
        &self,
        policy: ReusePolicy,
        frame: u64,
        camera: &Camera,
        tolerance: &ViewTolerance,
    ) -> ShadowDecision {
        let this_frame = self.last_render.as_ref().filter(|last| last.frame == frame);
        let reuse = match policy {
            ReusePolicy::Recalculate => false,
            ReusePolicy::First => this_frame.is_some(),
            ReusePolicy::Reuse => {
                this_frame.map_or(false, |last| last.camera.approx_eq(camera, tolerance))
            }
        };
        if reuse {
            ShadowDecision::Reuse
        } else {
            ShadowDecision::Render
        }
    }

    /// Light camera of every shadow map for a viewer; `None` for maps whose
    /// light index has no casting light.
    pub fn shadow_cameras(&self, camera: &Camera, lights: &[Light]) -> Vec<Option<Camera>> {
        let closest = closest_lights(
            lights,
            camera.position,
            self.definition.num_lights,
            self.light_mask,
        );
        self.definition
            .shadow_maps
            .iter()
            .map(|map| {
                closest
                    .get(map.light)
                    .map(|light| shadow_camera(camera, light, map))
            })
            .collect()
    }

    pub(crate) fn mark_rendered(&mut self, frame: u64, camera: Camera) {
        self.render_count += 1;
        self.last_render = Some(LastRender { frame, camera });
    }

    fn release(self, pool: &mut TexturePool, device: &dyn RenderDevice) {
        log::info!("Released shadow node '{}'", self.name());
        self.allocation.release(pool, device);
    }
}

fn map_handles(
    definition: &ShadowNodeDefinition,
    plan: &ExecutionPlan,
    allocation: &Allocation,
) -> Result<Vec<TextureHandle>, DefinitionError> {
    definition
        .shadow_maps
        .iter()
        .map(|map| {
            let name = format!("{}/{}", definition.name(), map.texture);
            plan.texture_id(&name)
                .and_then(|id| allocation.handle(id))
                .ok_or_else(|| DefinitionError::Invalid {
                    name: definition.name().to_string(),
                    reason: format!("shadow map texture '{}' is never rendered", map.texture),
                })
        })
        .collect()
}

/// Shadow node instances keyed by name, reference counted by workspace.
#[derive(Default)]
pub struct ShadowNodeCache {
    instances: HashMap<String, ShadowNodeInstance>,
}

impl ShadowNodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ShadowNodeInstance> {
        self.instances.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ShadowNodeInstance> {
        self.instances.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Insert a freshly instantiated node. It starts with no users.
    pub fn insert(&mut self, instance: ShadowNodeInstance) {
        self.instances.insert(instance.name().to_string(), instance);
    }

    /// Register one more user of an existing instance.
    pub fn retain(&mut self, name: &str) -> bool {
        match self.instances.get_mut(name) {
            Some(instance) => {
                instance.users += 1;
                true
            }
            None => false,
        }
    }

    /// Swap in a re-instantiated node, keeping the users of the one it
    /// replaces. The old instance's textures go back to the pool.
    pub(crate) fn replace(
        &mut self,
        mut instance: ShadowNodeInstance,
        pool: &mut TexturePool,
        device: &dyn RenderDevice,
    ) {
        if let Some(old) = self.instances.remove(instance.name()) {
            instance.users = old.users;
            old.release(pool, device);
        }
        self.insert(instance);
    }

    /// Drop one user; the last one returns the instance's textures to the pool.
    pub fn release(&mut self, name: &str, pool: &mut TexturePool, device: &dyn RenderDevice) {
        let Some(instance) = self.instances.get_mut(name) else {
            return;
        };
        instance.users = instance.users.saturating_sub(1);
        if instance.users == 0 {
            if let Some(instance) = self.instances.remove(name) {
                instance.release(pool, device);
            }
        }
    }
}

impl ShadowNodeCache {
    /// Remove an instance and destroy its textures, regardless of users.
    pub(crate) fn discard(&mut self, name: &str, pool: &mut TexturePool, device: &dyn RenderDevice) {
        if let Some(instance) = self.instances.remove(name) {
            instance.allocation.discard(pool, device);
        }
    }
}

/// The `count` shadow-casting lights closest to `point`, closest first.
/// Only lights whose visibility flags intersect `visibility_mask` count.
///
/// Directional lights always come first; ties keep scene order.
pub fn closest_lights(
    lights: &[Light],
    point: Vec3,
    count: usize,
    visibility_mask: u32,
) -> Vec<Light> {
    let mut casting: Vec<(f32, &Light)> = lights
        .iter()
        .filter(|light| light.casts_shadows && light.visibility_flags & visibility_mask != 0)
        .map(|light| (light.distance_to(point), light))
        .collect();
    casting.sort_by(|a, b| a.0.total_cmp(&b.0));
    casting
        .into_iter()
        .take(count)
        .map(|(_, light)| light.clone())
        .collect()
}

/// Split distances of the practical PSSM scheme.
///
/// Returns `num_splits + 1` distances from `near` to `far`. `lambda` blends
/// between logarithmic (1.0) and uniform (0.0) splitting.
pub fn pssm_split_points(num_splits: usize, near: f32, far: f32, lambda: f32) -> Vec<f32> {
    let num_splits = num_splits.max(1);
    let near = near.max(f32::EPSILON);
    (0..=num_splits)
        .map(|i| {
            if i == 0 {
                return near;
            }
            if i == num_splits {
                return far;
            }
            let fraction = i as f32 / num_splits as f32;
            let log = near * (far / near).powf(fraction);
            let uniform = near + (far - near) * fraction;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Light camera rendering one shadow map for `view`.
pub fn shadow_camera(view: &Camera, light: &Light, map: &ShadowMapDefinition) -> Camera {
    let near = view.projection.near();
    let far = view.projection.far();

    let corners: Vec<Vec3> = match map.technique {
        ShadowTechnique::Uniform | ShadowTechnique::Focused => {
            view.frustum_corners(near, far).to_vec()
        }
        ShadowTechnique::Pssm {
            num_splits,
            lambda,
            split_padding,
        } => {
            let splits = pssm_split_points(num_splits, near, far, lambda);
            let last = splits.len() - 1;
            let start = splits[map.split.min(last - 1)];
            let end = splits[(map.split + 1).min(last)];
            view.frustum_corners((start - split_padding).max(near), (end + split_padding).min(far))
                .to_vec()
        }
        ShadowTechnique::PlaneOptimal { normal, distance } => {
            let normal = normal.normalize_or_zero();
            view.frustum_corners(near, far)
                .iter()
                .map(|&p| p - normal * (normal.dot(p) + distance))
                .collect()
        }
    };

    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let direction = light_direction(light, center);
    match map.technique {
        ShadowTechnique::Uniform => fit_sphere(&corners, center, direction),
        _ => fit_box(&corners, center, direction),
    }
}

fn light_direction(light: &Light, target: Vec3) -> Vec3 {
    let direction = match light.kind {
        LightKind::Directional | LightKind::Spot { .. } => light.direction,
        LightKind::Point => target - light.position,
    };
    let direction = direction.normalize_or_zero();
    if direction == Vec3::ZERO {
        -Vec3::Y
    } else {
        direction
    }
}

/// Orthonormal light basis `(right, up)` for a view direction.
fn light_basis(direction: Vec3) -> (Vec3, Vec3) {
    let reference = if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let right = direction.cross(reference).normalize();
    let up = right.cross(direction);
    (right, up)
}

/// Depth kept in front of the closest caster.
const DEPTH_PADDING: f32 = 1.0;

/// Tight light-space box around `points`.
fn fit_box(points: &[Vec3], center: Vec3, direction: Vec3) -> Camera {
    let (right, up) = light_basis(direction);
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for &p in points {
        let local = p - center;
        let light_space = Vec3::new(local.dot(right), local.dot(up), local.dot(direction));
        min = min.min(light_space);
        max = max.max(light_space);
    }
    let mid = (min + max) * 0.5;
    let origin = center + right * mid.x + up * mid.y;
    light_camera(
        origin + direction * (min.z - DEPTH_PADDING),
        direction,
        up,
        (max.x - min.x) * 0.5,
        (max.y - min.y) * 0.5,
        max.z - min.z + 2.0 * DEPTH_PADDING,
    )
}

/// Bounding sphere of `points`; stable under view rotation.
fn fit_sphere(points: &[Vec3], center: Vec3, direction: Vec3) -> Camera {
    let radius = points
        .iter()
        .map(|p| p.distance(center))
        .fold(0.0_f32, f32::max);
    let (_, up) = light_basis(direction);
    light_camera(
        center - direction * (radius + DEPTH_PADDING),
        direction,
        up,
        radius,
        radius,
        2.0 * (radius + DEPTH_PADDING),
    )
}

fn light_camera(
    position: Vec3,
    direction: Vec3,
    up: Vec3,
    half_width: f32,
    half_height: f32,
    depth: f32,
) -> Camera {
    Camera {
        position,
        target: position + direction,
        up,
        projection: Projection::Orthographic {
            left: -half_width,
            right: half_width,
            bottom: -half_height,
            top: half_height,
            near: 0.0,
            far: depth,
        },
    }
}
