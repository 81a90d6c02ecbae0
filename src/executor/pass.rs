//! Recording of a single pass invocation

use std::collections::HashMap;

use glam::Vec4;

use super::commands::{BoundUav, Command, CommandList, PixelRect, SampledTexture};
use crate::allocator::Allocation;
use crate::backend::{MaterialHandle, MaterialLibrary, MaterialStatus, SceneQuery, TextureHandle};
use crate::definition::{PassOp, ScenePass};
use crate::error::{PassExecutionError, PassFailure};
use crate::plan::{ExecutionPlan, LogicalTextureId, PassInvocation};
use crate::scene::Camera;
use crate::workspace::CameraSet;

/// Everything a pass needs besides its invocation.
pub struct PassContext<'a> {
    pub plan: &'a ExecutionPlan,
    pub allocation: &'a Allocation,
    pub materials: &'a dyn MaterialLibrary,
    pub scene: &'a dyn SceneQuery,
    pub cameras: &'a CameraSet,
    /// Bit of the execution slot being replayed
    pub slot_bit: u8,
    /// Viewport modifier of that slot
    pub viewport_modifier: Vec4,
    /// Shadow map textures of every shadow node rendered or reused this frame
    pub shadow_maps: &'a HashMap<String, Vec<TextureHandle>>,
    /// Inside a shadow node: the light camera of each shadow map (`None` when
    /// fewer casting lights than maps are available)
    pub shadow_cameras: &'a [Option<Camera>],
}

/// Records pass invocations into command lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassExecutor;

impl PassExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Record invocation `index` of the context's plan, preceded by its barriers.
    pub fn record(
        &self,
        ctx: &PassContext<'_>,
        index: usize,
        commands: &mut CommandList,
    ) -> Result<(), PassExecutionError> {
        let invocation = &ctx.plan.invocations[index];
        let fail = |reason: PassFailure| {
            PassExecutionError::new(invocation.kind(), invocation.label(), reason)
        };
        let handle = |id: LogicalTextureId| {
            ctx.allocation
                .handle(id)
                .ok_or_else(|| fail(PassFailure::UnboundTexture(ctx.plan.texture(id).name.clone())))
        };

        self.record_barriers(ctx, index, commands)?;

        log::trace!("Recording {:?} pass {}", invocation.kind(), invocation.label());

        match &invocation.pass.op {
            PassOp::Clear(clear) => {
                let texture = self.bind_target(ctx, invocation, commands, &handle)?;
                commands.push(Command::Clear {
                    texture,
                    buffers: clear.buffers,
                    colour: clear.colour,
                    depth: clear.depth,
                    stencil: clear.stencil,
                });
            }
            PassOp::Quad(quad) => {
                let material = resolve_material(ctx.materials.material(&quad.material), &quad.material)
                    .map_err(&fail)?;
                let inputs = self.sampled(ctx, &invocation.inputs, &handle)?;
                self.bind_target(ctx, invocation, commands, &handle)?;
                commands.push(Command::DrawQuad { material, inputs });
            }
            PassOp::RenderScene(scene) => {
                self.record_scene(ctx, invocation, scene, commands, &handle, &fail)?;
            }
            PassOp::Resolve(_) => {
                let source = invocation.inputs.first().copied().ok_or_else(|| {
                    fail(PassFailure::UnboundTexture(invocation.pass_source_name()))
                })?;
                let samples = ctx.plan.texture(source).descriptor.sample_count;
                if samples <= 1 {
                    return Err(fail(PassFailure::SingleSampledResolveSource(samples)));
                }
                commands.push(Command::Resolve {
                    source: handle(source)?,
                    destination: handle(invocation.target)?,
                });
            }
            PassOp::Stencil(state) => {
                self.bind_target(ctx, invocation, commands, &handle)?;
                commands.push(Command::SetStencil(*state));
            }
            PassOp::UavQueue(_) => {
                let uavs = self.uavs(invocation, &handle)?;
                commands.push(Command::BindUavs(uavs));
            }
            PassOp::Compute(compute) => {
                let job = resolve_material(ctx.materials.compute_job(&compute.job), &compute.job)
                    .map_err(&fail)?;
                let inputs = self.sampled(ctx, &invocation.inputs, &handle)?;
                let uavs = self.uavs(invocation, &handle)?;
                commands.push(Command::Dispatch {
                    job,
                    inputs,
                    uavs,
                    thread_groups: compute.thread_groups,
                    queue: compute.queue,
                });
            }
            PassOp::GenerateMipmaps(mipmaps) => {
                let texture = handle(invocation.target)?;
                commands.push(Command::GenerateMipmaps {
                    texture,
                    mip_levels: ctx.plan.texture(invocation.target).descriptor.mip_levels,
                    method: mipmaps.method,
                });
            }
        }
        Ok(())
    }

    /// Record only the barriers placed before invocation `index`.
    ///
    /// Used for passes skipped by the execution mask.
    pub fn record_barriers(
        &self,
        ctx: &PassContext<'_>,
        index: usize,
        commands: &mut CommandList,
    ) -> Result<(), PassExecutionError> {
        for barrier in ctx.plan.barriers_before(index) {
            let texture = ctx.allocation.handle(barrier.texture).ok_or_else(|| {
                let invocation = &ctx.plan.invocations[index];
                PassExecutionError::new(
                    invocation.kind(),
                    invocation.label(),
                    PassFailure::UnboundTexture(ctx.plan.texture(barrier.texture).name.clone()),
                )
            })?;
            commands.push(Command::Barrier {
                texture,
                kind: barrier.kind,
            });
        }
        Ok(())
    }

    fn bind_target<H>(
        &self,
        ctx: &PassContext<'_>,
        invocation: &PassInvocation,
        commands: &mut CommandList,
        handle: &H,
    ) -> Result<TextureHandle, PassExecutionError>
    where
        H: Fn(LogicalTextureId) -> Result<TextureHandle, PassExecutionError>,
    {
        let texture = handle(invocation.target)?;
        let descriptor = &ctx.plan.texture(invocation.target).descriptor;
        let mut viewport = invocation.pass.viewport;
        if invocation.pass.viewport_modifier_mask & ctx.slot_bit != 0 {
            viewport = viewport.modified(ctx.viewport_modifier);
        }
        commands.push(Command::BindTarget {
            texture,
            viewport: PixelRect::from(viewport.to_pixels(descriptor.width, descriptor.height)),
        });
        Ok(texture)
    }

    fn sampled<H>(
        &self,
        ctx: &PassContext<'_>,
        inputs: &[LogicalTextureId],
        handle: &H,
    ) -> Result<Vec<SampledTexture>, PassExecutionError>
    where
        H: Fn(LogicalTextureId) -> Result<TextureHandle, PassExecutionError>,
    {
        inputs
            .iter()
            .map(|&id| {
                Ok(SampledTexture {
                    texture: handle(id)?,
                    implicit_resolve: ctx.plan.texture(id).implicit_resolve,
                })
            })
            .collect()
    }

    fn uavs<H>(
        &self,
        invocation: &PassInvocation,
        handle: &H,
    ) -> Result<Vec<BoundUav>, PassExecutionError>
    where
        H: Fn(LogicalTextureId) -> Result<TextureHandle, PassExecutionError>,
    {
        invocation
            .uav_bindings()
            .map(|(binding, id)| {
                Ok(BoundUav {
                    slot: binding.slot,
                    texture: handle(id)?,
                    access: binding.access,
                    mip_level: binding.mip_level,
                })
            })
            .collect()
    }

    fn record_scene<H, F>(
        &self,
        ctx: &PassContext<'_>,
        invocation: &PassInvocation,
        scene: &ScenePass,
        commands: &mut CommandList,
        handle: &H,
        fail: &F,
    ) -> Result<(), PassExecutionError>
    where
        H: Fn(LogicalTextureId) -> Result<TextureHandle, PassExecutionError>,
        F: Fn(PassFailure) -> PassExecutionError,
    {
        let (camera, shadow_casters_only) = match scene.shadow_map {
            Some(map) => match ctx.shadow_cameras.get(map).and_then(Option::as_ref) {
                Some(camera) => (camera, true),
                None => {
                    log::trace!(
                        "{}: no light for shadow map #{}, nothing to draw",
                        invocation.label(),
                        map
                    );
                    self.bind_target(ctx, invocation, commands, handle)?;
                    return Ok(());
                }
            },
            None => {
                let camera = ctx
                    .cameras
                    .get(scene.camera.as_deref())
                    .ok_or_else(|| fail(PassFailure::NoCameraBound(scene.camera.clone())))?;
                (camera, false)
            }
        };

        let shadow_maps = match &scene.shadows {
            Some(shadows) => ctx
                .shadow_maps
                .get(&shadows.node)
                .cloned()
                .ok_or_else(|| fail(PassFailure::MissingShadowNode(shadows.node.clone())))?,
            None => Vec::new(),
        };

        let renderables = ctx
            .scene
            .renderables(
                camera,
                scene.first_render_queue..scene.last_render_queue,
                scene.visibility_mask,
            )
            .into_iter()
            .filter(|r| !shadow_casters_only || r.casts_shadows)
            .map(|r| r.id)
            .collect();

        self.bind_target(ctx, invocation, commands, handle)?;
        commands.push(Command::DrawRenderables {
            view_projection: camera.view_projection_matrix(),
            renderables,
            lod_bias: scene.lod_bias,
            material_scheme: scene.material_scheme.clone(),
            shadow_maps,
        });
        Ok(())
    }
}

fn resolve_material(status: MaterialStatus, name: &str) -> Result<MaterialHandle, PassFailure> {
    match status {
        MaterialStatus::Ready(handle) => Ok(handle),
        MaterialStatus::Compiling => Err(PassFailure::MaterialNotReady(name.to_string())),
        MaterialStatus::Missing => Err(PassFailure::MissingMaterial(name.to_string())),
    }
}

impl PassInvocation {
    fn pass_source_name(&self) -> String {
        match &self.pass.op {
            PassOp::Resolve(resolve) => resolve.source.to_string(),
            _ => self.node.clone(),
        }
    }
}
