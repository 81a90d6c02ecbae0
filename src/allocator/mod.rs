//! Logical to physical texture binding.
//!
//! Allocation happens once per workspace instantiation:
//!
//! 1. Explicitly resolved MSAA textures get a single-sampled twin, and a
//!    resolve invocation is inserted before every sampling consumer that
//!    would otherwise see stale contents. Sampling consumers are rebound to
//!    the twin.
//! 2. Lifetimes (first and last plan position touching a texture) are
//!    computed and transient textures are packed into alias slots: the
//!    lowest slot whose previous occupant is dead and whose descriptor and
//!    aliasing group match is reused. Persistent textures get a slot each.
//! 3. The total footprint is checked against the budget and one physical
//!    texture per slot is acquired from the pool.

mod pool;

pub use pool::{PhysicalTexture, PhysicalTextureId, PoolStats, TexturePool};

use std::collections::HashSet;

use crate::backend::{RenderDevice, TextureHandle};
use crate::definition::{PassDefinition, PassKind, TextureRef};
use crate::error::AllocationError;
use crate::plan::{ExecutionPlan, LogicalTexture, LogicalTextureId, PassInvocation, TextureOrigin};
use crate::types::TextureUsage;
use crate::workspace::OutputTarget;

/// A run of logical textures sharing one physical texture
#[derive(Debug, Clone, PartialEq)]
pub struct AliasSlot {
    pub descriptor: crate::types::TextureDescriptor,
    pub aliasing_group: Option<u32>,
    /// Occupants in lifetime order
    pub textures: Vec<LogicalTextureId>,
    /// `(first, last)` plan position of each occupant, parallel to `textures`
    pub lifetimes: Vec<(usize, usize)>,
    /// Persistent slots hold exactly one texture
    pub persistent: bool,
}

impl AliasSlot {
    fn last_use(&self) -> Option<usize> {
        self.lifetimes.last().map(|&(_, last)| last)
    }

    pub fn byte_size(&self) -> u64 {
        self.descriptor.byte_size()
    }
}

/// Alias slots and the logical texture binding, before GPU allocation
#[derive(Debug, Clone, PartialEq)]
pub struct SlotAssignment {
    pub slots: Vec<AliasSlot>,
    /// Logical texture -> slot; `None` for external or unused textures
    pub binding: Vec<Option<usize>>,
    pub total_bytes: u64,
}

/// Physical resources backing one plan
#[derive(Debug)]
pub struct Allocation {
    pub assignment: SlotAssignment,
    /// One pooled texture per slot
    pub physical: Vec<PhysicalTextureId>,
    /// Resolved handle per logical texture, cached for frame recording
    handles: Vec<Option<TextureHandle>>,
}

impl Allocation {
    pub fn handle(&self, id: LogicalTextureId) -> Option<TextureHandle> {
        self.handles.get(id.0).copied().flatten()
    }

    pub fn slot_of(&self, id: LogicalTextureId) -> Option<usize> {
        self.assignment.binding.get(id.0).copied().flatten()
    }

    pub fn physical_count(&self) -> usize {
        self.physical.len()
    }

    /// Return every physical texture to the pool.
    pub fn release(self, pool: &mut TexturePool, device: &dyn RenderDevice) {
        for id in self.physical {
            pool.release(device, id);
        }
    }

    /// Destroy every physical texture instead of caching it, used when an
    /// instantiation is rolled back.
    pub fn discard(self, pool: &mut TexturePool, device: &dyn RenderDevice) {
        for id in self.physical {
            pool.discard(device, id);
        }
    }

    /// Rebind the external output texture, e.g. after a swapchain resize.
    pub fn rebind_output(&mut self, plan: &ExecutionPlan, handle: TextureHandle) {
        if let Some(output) = plan.output {
            self.handles[output.0] = Some(handle);
        }
    }
}

/// Binds logical textures to pooled physical textures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAllocator {
    budget: Option<u64>,
}

impl ResourceAllocator {
    pub fn new(budget: Option<u64>) -> Self {
        Self { budget }
    }

    /// Insert resolve invocations for explicitly resolved MSAA textures and
    /// rebind their sampling consumers. Returns how many were inserted.
    pub fn insert_resolves(&self, plan: &mut ExecutionPlan) -> usize {
        // Textures already resolved by a pass in the definitions are left alone
        let user_resolved: HashSet<LogicalTextureId> = plan
            .invocations
            .iter()
            .filter(|inv| inv.kind() == PassKind::Resolve)
            .flat_map(|inv| inv.inputs.iter().copied())
            .collect();

        let explicit: Vec<LogicalTextureId> = (0..plan.textures.len())
            .map(LogicalTextureId)
            .filter(|id| plan.texture(*id).explicit_resolve && !user_resolved.contains(id))
            .collect();
        if explicit.is_empty() {
            return 0;
        }

        let mut twins = vec![None; plan.textures.len()];
        for &msaa in &explicit {
            let source = plan.texture(msaa).clone();
            let mut descriptor = source.descriptor.clone();
            descriptor.sample_count = 1;
            descriptor.usage |= TextureUsage::COPY_DST;
            plan.textures.push(LogicalTexture {
                name: format!("{}@resolved", source.name),
                origin: TextureOrigin::Resolved { msaa },
                descriptor,
                persistent: source.persistent,
                implicit_resolve: false,
                explicit_resolve: false,
                aliasing_group: source.aliasing_group,
            });
            twins[msaa.0] = Some(LogicalTextureId(plan.textures.len() - 1));
        }

        let original = std::mem::take(&mut plan.invocations);
        let mut invocations = Vec::with_capacity(original.len() + explicit.len());
        let mut dirty = vec![false; plan.textures.len()];
        let mut last_writer: Vec<Option<usize>> = vec![None; plan.textures.len()];
        let mut inserted = 0;

        for mut invocation in original {
            let mut resolved_here = HashSet::new();
            for position in 0..invocation.inputs.len() {
                let msaa = invocation.inputs[position];
                let Some(twin) = twins[msaa.0] else {
                    continue;
                };
                if dirty[msaa.0] && resolved_here.insert(msaa) {
                    let producer = last_writer[msaa.0]
                        .map(|i: usize| &invocations[i])
                        .unwrap_or(&invocation);
                    let resolve = PassInvocation {
                        node: producer.node.clone(),
                        node_index: producer.node_index,
                        target_index: None,
                        pass_index: None,
                        pass: PassDefinition::resolve(TextureRef::local(
                            plan.textures[msaa.0].name.clone(),
                        )),
                        target: twin,
                        inputs: vec![msaa],
                        uavs: Vec::new(),
                        relaxed_reads: Vec::new(),
                    };
                    log::debug!(
                        "Inserted resolve of '{}' before {:?} pass of '{}'",
                        plan.textures[msaa.0].name,
                        invocation.kind(),
                        invocation.node
                    );
                    invocations.push(resolve);
                    dirty[msaa.0] = false;
                    inserted += 1;
                }
                invocation.inputs[position] = twin;
            }
            for (relaxed, _) in invocation.relaxed_reads.iter_mut() {
                if let Some(twin) = twins[relaxed.0] {
                    *relaxed = twin;
                }
            }

            for written in invocation.writes() {
                if twins[written.0].is_some() {
                    dirty[written.0] = true;
                    last_writer[written.0] = Some(invocations.len());
                }
            }
            invocations.push(invocation);
        }

        plan.invocations = invocations;
        plan.rebuild_batches();
        inserted
    }

    /// Pack logical textures into alias slots and check the budget.
    pub fn assign_slots(&self, plan: &ExecutionPlan) -> Result<SlotAssignment, AllocationError> {
        let lifetimes = plan.lifetimes();
        let mut slots: Vec<AliasSlot> = Vec::new();
        let mut binding = vec![None; plan.textures.len()];

        let mut transient = Vec::new();
        for (index, texture) in plan.textures.iter().enumerate() {
            let Some(lifetime) = lifetimes[index] else {
                continue;
            };
            if texture.is_external() {
                continue;
            }
            if texture.persistent {
                slots.push(AliasSlot {
                    descriptor: texture.descriptor.clone(),
                    aliasing_group: texture.aliasing_group,
                    textures: vec![LogicalTextureId(index)],
                    lifetimes: vec![lifetime],
                    persistent: true,
                });
                binding[index] = Some(slots.len() - 1);
            } else {
                transient.push((lifetime, index));
            }
        }

        // Sort by lifetime start, ties by logical id
        transient.sort_by_key(|&((start, _), index)| (start, index));
        for ((start, end), index) in transient {
            let texture = &plan.textures[index];
            let reusable = slots.iter().position(|slot| {
                !slot.persistent
                    && slot.descriptor == texture.descriptor
                    && slot.aliasing_group == texture.aliasing_group
                    && slot.last_use().map_or(true, |last| last < start)
            });
            let slot = match reusable {
                Some(slot) => slot,
                None => {
                    slots.push(AliasSlot {
                        descriptor: texture.descriptor.clone(),
                        aliasing_group: texture.aliasing_group,
                        textures: Vec::new(),
                        lifetimes: Vec::new(),
                        persistent: false,
                    });
                    slots.len() - 1
                }
            };
            slots[slot].textures.push(LogicalTextureId(index));
            slots[slot].lifetimes.push((start, end));
            binding[index] = Some(slot);
        }

        let total_bytes: u64 = slots.iter().map(AliasSlot::byte_size).sum();
        if let Some(budget) = self.budget {
            if total_bytes > budget {
                let mut running = 0u64;
                let mut declarations = Vec::new();
                for slot in &slots {
                    running += slot.byte_size();
                    if running > budget {
                        declarations.extend(
                            slot.textures
                                .iter()
                                .map(|id| plan.texture(*id).name.clone()),
                        );
                    }
                }
                return Err(AllocationError::OutOfTextureBudget {
                    budget,
                    required: total_bytes,
                    declarations,
                });
            }
        }

        log::debug!(
            "Workspace '{}': {} logical texture(s) in {} slot(s), {} bytes",
            plan.workspace,
            binding.iter().flatten().count(),
            slots.len(),
            total_bytes
        );
        Ok(SlotAssignment {
            slots,
            binding,
            total_bytes,
        })
    }

    /// Insert resolves, assign slots and acquire physical textures.
    ///
    /// On failure every texture acquired so far is destroyed again and the
    /// plan is left without bindings.
    pub fn allocate(
        &self,
        plan: &mut ExecutionPlan,
        output: Option<&OutputTarget>,
        pool: &mut TexturePool,
        device: &dyn RenderDevice,
    ) -> Result<Allocation, AllocationError> {
        self.insert_resolves(plan);
        let assignment = self.assign_slots(plan)?;

        let mut physical = Vec::with_capacity(assignment.slots.len());
        for slot in &assignment.slots {
            let label = slot
                .textures
                .first()
                .map(|id| plan.texture(*id).name.as_str())
                .unwrap_or("unnamed");
            match pool.acquire(device, &slot.descriptor, label) {
                Ok(id) => physical.push(id),
                Err(err) => {
                    log::warn!(
                        "Workspace '{}': texture '{}' could not be created: {}",
                        plan.workspace,
                        label,
                        err
                    );
                    for id in physical {
                        pool.discard(device, id);
                    }
                    return Err(err.into());
                }
            }
        }

        let mut handles = vec![None; plan.textures.len()];
        for (index, slot) in assignment.binding.iter().enumerate() {
            if let Some(slot) = slot {
                handles[index] = pool.handle(physical[*slot]);
            }
        }
        if let (Some(id), Some(output)) = (plan.output, output) {
            handles[id.0] = Some(output.texture);
        }

        Ok(Allocation {
            assignment,
            physical,
            handles,
        })
    }
}
