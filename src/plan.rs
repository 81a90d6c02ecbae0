//! Compiled execution plans
//!
//! An [`ExecutionPlan`] is built once when a workspace is instantiated and
//! replayed every frame. The resolver fills in the ordered invocations and
//! the logical texture table, the allocator binds physical textures (and may
//! insert resolve invocations), and the synchronization manager annotates
//! barriers.

use std::collections::HashSet;
use std::ops::Range;

use crate::definition::{PassDefinition, PassKind, PassOp, Queue, ReusePolicy, UavBinding};
use crate::types::TextureDescriptor;

/// Index into [`ExecutionPlan::textures`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalTextureId(pub usize);

/// Where a logical texture was declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureOrigin {
    /// Declared inside a node instance
    Local { node: String },
    /// Declared at workspace scope
    Global,
    /// The render target the workspace is bound to
    Output,
    /// Single-sampled copy of an explicitly resolved MSAA texture
    Resolved { msaa: LogicalTextureId },
}

/// A texture as the plan sees it, before it is bound to GPU memory
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTexture {
    /// Qualified name, unique within the plan (`Node/name`, `global:name`, `output`)
    pub name: String,
    pub origin: TextureOrigin,
    pub descriptor: TextureDescriptor,
    /// Contents must survive across frames; never aliased
    pub persistent: bool,
    /// MSAA texture resolved as a side effect of sampling
    pub implicit_resolve: bool,
    /// MSAA texture that needs a dedicated resolve before sampling
    pub explicit_resolve: bool,
    pub aliasing_group: Option<u32>,
}

impl LogicalTexture {
    pub fn is_external(&self) -> bool {
        self.origin == TextureOrigin::Output
    }
}

/// One pass of one target of one node instance, with every texture
/// reference resolved to a logical texture.
#[derive(Debug, Clone, PartialEq)]
pub struct PassInvocation {
    pub node: String,
    pub node_index: usize,
    /// `None` for passes inserted during compilation
    pub target_index: Option<usize>,
    pub pass_index: Option<usize>,
    pub pass: PassDefinition,
    pub target: LogicalTextureId,
    /// Sampled textures, in declaration order (quad/compute inputs, resolve source)
    pub inputs: Vec<LogicalTextureId>,
    /// Parallel to the pass's UAV bindings
    pub uavs: Vec<LogicalTextureId>,
    /// Reads through annotated connections, allowed to see the previous
    /// frame's contents
    pub relaxed_reads: Vec<(LogicalTextureId, ReusePolicy)>,
}

impl PassInvocation {
    pub fn kind(&self) -> PassKind {
        self.pass.kind()
    }

    pub fn is_relaxed_read(&self, texture: LogicalTextureId) -> bool {
        self.relaxed_reads.iter().any(|&(id, _)| id == texture)
    }

    pub fn identifier(&self) -> u32 {
        self.pass.identifier
    }

    pub fn is_synthesized(&self) -> bool {
        self.pass_index.is_none()
    }

    /// Human readable position, e.g. `Bloom[1:0]`.
    pub fn label(&self) -> String {
        match (self.target_index, self.pass_index) {
            (Some(target), Some(pass)) => format!("{}[{}:{}]", self.node, target, pass),
            _ => format!("{}[{:?}]", self.node, self.kind()),
        }
    }

    pub fn queue(&self) -> Queue {
        match &self.pass.op {
            PassOp::Compute(compute) => compute.queue,
            _ => Queue::Graphics,
        }
    }

    /// UAV bindings of the pass paired with their logical textures.
    pub fn uav_bindings(&self) -> impl Iterator<Item = (&UavBinding, LogicalTextureId)> + '_ {
        let bindings: &[UavBinding] = match &self.pass.op {
            PassOp::Compute(compute) => &compute.uavs,
            PassOp::UavQueue(queue) => &queue.uavs,
            _ => &[],
        };
        bindings.iter().zip(self.uavs.iter().copied())
    }

    /// Textures whose contents are read: samplers, read-capable UAVs and a
    /// loaded render target.
    pub fn reads(&self) -> Vec<LogicalTextureId> {
        let mut reads = self.inputs.clone();
        reads.extend(
            self.uav_bindings()
                .filter(|(binding, _)| binding.access.reads())
                .map(|(_, id)| id),
        );
        if self.pass.reads_target() {
            reads.push(self.target);
        }
        reads
    }

    /// Reads through samplers and UAVs only.
    pub fn resource_reads(&self) -> Vec<LogicalTextureId> {
        let mut reads = self.inputs.clone();
        reads.extend(
            self.uav_bindings()
                .filter(|(binding, _)| binding.access.reads())
                .map(|(_, id)| id),
        );
        reads
    }

    pub fn uav_writes(&self) -> Vec<LogicalTextureId> {
        self.uav_bindings()
            .filter(|(binding, _)| binding.access.writes())
            .map(|(_, id)| id)
            .collect()
    }

    /// Every texture the pass modifies.
    pub fn writes(&self) -> Vec<LogicalTextureId> {
        let mut writes = self.uav_writes();
        if self.pass.writes_target() || self.kind() == PassKind::Stencil {
            writes.push(self.target);
        }
        writes
    }

    /// Every texture the pass touches.
    pub fn touches(&self) -> Vec<LogicalTextureId> {
        let mut touched = self.inputs.clone();
        touched.extend(self.uavs.iter().copied());
        if self.pass.writes_target() || self.pass.reads_target() || self.kind() == PassKind::Stencil
        {
            touched.push(self.target);
        }
        touched
    }

    /// Recording unit: consecutive invocations with the same key belong to
    /// the same target.
    fn group_key(&self) -> (usize, Option<usize>) {
        (self.node_index, self.target_index)
    }
}

/// Kind of synchronization inserted before a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// UAV write made visible to a later reader on the same queue
    UavWriteToRead,
    /// Async-compute write waited on by a graphics-queue reader
    QueueFence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    /// Invocation index the barrier precedes
    pub before: usize,
    pub texture: LogicalTextureId,
    pub kind: BarrierKind,
}

/// A producer target recorded ahead of a reader on an annotated connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    /// Invocation index of the reader
    pub before: usize,
    /// Target group of the producer
    pub producer: Range<usize>,
    pub texture: LogicalTextureId,
}

/// The resolved, ordered pass list of a workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub workspace: String,
    /// Node instances in execution order
    pub node_order: Vec<String>,
    pub textures: Vec<LogicalTexture>,
    pub invocations: Vec<PassInvocation>,
    pub barriers: Vec<Barrier>,
    /// Invocation ranges; targets inside one batch may record concurrently
    pub batches: Vec<Range<usize>>,
    /// Shadow nodes requested by render_scene passes, sorted by name
    pub shadow_nodes: Vec<String>,
    pub output: Option<LogicalTextureId>,
    pub output_size: (u32, u32),
}

impl ExecutionPlan {
    pub fn texture(&self, id: LogicalTextureId) -> &LogicalTexture {
        &self.textures[id.0]
    }

    pub fn texture_id(&self, name: &str) -> Option<LogicalTextureId> {
        self.textures
            .iter()
            .position(|t| t.name == name)
            .map(LogicalTextureId)
    }

    pub fn pass_count(&self) -> usize {
        self.invocations.len()
    }

    /// Invocations of one node instance, in plan order.
    pub fn node_invocations<'a>(
        &'a self,
        node: &'a str,
    ) -> impl Iterator<Item = (usize, &'a PassInvocation)> + 'a {
        self.invocations
            .iter()
            .enumerate()
            .filter(move |(_, inv)| inv.node == node)
    }

    /// Barriers recorded immediately before invocation `index`.
    pub fn barriers_before(&self, index: usize) -> impl Iterator<Item = &Barrier> + '_ {
        self.barriers.iter().filter(move |b| b.before == index)
    }

    /// Plan positions of the first and last invocation touching each texture.
    pub fn lifetimes(&self) -> Vec<Option<(usize, usize)>> {
        let mut lifetimes: Vec<Option<(usize, usize)>> = vec![None; self.textures.len()];
        for (index, invocation) in self.invocations.iter().enumerate() {
            for id in invocation.touches() {
                let entry = &mut lifetimes[id.0];
                *entry = match *entry {
                    None => Some((index, index)),
                    Some((first, _)) => Some((first, index)),
                };
            }
        }
        lifetimes
    }

    /// Producers of annotated reads that must run ahead of their reader
    /// this frame.
    ///
    /// Reads whose producer already ran earlier in the plan need nothing.
    /// Each texture is refreshed at most once per frame.
    pub fn annotated_refreshes(&self, first_frame: bool) -> Vec<Refresh> {
        let groups = self.target_groups();
        let mut refreshed = HashSet::new();
        let mut refreshes = Vec::new();
        for (index, invocation) in self.invocations.iter().enumerate() {
            for &(texture, policy) in &invocation.relaxed_reads {
                let refresh = match policy {
                    ReusePolicy::Reuse => false,
                    ReusePolicy::First => first_frame,
                    ReusePolicy::Recalculate => true,
                };
                if !refresh || refreshed.contains(&texture) {
                    continue;
                }
                let Some(writer) = self
                    .invocations
                    .iter()
                    .position(|other| other.writes().contains(&texture))
                else {
                    continue;
                };
                let Some(producer) = groups.iter().find(|g| g.contains(&writer)) else {
                    continue;
                };
                if producer.start <= index {
                    continue;
                }
                refreshed.insert(texture);
                refreshes.push(Refresh {
                    before: index,
                    producer: producer.clone(),
                    texture,
                });
            }
        }
        refreshes
    }

    /// Split the invocation list into recording batches.
    ///
    /// Targets are appended to the current batch until one of them reads or
    /// overwrites something an earlier target in the batch touches.
    pub fn rebuild_batches(&mut self) {
        let mut batches = Vec::new();
        let mut batch_start = 0;
        let mut batch_reads: HashSet<LogicalTextureId> = HashSet::new();
        let mut batch_writes: HashSet<LogicalTextureId> = HashSet::new();

        for group in self.target_groups() {
            let mut reads = HashSet::new();
            let mut writes = HashSet::new();
            for invocation in &self.invocations[group.clone()] {
                reads.extend(invocation.reads());
                writes.extend(invocation.writes());
            }

            let conflicts = reads.iter().any(|id| batch_writes.contains(id))
                || writes
                    .iter()
                    .any(|id| batch_writes.contains(id) || batch_reads.contains(id));
            if conflicts && group.start > batch_start {
                batches.push(batch_start..group.start);
                batch_start = group.start;
                batch_reads.clear();
                batch_writes.clear();
            }
            batch_reads.extend(reads);
            batch_writes.extend(writes);
        }
        if batch_start < self.invocations.len() {
            batches.push(batch_start..self.invocations.len());
        }
        self.batches = batches;
    }

    /// Consecutive invocation ranges that draw into the same target.
    pub fn target_groups(&self) -> Vec<Range<usize>> {
        let mut groups = Vec::new();
        let mut start = 0;
        for index in 1..=self.invocations.len() {
            let split = index == self.invocations.len()
                || self.invocations[index].group_key() != self.invocations[start].group_key();
            if split {
                groups.push(start..index);
                start = index;
            }
        }
        groups
    }
}
