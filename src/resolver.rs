//! Dependency resolution: workspace definition to ordered pass list.
//!
//! The resolver builds a graph over node instances. An edge `A -> B` exists
//! when an output channel of `A` feeds an input channel of `B`, or when `A`
//! writes a global texture that `B` reads. Edges coming from annotated
//! connections may close cycles; any other cycle is an error.
//!
//! Ordering is Kahn's algorithm with a min-heap on declaration index, so the
//! same definitions always compile to the same order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::definition::{
    NodeDefinition, PassOp, ReusePolicy, ShadowNodeDefinition, TextureDeclaration, TextureRef,
    WorkspaceDefinition,
};
use crate::error::DefinitionError;
use crate::plan::{ExecutionPlan, LogicalTexture, LogicalTextureId, PassInvocation, TextureOrigin};
use crate::store::GraphDefinitionStore;
use crate::types::{TextureDescriptor, TextureUsage};
use crate::workspace::OutputTarget;

/// Kind of a dependency edge between two node instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Same-frame dependency: the producer must run first
    Fresh,
    /// May be satisfied by an earlier frame's result
    Annotated(ReusePolicy),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    from: usize,
    to: usize,
    kind: EdgeKind,
}

/// Where a node input channel gets its texture from
#[derive(Debug, Clone, Copy)]
enum ChannelSource {
    Connection(usize),
    WorkspaceOutput,
}

/// Compiles workspace definitions into execution plans.
pub struct DependencyResolver<'a> {
    store: &'a GraphDefinitionStore,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(store: &'a GraphDefinitionStore) -> Self {
        Self { store }
    }

    /// Compile a workspace against an output target.
    ///
    /// The returned plan has no physical bindings or barriers yet.
    pub fn resolve(
        &self,
        workspace: &WorkspaceDefinition,
        output: Option<&OutputTarget>,
    ) -> Result<ExecutionPlan, DefinitionError> {
        workspace.validate()?;
        let context = format!("workspace '{}'", workspace.name);

        let mut nodes = Vec::with_capacity(workspace.nodes.len());
        for name in &workspace.nodes {
            match self.store.node(name) {
                Some(node) => nodes.push(node),
                None if self.store.shadow_node(name).is_some() => {
                    return Err(DefinitionError::Invalid {
                        name: workspace.name.clone(),
                        reason: format!("shadow node '{name}' cannot be instantiated directly"),
                    });
                }
                None => {
                    return Err(DefinitionError::UnknownReference {
                        name: name.clone(),
                        context,
                    });
                }
            }
        }

        let output_size = output.map(|o| (o.width, o.height)).unwrap_or((1, 1));
        let plan = Compilation::new(workspace, nodes, output, output_size).run(self.store)?;
        log::debug!(
            "Resolved workspace '{}': order [{}], {} pass(es), {} batch(es)",
            plan.workspace,
            plan.node_order.join(", "),
            plan.invocations.len(),
            plan.batches.len()
        );
        Ok(plan)
    }

    /// Compile a shadow node on its own. Every texture it declares is
    /// persistent, since its maps are reused across frames and cameras.
    pub fn resolve_shadow_node(
        &self,
        shadow_node: &ShadowNodeDefinition,
        output_size: (u32, u32),
    ) -> Result<ExecutionPlan, DefinitionError> {
        shadow_node.validate()?;
        let workspace = WorkspaceDefinition::new(shadow_node.name()).with_node(shadow_node.name());
        let nodes = vec![Arc::new(shadow_node.node.clone())];
        let mut plan = Compilation::new(&workspace, nodes, None, output_size).run(self.store)?;
        for texture in &mut plan.textures {
            texture.persistent = true;
        }
        log::debug!(
            "Resolved shadow node '{}': {} pass(es)",
            shadow_node.name(),
            plan.invocations.len()
        );
        Ok(plan)
    }
}

/// State of one compilation
struct Compilation<'w> {
    workspace: &'w WorkspaceDefinition,
    nodes: Vec<Arc<NodeDefinition>>,
    output_size: (u32, u32),
    textures: Vec<LogicalTexture>,
    locals: Vec<HashMap<String, LogicalTextureId>>,
    globals: HashMap<String, LogicalTextureId>,
    output: Option<LogicalTextureId>,
    /// Per node: input channel -> source
    sources: Vec<HashMap<String, ChannelSource>>,
}

impl<'w> Compilation<'w> {
    fn new(
        workspace: &'w WorkspaceDefinition,
        nodes: Vec<Arc<NodeDefinition>>,
        output: Option<&OutputTarget>,
        output_size: (u32, u32),
    ) -> Self {
        let mut compilation = Self {
            workspace,
            locals: vec![HashMap::new(); nodes.len()],
            sources: vec![HashMap::new(); nodes.len()],
            nodes,
            output_size,
            textures: Vec::new(),
            globals: HashMap::new(),
            output: None,
        };
        compilation.declare_textures(output);
        compilation
    }

    fn run(mut self, store: &GraphDefinitionStore) -> Result<ExecutionPlan, DefinitionError> {
        self.check_channel_arity()?;
        self.check_channel_types()?;
        self.check_global_references()?;
        self.check_read_before_write()?;
        let shadow_nodes = self.check_shadow_nodes(store)?;

        let edges = self.build_edges()?;
        let order = self.order(&edges)?;

        let mut invocations = Vec::with_capacity(self.nodes.iter().map(|n| n.pass_count()).sum());
        for &node_index in &order {
            self.emit_invocations(node_index, &mut invocations)?;
        }
        self.relax_annotated_reads(&invocations);

        let mut plan = ExecutionPlan {
            workspace: self.workspace.name.clone(),
            node_order: order.iter().map(|&i| self.nodes[i].name.clone()).collect(),
            textures: self.textures,
            invocations,
            barriers: Vec::new(),
            batches: Vec::new(),
            shadow_nodes,
            output: self.output,
            output_size: self.output_size,
        };
        plan.rebuild_batches();
        Ok(plan)
    }

    fn push_texture(&mut self, texture: LogicalTexture) -> LogicalTextureId {
        self.textures.push(texture);
        LogicalTextureId(self.textures.len() - 1)
    }

    fn logical_from_declaration(
        &self,
        name: String,
        origin: TextureOrigin,
        declaration: &TextureDeclaration,
    ) -> LogicalTexture {
        let (width, height) = self.output_size;
        LogicalTexture {
            name,
            origin,
            descriptor: declaration.descriptor(width, height),
            persistent: declaration.persistent,
            implicit_resolve: declaration.is_multisampled() && !declaration.needs_explicit_resolve(),
            explicit_resolve: declaration.needs_explicit_resolve(),
            aliasing_group: declaration.aliasing_group,
        }
    }

    fn declare_textures(&mut self, output: Option<&OutputTarget>) {
        let workspace = self.workspace;
        for global in &workspace.globals {
            let declaration = &global.declaration;
            let texture = self.logical_from_declaration(
                format!("global:{}", declaration.name),
                TextureOrigin::Global,
                declaration,
            );
            let id = self.push_texture(texture);
            self.globals.insert(declaration.name.clone(), id);
        }

        for node_index in 0..self.nodes.len() {
            let node = Arc::clone(&self.nodes[node_index]);
            for declaration in &node.textures {
                let texture = self.logical_from_declaration(
                    format!("{}/{}", node.name, declaration.name),
                    TextureOrigin::Local {
                        node: node.name.clone(),
                    },
                    declaration,
                );
                let id = self.push_texture(texture);
                self.locals[node_index].insert(declaration.name.clone(), id);
            }
        }

        if let Some(output) = output {
            let texture = LogicalTexture {
                name: "output".to_string(),
                origin: TextureOrigin::Output,
                descriptor: TextureDescriptor::new_2d(output.width, output.height, output.format)
                    .with_samples(output.sample_count.max(1))
                    .with_usage(TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING),
                persistent: true,
                implicit_resolve: output.sample_count > 1,
                explicit_resolve: false,
                aliasing_group: None,
            };
            self.output = Some(self.push_texture(texture));
        }
    }

    /// Every connection names existing channels and every input channel is
    /// fed exactly once.
    fn check_channel_arity(&mut self) -> Result<(), DefinitionError> {
        let index_of = |name: &str| self.workspace.node_index(name);

        for (connection_index, connection) in self.workspace.connections.iter().enumerate() {
            let (Some(from), Some(to)) = (
                index_of(&connection.from_node),
                index_of(&connection.to_node),
            ) else {
                // Caught by WorkspaceDefinition::validate
                continue;
            };
            if self.nodes[from].output(&connection.from_channel).is_none() {
                return Err(DefinitionError::ChannelArity {
                    node: connection.from_node.clone(),
                    reason: format!("no output channel '{}'", connection.from_channel),
                });
            }
            if self.nodes[to].input(&connection.to_channel).is_none() {
                return Err(DefinitionError::ChannelArity {
                    node: connection.to_node.clone(),
                    reason: format!("no input channel '{}'", connection.to_channel),
                });
            }
            if self.sources[to]
                .insert(
                    connection.to_channel.clone(),
                    ChannelSource::Connection(connection_index),
                )
                .is_some()
            {
                return Err(DefinitionError::ChannelArity {
                    node: connection.to_node.clone(),
                    reason: format!(
                        "input channel '{}' is connected more than once",
                        connection.to_channel
                    ),
                });
            }
        }

        if let Some(binding) = &self.workspace.output {
            if let Some(node) = index_of(&binding.node) {
                if self.output.is_none() {
                    return Err(DefinitionError::Invalid {
                        name: self.workspace.name.clone(),
                        reason: "workspace binds an output but none was provided".into(),
                    });
                }
                if self.nodes[node].input(&binding.channel).is_none() {
                    return Err(DefinitionError::ChannelArity {
                        node: binding.node.clone(),
                        reason: format!("no input channel '{}'", binding.channel),
                    });
                }
                if self.sources[node]
                    .insert(binding.channel.clone(), ChannelSource::WorkspaceOutput)
                    .is_some()
                {
                    return Err(DefinitionError::ChannelArity {
                        node: binding.node.clone(),
                        reason: format!(
                            "input channel '{}' is connected more than once",
                            binding.channel
                        ),
                    });
                }
            }
        }

        for (node_index, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                if !self.sources[node_index].contains_key(&input.name) {
                    return Err(DefinitionError::ChannelArity {
                        node: node.name.clone(),
                        reason: format!("input channel '{}' is not connected", input.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Texture feeding input channel `channel` of node `node_index`.
    fn input_texture(
        &self,
        node_index: usize,
        channel: &str,
    ) -> Result<LogicalTextureId, DefinitionError> {
        let mut node_index = node_index;
        let mut channel = channel.to_string();
        // Pass-through outputs (an output exposing an input) are followed
        // upstream; a chain longer than the node count loops.
        for _ in 0..=self.nodes.len() {
            let source = self.sources[node_index].get(&channel).copied().ok_or_else(|| {
                DefinitionError::UnknownReference {
                    name: format!("in:{channel}"),
                    context: format!("node '{}'", self.nodes[node_index].name),
                }
            })?;
            let connection = match source {
                ChannelSource::WorkspaceOutput => {
                    return self.output.ok_or_else(|| DefinitionError::Invalid {
                        name: self.workspace.name.clone(),
                        reason: "no output target bound".into(),
                    });
                }
                ChannelSource::Connection(index) => &self.workspace.connections[index],
            };
            let producer = self
                .workspace
                .node_index(&connection.from_node)
                .ok_or_else(|| DefinitionError::UnknownReference {
                    name: connection.from_node.clone(),
                    context: format!("workspace '{}'", self.workspace.name),
                })?;
            let exposed = self.nodes[producer]
                .output(&connection.from_channel)
                .map(|o| o.texture.clone())
                .ok_or_else(|| DefinitionError::ChannelArity {
                    node: connection.from_node.clone(),
                    reason: format!("no output channel '{}'", connection.from_channel),
                })?;
            match exposed {
                TextureRef::Input(upstream) => {
                    node_index = producer;
                    channel = upstream;
                }
                other => return self.texture_ref(producer, &other),
            }
        }
        Err(DefinitionError::Invalid {
            name: self.workspace.name.clone(),
            reason: format!("channel '{channel}' passes through an endless chain of nodes"),
        })
    }

    fn texture_ref(
        &self,
        node_index: usize,
        texture: &TextureRef,
    ) -> Result<LogicalTextureId, DefinitionError> {
        let unknown = || DefinitionError::UnknownReference {
            name: texture.to_string(),
            context: format!("node '{}'", self.nodes[node_index].name),
        };
        match texture {
            TextureRef::Input(channel) => self.input_texture(node_index, channel),
            TextureRef::Local(name) => self.locals[node_index]
                .get(name)
                .copied()
                .ok_or_else(unknown),
            TextureRef::Global(name) => self.globals.get(name).copied().ok_or_else(unknown),
        }
    }

    fn check_channel_types(&self) -> Result<(), DefinitionError> {
        for (node_index, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                let Some(expected) = input.format else {
                    continue;
                };
                let id = self.input_texture(node_index, &input.name)?;
                let actual = self.textures[id.0].descriptor.format;
                if actual != expected {
                    let producer = match self.sources[node_index].get(&input.name) {
                        Some(ChannelSource::Connection(index)) => {
                            self.workspace.connections[*index].from_node.clone()
                        }
                        _ => "output".to_string(),
                    };
                    return Err(DefinitionError::ChannelType {
                        producer,
                        consumer: node.name.clone(),
                        channel: input.name.clone(),
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_global_references(&self) -> Result<(), DefinitionError> {
        for node in &self.nodes {
            for texture in node.texture_refs() {
                if let TextureRef::Global(name) = texture {
                    if !self.globals.contains_key(name) {
                        return Err(DefinitionError::UnknownReference {
                            name: texture.to_string(),
                            context: format!("node '{}'", node.name),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_read_before_write(&self) -> Result<(), DefinitionError> {
        for node in &self.nodes {
            let mut written: HashSet<&str> = HashSet::new();
            for target in &node.targets {
                for pass in &target.passes {
                    for texture in pass.reads() {
                        if let TextureRef::Local(name) = texture {
                            let persistent = node.texture(name).map_or(false, |t| t.persistent);
                            if !persistent && !written.contains(name.as_str()) {
                                return Err(DefinitionError::ReadBeforeWrite {
                                    node: node.name.clone(),
                                    texture: name.clone(),
                                });
                            }
                        }
                    }
                    if pass.writes_target() {
                        if let TextureRef::Local(name) = &target.texture {
                            written.insert(name);
                        }
                    }
                    for texture in pass.uav_writes() {
                        if let TextureRef::Local(name) = texture {
                            written.insert(name);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Shadow nodes requested by render_scene passes must be registered.
    fn check_shadow_nodes(
        &self,
        store: &GraphDefinitionStore,
    ) -> Result<Vec<String>, DefinitionError> {
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            for target in &node.targets {
                for pass in &target.passes {
                    if let PassOp::RenderScene(scene) = &pass.op {
                        if let Some(shadows) = &scene.shadows {
                            if store.shadow_node(&shadows.node).is_none() {
                                return Err(DefinitionError::UnknownReference {
                                    name: shadows.node.clone(),
                                    context: format!("render_scene pass in node '{}'", node.name),
                                });
                            }
                            names.insert(shadows.node.clone());
                        }
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn build_edges(&self) -> Result<Vec<Edge>, DefinitionError> {
        let mut edges = Vec::new();
        for connection in &self.workspace.connections {
            if let (Some(from), Some(to)) = (
                self.workspace.node_index(&connection.from_node),
                self.workspace.node_index(&connection.to_node),
            ) {
                edges.push(Edge {
                    from,
                    to,
                    kind: connection
                        .annotation
                        .map_or(EdgeKind::Fresh, EdgeKind::Annotated),
                });
            }
        }

        let writes: Vec<HashSet<&str>> = self.nodes.iter().map(|n| n.global_writes()).collect();
        let reads: Vec<HashSet<&str>> = self.nodes.iter().map(|n| n.global_reads()).collect();

        for global in &self.workspace.globals {
            let name = global.declaration.name.as_str();
            let writers: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| writes[i].contains(name))
                .collect();

            match &global.producer {
                Some(producer) => {
                    if let Some(&other) = writers
                        .iter()
                        .find(|&&i| &self.nodes[i].name != producer)
                    {
                        return Err(DefinitionError::GlobalWriteConflict {
                            texture: name.to_string(),
                            first: producer.clone(),
                            second: self.nodes[other].name.clone(),
                        });
                    }
                }
                None => {
                    if let [first, second, ..] = writers[..] {
                        return Err(DefinitionError::GlobalWriteConflict {
                            texture: name.to_string(),
                            first: self.nodes[first].name.clone(),
                            second: self.nodes[second].name.clone(),
                        });
                    }
                }
            }

            for &writer in &writers {
                for (reader, node_reads) in reads.iter().enumerate() {
                    if reader != writer && node_reads.contains(name) {
                        edges.push(Edge {
                            from: writer,
                            to: reader,
                            kind: EdgeKind::Fresh,
                        });
                    }
                }
            }
        }
        Ok(edges)
    }

    /// Node execution order.
    fn order(&self, edges: &[Edge]) -> Result<Vec<usize>, DefinitionError> {
        let count = self.nodes.len();
        let mut adjacency = vec![Vec::new(); count];
        for edge in edges {
            adjacency[edge.from].push(edge.to);
        }
        for successors in &mut adjacency {
            successors.sort_unstable();
            successors.dedup();
        }

        let components = strongly_connected_components(&adjacency);
        let mut component_size = HashMap::new();
        for &component in &components {
            *component_size.entry(component).or_insert(0usize) += 1;
        }

        // A cycle is legal only when every edge inside it is annotated
        for edge in edges {
            let internal = components[edge.from] == components[edge.to]
                && (edge.from == edge.to || component_size[&components[edge.from]] > 1);
            if internal && edge.kind == EdgeKind::Fresh {
                let chain = cycle_through(&adjacency, &components, edge.from, edge.to);
                return Err(DefinitionError::UnresolvedCycle(
                    chain.iter().map(|&i| self.nodes[i].name.clone()).collect(),
                ));
            }
        }

        let mut indegree = vec![0usize; count];
        let mut successors = vec![Vec::new(); count];
        for (from, targets) in adjacency.iter().enumerate() {
            for &to in targets {
                if components[from] != components[to] {
                    successors[from].push(to);
                    indegree[to] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
            .filter(|&i| indegree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &successors[node] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != count {
            let stuck = (0..count)
                .filter(|i| !order.contains(i))
                .map(|i| self.nodes[i].name.clone())
                .collect();
            return Err(DefinitionError::UnresolvedCycle(stuck));
        }
        Ok(order)
    }

    fn emit_invocations(
        &self,
        node_index: usize,
        invocations: &mut Vec<PassInvocation>,
    ) -> Result<(), DefinitionError> {
        let node = &self.nodes[node_index];
        for (target_index, target) in node.targets.iter().enumerate() {
            let target_id = self.texture_ref(node_index, &target.texture)?;
            for (pass_index, pass) in target.passes.iter().enumerate() {
                let sampled: Vec<&TextureRef> = match &pass.op {
                    PassOp::Quad(quad) => quad.inputs.iter().collect(),
                    PassOp::Compute(compute) => compute.inputs.iter().collect(),
                    PassOp::Resolve(resolve) => vec![&resolve.source],
                    _ => Vec::new(),
                };
                let uav_refs: Vec<&TextureRef> = match &pass.op {
                    PassOp::Compute(compute) => compute.uavs.iter().map(|u| &u.texture).collect(),
                    PassOp::UavQueue(queue) => queue.uavs.iter().map(|u| &u.texture).collect(),
                    _ => Vec::new(),
                };

                let mut relaxed_reads = Vec::new();
                let mut resolve_all = |refs: Vec<&TextureRef>| {
                    refs.into_iter()
                        .map(|texture| {
                            let id = self.texture_ref(node_index, texture)?;
                            if let Some(policy) = self.input_annotation(node_index, texture) {
                                relaxed_reads.push((id, policy));
                            }
                            Ok(id)
                        })
                        .collect::<Result<Vec<_>, DefinitionError>>()
                };
                let inputs = resolve_all(sampled)?;
                let uavs = resolve_all(uav_refs)?;

                log::trace!(
                    "{}: target #{} pass #{} {:?}",
                    node.name,
                    target_index,
                    pass_index,
                    pass.kind()
                );
                invocations.push(PassInvocation {
                    node: node.name.clone(),
                    node_index,
                    target_index: Some(target_index),
                    pass_index: Some(pass_index),
                    pass: pass.clone(),
                    target: target_id,
                    inputs,
                    uavs,
                    relaxed_reads,
                });
            }
        }
        Ok(())
    }

    /// Annotation of the connection `texture` reaches the node through.
    fn input_annotation(&self, node_index: usize, texture: &TextureRef) -> Option<ReusePolicy> {
        let TextureRef::Input(channel) = texture else {
            return None;
        };
        match self.sources[node_index].get(channel) {
            Some(ChannelSource::Connection(index)) => self.workspace.connections[*index].annotation,
            _ => None,
        }
    }

    /// Textures read through annotated edges before anything in the plan
    /// writes them carry their contents over from the previous frame.
    ///
    /// When the policy may record the producer ahead of the reader, the
    /// producer's own inputs are read out of order too and must persist.
    fn relax_annotated_reads(&mut self, invocations: &[PassInvocation]) {
        for (index, invocation) in invocations.iter().enumerate() {
            for &(id, policy) in &invocation.relaxed_reads {
                let written_before = invocations[..index]
                    .iter()
                    .any(|earlier| earlier.writes().contains(&id));
                if written_before {
                    continue;
                }
                self.keep_persistent(id, &invocation.node);

                if policy == ReusePolicy::Reuse {
                    continue;
                }
                let Some(writer) = invocations[index..]
                    .iter()
                    .find(|later| later.writes().contains(&id))
                else {
                    continue;
                };
                let producer_reads: Vec<LogicalTextureId> = invocations
                    .iter()
                    .filter(|other| {
                        other.node_index == writer.node_index
                            && other.target_index == writer.target_index
                    })
                    .flat_map(PassInvocation::resource_reads)
                    .collect();
                for read in producer_reads {
                    self.keep_persistent(read, &writer.node);
                }
            }
        }
    }

    fn keep_persistent(&mut self, id: LogicalTextureId, reader: &str) {
        let texture = &mut self.textures[id.0];
        if !texture.persistent && !texture.is_external() {
            log::debug!(
                "'{}' is read across frames by '{}', keeping it persistent",
                texture.name,
                reader
            );
            texture.persistent = true;
        }
    }
}

/// Tarjan's algorithm; returns the component id of every vertex.
fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<usize> {
    struct State<'a> {
        adjacency: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        component: Vec<usize>,
        next_component: usize,
    }

    impl State<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.next_index);
            self.lowlink[v] = self.next_index;
            self.next_index += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for i in 0..self.adjacency[v].len() {
                let w = self.adjacency[v][i];
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    self.component[w] = self.next_component;
                    if w == v {
                        break;
                    }
                }
                self.next_component += 1;
            }
        }
    }

    let count = adjacency.len();
    let mut state = State {
        adjacency,
        index: vec![None; count],
        lowlink: vec![0; count],
        on_stack: vec![false; count],
        stack: Vec::new(),
        next_index: 0,
        component: vec![0; count],
        next_component: 0,
    };
    for v in 0..count {
        if state.index[v].is_none() {
            state.visit(v);
        }
    }
    state.component
}

/// A cycle `from -> to -> ... -> from` inside one component, starting at `from`.
fn cycle_through(
    adjacency: &[Vec<usize>],
    components: &[usize],
    from: usize,
    to: usize,
) -> Vec<usize> {
    if from == to {
        return vec![from];
    }
    let component = components[from];
    let mut parent: HashMap<usize, usize> = HashMap::new();
    let mut queue = VecDeque::from([to]);
    let mut seen = HashSet::from([to]);
    while let Some(v) = queue.pop_front() {
        if v == from {
            break;
        }
        for &w in &adjacency[v] {
            if components[w] == component && seen.insert(w) {
                parent.insert(w, v);
                queue.push_back(w);
            }
        }
    }

    // Walk back from `from` to `to`
    let mut path = Vec::new();
    let mut current = from;
    while let Some(&previous) = parent.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();

    let mut chain = vec![from];
    chain.extend(path);
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{PassDefinition, TargetDefinition};
    use crate::types::TextureFormat;

    /// Node reading `in` (if `with_input`) and writing its own `rt`, exposed as `out`.
    fn node(name: &str, with_input: bool) -> NodeDefinition {
        let mut pass = PassDefinition::quad("m");
        let mut node = NodeDefinition::new(name)
            .with_texture(TextureDeclaration::new("rt", TextureFormat::Rgba8Unorm))
            .with_output("out", TextureRef::local("rt"));
        if with_input {
            node = node.with_input("in");
            pass = pass.with_input(TextureRef::input("in"));
        }
        node.with_target(
            TargetDefinition::new(TextureRef::local("rt"))
                .with_pass(PassDefinition::clear())
                .with_pass(pass),
        )
    }

    fn store_with(nodes: Vec<NodeDefinition>) -> GraphDefinitionStore {
        let mut store = GraphDefinitionStore::new();
        for node in nodes {
            store.register_node(node).unwrap();
        }
        store
    }

    #[test]
    fn test_chain_order() {
        let store = store_with(vec![node("A", false), node("B", true), node("C", true)]);
        // Declared out of order on purpose
        let ws = WorkspaceDefinition::new("W")
            .with_node("C")
            .with_node("B")
            .with_node("A")
            .connect("A", "out", "B", "in")
            .connect("B", "out", "C", "in");
        let plan = DependencyResolver::new(&store).resolve(&ws, None).unwrap();
        assert_eq!(plan.node_order, vec!["A", "B", "C"]);
        assert_eq!(plan.invocations.len(), 6);
    }

    #[test]
    fn test_tie_break_by_declaration() {
        let store = store_with(vec![node("A", false), node("B", false), node("C", false)]);
        let ws = WorkspaceDefinition::new("W")
            .with_node("B")
            .with_node("C")
            .with_node("A");
        let plan = DependencyResolver::new(&store).resolve(&ws, None).unwrap();
        assert_eq!(plan.node_order, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_unannotated_cycle() {
        let store = store_with(vec![node("A", true), node("B", true)]);
        let ws = WorkspaceDefinition::new("W")
            .with_node("A")
            .with_node("B")
            .connect("A", "out", "B", "in")
            .connect("B", "out", "A", "in");
        let err = DependencyResolver::new(&store).resolve(&ws, None).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnresolvedCycle(vec!["A".into(), "B".into()])
        );
    }

    #[test]
    fn test_annotated_cycle_is_allowed() {
        let store = store_with(vec![node("A", true), node("B", true)]);
        let ws = WorkspaceDefinition::new("W")
            .with_node("A")
            .with_node("B")
            .connect_annotated("A", "out", "B", "in", ReusePolicy::Reuse)
            .connect_annotated("B", "out", "A", "in", ReusePolicy::Reuse);
        let plan = DependencyResolver::new(&store).resolve(&ws, None).unwrap();
        assert_eq!(plan.node_order, vec!["A", "B"]);
        // A reads B's texture from the previous frame
        let b_rt = plan.texture_id("B/rt").unwrap();
        assert!(plan.texture(b_rt).persistent);
        assert!(!plan.texture(plan.texture_id("A/rt").unwrap()).persistent);
    }

    #[test]
    fn test_recalculated_edge_keeps_producer_inputs() {
        let store = store_with(vec![node("A", true), node("B", true)]);
        let ws = WorkspaceDefinition::new("W")
            .with_node("A")
            .with_node("B")
            .connect_annotated("A", "out", "B", "in", ReusePolicy::Reuse)
            .connect_annotated("B", "out", "A", "in", ReusePolicy::Recalculate);
        let plan = DependencyResolver::new(&store).resolve(&ws, None).unwrap();
        // B may run ahead of A, reading A's texture from the previous frame
        assert!(plan.texture(plan.texture_id("A/rt").unwrap()).persistent);
        assert!(plan.texture(plan.texture_id("B/rt").unwrap()).persistent);

        let refreshes = plan.annotated_refreshes(false);
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0].texture, plan.texture_id("B/rt").unwrap());
        assert!(refreshes[0].producer.start > refreshes[0].before);
    }

    #[test]
    fn test_unconnected_input() {
        let store = store_with(vec![node("A", true)]);
        let ws = WorkspaceDefinition::new("W").with_node("A");
        assert!(matches!(
            DependencyResolver::new(&store).resolve(&ws, None),
            Err(DefinitionError::ChannelArity { .. })
        ));
    }

    #[test]
    fn test_unknown_node() {
        let store = store_with(vec![node("A", false)]);
        let ws = WorkspaceDefinition::new("W").with_node("A").with_node("Ghost");
        assert_eq!(
            DependencyResolver::new(&store).resolve(&ws, None).unwrap_err(),
            DefinitionError::UnknownReference {
                name: "Ghost".into(),
                context: "workspace 'W'".into(),
            }
        );
    }

    #[test]
    fn test_channel_type_mismatch() {
        let consumer = NodeDefinition::new("Consumer")
            .with_typed_input("in", TextureFormat::Rgba16Float)
            .with_target(
                TargetDefinition::new(TextureRef::input("in")).with_pass(PassDefinition::clear()),
            );
        let store = store_with(vec![node("A", false), consumer]);
        let ws = WorkspaceDefinition::new("W")
            .with_node("A")
            .with_node("Consumer")
            .connect("A", "out", "Consumer", "in");
        assert_eq!(
            DependencyResolver::new(&store).resolve(&ws, None).unwrap_err(),
            DefinitionError::ChannelType {
                producer: "A".into(),
                consumer: "Consumer".into(),
                channel: "in".into(),
                expected: TextureFormat::Rgba16Float,
                actual: TextureFormat::Rgba8Unorm,
            }
        );
    }

    #[test]
    fn test_read_before_write() {
        let node = NodeDefinition::new("Bad")
            .with_texture(TextureDeclaration::new("a", TextureFormat::Rgba8Unorm))
            .with_texture(TextureDeclaration::new("b", TextureFormat::Rgba8Unorm))
            .with_target(
                TargetDefinition::new(TextureRef::local("a"))
                    .with_pass(PassDefinition::quad("m").with_input(TextureRef::local("b"))),
            );
        let store = store_with(vec![node]);
        let ws = WorkspaceDefinition::new("W").with_node("Bad");
        assert_eq!(
            DependencyResolver::new(&store).resolve(&ws, None).unwrap_err(),
            DefinitionError::ReadBeforeWrite {
                node: "Bad".into(),
                texture: "b".into(),
            }
        );
    }

    #[test]
    fn test_global_edges_and_conflicts() {
        let writer = |name: &str| {
            NodeDefinition::new(name).with_target(
                TargetDefinition::new(TextureRef::global("lut")).with_pass(PassDefinition::clear()),
            )
        };
        let reader = NodeDefinition::new("Reader")
            .with_texture(TextureDeclaration::new("rt", TextureFormat::Rgba8Unorm))
            .with_target(
                TargetDefinition::new(TextureRef::local("rt"))
                    .with_pass(PassDefinition::quad("m").with_input(TextureRef::global("lut"))),
            );
        let store = store_with(vec![writer("W1"), writer("W2"), reader]);
        let lut = TextureDeclaration::new("lut", TextureFormat::Rgba8Unorm);

        let ws = WorkspaceDefinition::new("Ok")
            .with_node("Reader")
            .with_node("W1")
            .with_global(lut.clone());
        let plan = DependencyResolver::new(&store).resolve(&ws, None).unwrap();
        assert_eq!(plan.node_order, vec!["W1", "Reader"]);

        let ws = WorkspaceDefinition::new("Conflict")
            .with_node("W1")
            .with_node("W2")
            .with_global_produced_by(lut, "W1");
        assert_eq!(
            DependencyResolver::new(&store).resolve(&ws, None).unwrap_err(),
            DefinitionError::GlobalWriteConflict {
                texture: "lut".into(),
                first: "W1".into(),
                second: "W2".into(),
            }
        );
    }

    #[test]
    fn test_self_loop_cycle() {
        let store = store_with(vec![node("A", true)]);
        let ws = WorkspaceDefinition::new("W")
            .with_node("A")
            .connect("A", "out", "A", "in");
        assert_eq!(
            DependencyResolver::new(&store).resolve(&ws, None).unwrap_err(),
            DefinitionError::UnresolvedCycle(vec!["A".into()])
        );
    }
}
