//! Property tests for plan compilation and texture aliasing.

use proptest::prelude::*;
use proptest::sample::Index;

use redlilium_compositor::{
    DefinitionError, DependencyResolver, DummyDevice, ExecutionPlan, GraphDefinitionStore,
    LogicalTextureId, NodeDefinition, PassDefinition, ResourceAllocator, ReusePolicy,
    TargetDefinition, TextureDeclaration, TextureFormat, TexturePool, TextureRef,
    WorkspaceDefinition,
};

const FORMATS: [TextureFormat; 3] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::R32Float,
];

/// A random DAG: node `i > 0` reads the output of `parents[i - 1] < i`.
#[derive(Debug, Clone)]
struct Graph {
    parents: Vec<usize>,
    formats: Vec<usize>,
    declaration: Vec<usize>,
}

fn graph() -> impl Strategy<Value = Graph> {
    (2usize..10).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<Index>(), n - 1),
            prop::collection::vec(0..FORMATS.len(), n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        )
            .prop_map(|(parents, formats, declaration)| Graph {
                parents: parents
                    .iter()
                    .enumerate()
                    .map(|(i, index)| index.index(i + 1))
                    .collect(),
                formats,
                declaration,
            })
    })
}

fn name(i: usize) -> String {
    format!("N{i}")
}

impl Graph {
    fn store(&self) -> GraphDefinitionStore {
        let mut store = GraphDefinitionStore::new();
        for (i, &format) in self.formats.iter().enumerate() {
            let mut pass = PassDefinition::quad("m");
            let mut node = NodeDefinition::new(name(i))
                .with_texture(TextureDeclaration::new("rt", FORMATS[format]))
                .with_output("out", TextureRef::local("rt"));
            if i > 0 {
                node = node.with_input("in");
                pass = pass.with_input(TextureRef::input("in"));
            }
            store
                .register_node(
                    node.with_target(
                        TargetDefinition::new(TextureRef::local("rt"))
                            .with_pass(PassDefinition::clear())
                            .with_pass(pass),
                    ),
                )
                .unwrap();
        }
        store
    }

    fn workspace(&self) -> WorkspaceDefinition {
        let mut workspace = WorkspaceDefinition::new("Random");
        for &i in &self.declaration {
            workspace = workspace.with_node(name(i));
        }
        for (i, &parent) in self.parents.iter().enumerate() {
            workspace = workspace.connect(name(parent), "out", name(i + 1), "in");
        }
        workspace
    }

    fn resolve(&self) -> ExecutionPlan {
        let store = self.store();
        DependencyResolver::new(&store)
            .resolve(&self.workspace(), None)
            .unwrap()
    }
}

/// Arbitrary directed graph without self loops; every edge may carry an
/// annotation.
#[derive(Debug, Clone)]
struct CyclicGraph {
    count: usize,
    edges: Vec<(usize, usize, Option<ReusePolicy>)>,
}

fn annotation() -> impl Strategy<Value = Option<ReusePolicy>> {
    prop_oneof![
        2 => Just(None),
        1 => Just(Some(ReusePolicy::Reuse)),
        1 => Just(Some(ReusePolicy::First)),
        1 => Just(Some(ReusePolicy::Recalculate)),
    ]
}

fn cyclic_graph() -> impl Strategy<Value = CyclicGraph> {
    (2usize..8).prop_flat_map(|n| {
        prop::collection::vec((0..n, 0..n, annotation()), 1..(2 * n)).prop_map(move |edges| {
            CyclicGraph {
                count: n,
                edges: edges.into_iter().filter(|(from, to, _)| from != to).collect(),
            }
        })
    })
}

impl CyclicGraph {
    /// Node `i` gets one input channel `e{k}` per incoming edge `k`.
    fn store(&self) -> GraphDefinitionStore {
        let mut store = GraphDefinitionStore::new();
        for i in 0..self.count {
            let mut pass = PassDefinition::quad("m");
            let mut node = NodeDefinition::new(name(i))
                .with_texture(TextureDeclaration::new("rt", TextureFormat::Rgba8Unorm))
                .with_output("out", TextureRef::local("rt"));
            for (k, _) in self.edges.iter().enumerate().filter(|(_, e)| e.1 == i) {
                node = node.with_input(format!("e{k}"));
                pass = pass.with_input(TextureRef::input(format!("e{k}")));
            }
            store
                .register_node(
                    node.with_target(
                        TargetDefinition::new(TextureRef::local("rt"))
                            .with_pass(PassDefinition::clear())
                            .with_pass(pass),
                    ),
                )
                .unwrap();
        }
        store
    }

    fn workspace(&self) -> WorkspaceDefinition {
        let mut workspace = WorkspaceDefinition::new("Cyclic");
        for i in 0..self.count {
            workspace = workspace.with_node(name(i));
        }
        for (k, &(from, to, annotation)) in self.edges.iter().enumerate() {
            let channel = format!("e{k}");
            workspace = match annotation {
                Some(policy) => {
                    workspace.connect_annotated(name(from), "out", name(to), channel, policy)
                }
                None => workspace.connect(name(from), "out", name(to), channel),
            };
        }
        workspace
    }

    /// `reach[a][b]`: a path of at least one edge leads from `a` to `b`.
    fn reachability(&self) -> Vec<Vec<bool>> {
        let mut reach = vec![vec![false; self.count]; self.count];
        for &(from, to, _) in &self.edges {
            reach[from][to] = true;
        }
        for k in 0..self.count {
            for a in 0..self.count {
                for b in 0..self.count {
                    if reach[a][k] && reach[k][b] {
                        reach[a][b] = true;
                    }
                }
            }
        }
        reach
    }
}

proptest! {
    #[test]
    fn only_fully_annotated_cycles_resolve(graph in cyclic_graph()) {
        let reach = graph.reachability();
        // An edge lies on a cycle exactly when its head reaches its tail
        let resolvable = graph
            .edges
            .iter()
            .all(|&(from, to, annotation)| annotation.is_some() || !reach[to][from]);

        let store = graph.store();
        let result = DependencyResolver::new(&store).resolve(&graph.workspace(), None);
        if resolvable {
            let plan = result.unwrap();
            prop_assert_eq!(plan.node_order.len(), graph.count);
            // Fresh edges still order producer before consumer
            let position = |i: usize| plan.node_order.iter().position(|n| *n == name(i)).unwrap();
            for &(from, to, annotation) in &graph.edges {
                if annotation.is_none() {
                    prop_assert!(position(from) < position(to));
                }
            }
        } else {
            match result {
                Err(DefinitionError::UnresolvedCycle(chain)) => {
                    prop_assert!(!chain.is_empty());
                    let index = |n: &String| (0..graph.count).find(|&i| name(i) == *n).unwrap();
                    for a in &chain {
                        for b in &chain {
                            if a != b {
                                prop_assert!(reach[index(a)][index(b)], "{:?}", chain);
                            }
                        }
                    }
                }
                other => prop_assert!(false, "expected UnresolvedCycle, got {:?}", other),
            }
        }
    }
}

proptest! {
    #[test]
    fn producers_run_before_consumers(graph in graph()) {
        let plan = graph.resolve();
        let position = |i: usize| plan.node_order.iter().position(|n| *n == name(i)).unwrap();
        prop_assert_eq!(plan.node_order.len(), graph.formats.len());
        for (i, &parent) in graph.parents.iter().enumerate() {
            prop_assert!(position(parent) < position(i + 1));
        }
    }

    #[test]
    fn resolution_is_deterministic(graph in graph()) {
        prop_assert_eq!(graph.resolve(), graph.resolve());
    }

    #[test]
    fn aliased_textures_never_overlap(graph in graph()) {
        let mut plan = graph.resolve();
        let device = DummyDevice::new();
        let mut pool = TexturePool::default();
        let allocation = ResourceAllocator::default()
            .allocate(&mut plan, None, &mut pool, &device)
            .unwrap();

        let lifetimes = plan.lifetimes();
        for a in 0..plan.textures.len() {
            for b in (a + 1)..plan.textures.len() {
                let (ia, ib) = (&plan.textures[a], &plan.textures[b]);
                let slot_a = allocation.slot_of(LogicalTextureId(a));
                let slot_b = allocation.slot_of(LogicalTextureId(b));
                if slot_a.is_none() || slot_a != slot_b {
                    continue;
                }
                prop_assert_eq!(&ia.descriptor, &ib.descriptor);
                if let (Some((start_a, end_a)), Some((start_b, end_b))) = (lifetimes[a], lifetimes[b]) {
                    prop_assert!(
                        end_a < start_b || end_b < start_a,
                        "{} [{}, {}] overlaps {} [{}, {}]",
                        ia.name, start_a, end_a, ib.name, start_b, end_b
                    );
                }
            }
        }
    }
}
