//! Shared fixtures for compositor integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;

use redlilium_compositor::{
    Camera, CameraSet, Compositor, CompositorConfig, DummyDevice, GraphDefinitionStore, Light,
    MsaaResolve, NodeDefinition, OutputTarget, PassDefinition, PassInvocation, PassListener,
    Renderable, ReusePolicy, ScenePass, ShadowMapDefinition, ShadowNodeDefinition, ShadowNodeUse,
    ShadowTechnique, SizePolicy, StaticMaterials, StaticScene, TargetDefinition, TextureDeclaration,
    TextureFormat, TextureHandle, TextureRef, WorkspaceDefinition,
};

/// Initialize test logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn output(raw: u64) -> OutputTarget {
    OutputTarget::new(TextureHandle::new(raw), 64, 32, TextureFormat::Bgra8Unorm)
}

pub fn viewer() -> Camera {
    Camera::new(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO)
}

pub fn cameras() -> CameraSet {
    CameraSet::new().with_default(viewer())
}

pub fn materials() -> StaticMaterials {
    StaticMaterials::new()
        .with_material("lighting")
        .with_material("composite")
        .with_material("tonemap")
}

pub fn scene() -> StaticScene {
    StaticScene::new()
        .with_renderable(Renderable::new(1, 10))
        .with_renderable(Renderable::new(2, 50).with_shadows(false))
        .with_light(Light::directional(Vec3::new(-1.0, -1.0, -0.5)))
}

pub fn compositor(
    store: GraphDefinitionStore,
    device: Arc<DummyDevice>,
    config: CompositorConfig,
) -> Compositor {
    Compositor::new(
        Arc::new(store),
        device,
        Arc::new(materials()),
        Arc::new(scene()),
        config,
    )
}

/// `Gbuffer -> Lighting -> Composite -> output`, with the nodes declared in
/// reverse order.
pub fn deferred_store() -> GraphDefinitionStore {
    let gbuffer = NodeDefinition::new("Gbuffer")
        .with_texture(TextureDeclaration::new("albedo", TextureFormat::Rgba8Unorm))
        .with_output("gbuffer", TextureRef::local("albedo"))
        .with_target(
            TargetDefinition::new(TextureRef::local("albedo"))
                .with_pass(PassDefinition::clear())
                .with_pass(PassDefinition::render_scene()),
        );
    let lighting = NodeDefinition::new("Lighting")
        .with_input("gbuffer")
        .with_texture(TextureDeclaration::new("lit", TextureFormat::Rgba16Float))
        .with_output("lit", TextureRef::local("lit"))
        .with_target(
            TargetDefinition::new(TextureRef::local("lit"))
                .with_pass(PassDefinition::quad("lighting").with_input(TextureRef::input("gbuffer"))),
        );
    let composite = NodeDefinition::new("Composite")
        .with_input("lit")
        .with_input("frame")
        .with_target(
            TargetDefinition::new(TextureRef::input("frame"))
                .with_pass(PassDefinition::quad("composite").with_input(TextureRef::input("lit"))),
        );

    let mut store = GraphDefinitionStore::new();
    store.register_node(gbuffer).unwrap();
    store.register_node(lighting).unwrap();
    store.register_node(composite).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("Deferred")
                .with_node("Composite")
                .with_node("Lighting")
                .with_node("Gbuffer")
                .connect("Gbuffer", "gbuffer", "Lighting", "gbuffer")
                .connect("Lighting", "lit", "Composite", "lit")
                .connect_output("Composite", "frame"),
        )
        .unwrap();
    store
}

/// Forward workspace whose scene pass requests the `Shadows` shadow node.
pub fn shadowed_store(policy: ReusePolicy) -> GraphDefinitionStore {
    shadowed_store_with_map_size(
        policy,
        SizePolicy::Explicit {
            width: 256,
            height: 256,
        },
    )
}

pub fn shadowed_store_with_map_size(policy: ReusePolicy, size: SizePolicy) -> GraphDefinitionStore {
    let shadows = ShadowNodeDefinition::new(
        NodeDefinition::new("Shadows")
            .with_texture(TextureDeclaration::new("map", TextureFormat::Depth32Float).with_size(size))
            .with_target(
                TargetDefinition::new(TextureRef::local("map"))
                    .with_pass(PassDefinition::clear())
                    .with_pass(PassDefinition::render_scene_with(ScenePass {
                        shadow_map: Some(0),
                        ..Default::default()
                    })),
            ),
        1,
    )
    .with_shadow_map(ShadowMapDefinition::new("map", 0, ShadowTechnique::Focused));

    let forward = NodeDefinition::new("Forward").with_input("frame").with_target(
        TargetDefinition::new(TextureRef::input("frame"))
            .with_pass(PassDefinition::clear())
            .with_pass(PassDefinition::render_scene_with(ScenePass {
                shadows: Some(ShadowNodeUse {
                    node: "Shadows".into(),
                    policy,
                }),
                ..Default::default()
            })),
    );

    let mut store = GraphDefinitionStore::new();
    store.register_shadow_node(shadows).unwrap();
    store.register_node(forward).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("Forward")
                .with_node("Forward")
                .connect_output("Forward", "frame"),
        )
        .unwrap();
    store
}

/// Scene rendered into an explicitly resolved 4x MSAA texture, then
/// tonemapped into the output.
pub fn msaa_store() -> GraphDefinitionStore {
    let node = NodeDefinition::new("Scene")
        .with_input("frame")
        .with_texture(
            TextureDeclaration::new("hdr", TextureFormat::Rgba16Float)
                .with_msaa(4, MsaaResolve::Explicit),
        )
        .with_target(
            TargetDefinition::new(TextureRef::local("hdr"))
                .with_pass(PassDefinition::clear())
                .with_pass(PassDefinition::render_scene()),
        )
        .with_target(
            TargetDefinition::new(TextureRef::input("frame"))
                .with_pass(PassDefinition::quad("tonemap").with_input(TextureRef::local("hdr"))),
        );
    let mut store = GraphDefinitionStore::new();
    store.register_node(node).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("Msaa")
                .with_node("Scene")
                .connect_output("Scene", "frame"),
        )
        .unwrap();
    store
}

/// Listener recording `before`/`after` events with pass labels.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
}

impl PassListener for RecordingListener {
    fn before_pass(&self, invocation: &PassInvocation) {
        self.events
            .lock()
            .push(format!("before {}", invocation.label()));
    }

    fn after_pass(&self, invocation: &PassInvocation) {
        self.events
            .lock()
            .push(format!("after {}", invocation.label()));
    }
}
