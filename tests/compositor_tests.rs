//! End-to-end compositor tests on the dummy device.
//!
//! Each test builds definitions, instantiates workspaces through the
//! [`Compositor`] and inspects the command lists submitted to the device.

mod common;

use std::sync::Arc;

use glam::{Vec3, Vec4};
use rstest::rstest;

use common::*;
use redlilium_compositor::{
    Camera, CameraSet, Command, CommandList, Compositor, CompositorConfig, CompositorError,
    DefinitionError, DummyDevice, GraphDefinitionStore, NodeDefinition, PassDefinition,
    OutputTarget, PassErrorPolicy, PassFailure, PassListener, PixelRect, ReusePolicy, StateError,
    SizePolicy, StaticMaterials, TargetDefinition, TextureDeclaration, TextureFormat,
    TextureHandle, TextureRef, WorkspaceDefinition, WorkspaceState,
};

fn draws(commands: &CommandList) -> Vec<&Command> {
    commands
        .iter()
        .filter(|c| {
            matches!(
                c,
                Command::DrawQuad { .. } | Command::DrawRenderables { .. } | Command::Resolve { .. }
            )
        })
        .collect()
}

fn viewports(commands: &CommandList) -> Vec<PixelRect> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::BindTarget { viewport, .. } => Some(*viewport),
            _ => None,
        })
        .collect()
}

/// Node reading `in` and writing its own `rt`, exposed as `out`.
fn relay(name: &str) -> NodeDefinition {
    NodeDefinition::new(name)
        .with_input("in")
        .with_texture(TextureDeclaration::new("rt", TextureFormat::Rgba8Unorm))
        .with_output("out", TextureRef::local("rt"))
        .with_target(
            TargetDefinition::new(TextureRef::local("rt"))
                .with_pass(PassDefinition::clear())
                .with_pass(PassDefinition::quad("lighting").with_input(TextureRef::input("in"))),
        )
}

// ============================================================================
// Ordering and compilation
// ============================================================================

/// Gbuffer feeds Lighting feeds Composite, whatever the declaration order.
#[test]
fn test_deferred_chain_runs_in_dependency_order() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(deferred_store(), device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();

    let workspace = compositor.workspace(handle).unwrap();
    assert_eq!(
        workspace.plan().node_order,
        vec!["Gbuffer", "Lighting", "Composite"]
    );
    let plan = workspace.plan();
    let allocation = workspace.allocation().unwrap();
    let albedo = allocation
        .handle(plan.texture_id("Gbuffer/albedo").unwrap())
        .unwrap();
    let lit = allocation
        .handle(plan.texture_id("Lighting/lit").unwrap())
        .unwrap();

    let report = compositor.tick(handle).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.passes_executed, 4);

    let submitted = device.take_submitted();
    assert_eq!(submitted.len(), 1);
    let draws = draws(&submitted[0]);
    assert_eq!(draws.len(), 3);
    assert!(matches!(draws[0], Command::DrawRenderables { renderables, .. } if renderables.len() == 2));
    match (draws[1], draws[2]) {
        (Command::DrawQuad { inputs: first, .. }, Command::DrawQuad { inputs: second, .. }) => {
            assert_eq!(first[0].texture, albedo);
            assert_eq!(second[0].texture, lit);
        }
        other => panic!("unexpected draws: {other:?}"),
    }
}

/// Two nodes feeding each other without an annotation never compile, and
/// nothing is left allocated.
#[test]
fn test_unannotated_cycle_is_rejected() {
    init_logging();
    let mut store = GraphDefinitionStore::new();
    store.register_node(relay("A")).unwrap();
    store.register_node(relay("B")).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("Loop")
                .with_node("A")
                .with_node("B")
                .connect("A", "out", "B", "in")
                .connect("B", "out", "A", "in"),
        )
        .unwrap();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(store, device.clone(), CompositorConfig::default());

    let err = compositor
        .instantiate_workspace("Loop", None, cameras())
        .unwrap_err();
    assert_eq!(
        err,
        CompositorError::Definition(DefinitionError::UnresolvedCycle(vec![
            "A".into(),
            "B".into()
        ]))
    );
    assert_eq!(compositor.workspace_count(), 0);
    assert_eq!(device.live_textures(), 0);
}

/// `A` reads `B` from across an annotated edge; the policy decides whether
/// `B` is recorded ahead of `A` as well.
#[rstest]
#[case::reuse(ReusePolicy::Reuse, [4, 4])]
#[case::first(ReusePolicy::First, [6, 4])]
#[case::recalculate(ReusePolicy::Recalculate, [6, 6])]
fn test_annotated_cycle_policy_per_frame(
    #[case] policy: ReusePolicy,
    #[case] expected_passes: [usize; 2],
) {
    init_logging();
    let mut store = GraphDefinitionStore::new();
    store.register_node(relay("A")).unwrap();
    store.register_node(relay("B")).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("Feedback")
                .with_node("A")
                .with_node("B")
                .connect_annotated("A", "out", "B", "in", ReusePolicy::Reuse)
                .connect_annotated("B", "out", "A", "in", policy),
        )
        .unwrap();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(store, device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Feedback", None, cameras())
        .unwrap();
    assert_eq!(
        compositor.workspace(handle).unwrap().plan().node_order,
        vec!["A", "B"]
    );

    for expected in expected_passes {
        let report = compositor.tick(handle).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.passes_executed, expected);
        assert_eq!(report.refreshes, (expected - 4) / 2);
    }

    // A refreshed B draws before A's first quad
    if policy == ReusePolicy::Recalculate {
        let plan = compositor.workspace(handle).unwrap().plan();
        let allocation = compositor.workspace(handle).unwrap().allocation().unwrap();
        let b_rt = allocation.handle(plan.texture_id("B/rt").unwrap()).unwrap();
        let submitted = device.take_submitted();
        let first_target = submitted[0].iter().find_map(|c| match c {
            Command::BindTarget { texture, .. } => Some(*texture),
            _ => None,
        });
        assert_eq!(first_target, Some(b_rt));
    }
}

/// Explicit 4x MSAA gets its own resolve pass between producer and consumer.
#[test]
fn test_explicit_msaa_resolve_runs_before_consumer() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(msaa_store(), device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Msaa", Some(output(1000)), cameras())
        .unwrap();
    assert_eq!(
        compositor
            .workspace(handle)
            .and_then(|w| w.allocation())
            .map(|a| a.physical_count()),
        Some(2)
    );

    compositor.tick(handle).unwrap();
    let submitted = device.take_submitted();
    let draws = draws(&submitted[0]);
    assert_eq!(draws.len(), 3);
    assert!(matches!(draws[0], Command::DrawRenderables { .. }));
    match (draws[1], draws[2]) {
        (
            Command::Resolve {
                source,
                destination,
            },
            Command::DrawQuad { inputs, .. },
        ) => {
            assert_ne!(source, destination);
            assert_eq!(inputs[0].texture, *destination);
            assert!(!inputs[0].implicit_resolve);
        }
        other => panic!("unexpected draws: {other:?}"),
    }
}

// ============================================================================
// Shadow nodes
// ============================================================================

/// Two workspaces ticked in one frame with the same camera.
#[rstest]
#[case::reuse(ReusePolicy::Reuse, 1)]
#[case::first(ReusePolicy::First, 1)]
#[case::recalculate(ReusePolicy::Recalculate, 2)]
fn test_shadow_node_shared_across_workspaces(
    #[case] policy: ReusePolicy,
    #[case] expected_renders: u64,
) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(policy),
        device.clone(),
        CompositorConfig::default(),
    );
    compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    compositor
        .instantiate_workspace("Forward", Some(output(2000)), cameras())
        .unwrap();
    assert_eq!(compositor.shadow_node("Shadows").map(|s| s.users()), Some(2));

    let results = compositor.tick_all();
    assert_eq!(results.len(), 2);
    let reports: Vec<_> = results
        .into_iter()
        .map(|(_, result)| result.unwrap())
        .collect();
    assert_eq!(reports[0].frame, reports[1].frame);
    assert_eq!(reports[0].shadow_nodes_rendered, vec!["Shadows"]);
    let shadows = compositor.shadow_node("Shadows").unwrap();
    assert_eq!(shadows.render_count(), expected_renders);
    if expected_renders == 1 {
        assert_eq!(reports[1].shadow_nodes_reused, vec!["Shadows"]);
        assert!(reports[1].shadow_nodes_rendered.is_empty());
    }

    // Receivers sample the node's maps
    let maps = shadows.shadow_maps().to_vec();
    for commands in device.take_submitted() {
        let sampled: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawRenderables { shadow_maps, .. } if !shadow_maps.is_empty() => {
                    Some(shadow_maps.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(sampled, vec![maps.clone()]);
    }
}

/// Reuse must hold for any camera, not only ones whose view vectors
/// normalize exactly.
#[test]
fn test_shadow_reuse_with_off_axis_camera() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(ReusePolicy::Reuse),
        device,
        CompositorConfig::default(),
    );
    let camera = Camera::new(Vec3::new(2.2195, 3.22, -2.8), Vec3::new(0.3, -0.2, 0.222));
    for raw in [1000, 2000] {
        compositor
            .instantiate_workspace(
                "Forward",
                Some(output(raw)),
                CameraSet::new().with_default(camera.clone()),
            )
            .unwrap();
    }

    compositor.tick_all();
    assert_eq!(compositor.shadow_node("Shadows").unwrap().render_count(), 1);
}

#[test]
fn test_shadow_reuse_needs_matching_camera() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(ReusePolicy::Reuse),
        device,
        CompositorConfig::default(),
    );
    compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    let other = CameraSet::new().with_default(Camera::new(Vec3::new(5.0, 2.0, 10.0), Vec3::ZERO));
    compositor
        .instantiate_workspace("Forward", Some(output(2000)), other)
        .unwrap();

    for (_, result) in compositor.tick_all() {
        assert_eq!(result.unwrap().shadow_nodes_rendered, vec!["Shadows"]);
    }
    assert_eq!(compositor.shadow_node("Shadows").unwrap().render_count(), 2);
}

/// A shadow camera override makes two workspaces with different views agree.
#[test]
fn test_shadow_camera_override_enables_reuse() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(ReusePolicy::Reuse),
        device,
        CompositorConfig::default(),
    );
    let first = compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    let other = CameraSet::new().with_default(Camera::new(Vec3::new(5.0, 2.0, 10.0), Vec3::ZERO));
    let second = compositor
        .instantiate_workspace("Forward", Some(output(2000)), other)
        .unwrap();
    compositor
        .set_shadow_node_camera(second, "Shadows", viewer())
        .unwrap();
    assert!(matches!(
        compositor.set_shadow_node_camera(first, "Missing", viewer()),
        Err(CompositorError::Definition(DefinitionError::UnknownReference { .. }))
    ));

    compositor.tick_all();
    assert_eq!(compositor.shadow_node("Shadows").unwrap().render_count(), 1);
}

/// Separate `tick` calls are separate frames, so nothing is reused.
#[test]
fn test_separate_ticks_render_shadows_again() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(ReusePolicy::Reuse),
        device,
        CompositorConfig::default(),
    );
    let first = compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    let second = compositor
        .instantiate_workspace("Forward", Some(output(2000)), cameras())
        .unwrap();
    compositor.tick(first).unwrap();
    let report = compositor.tick(second).unwrap();
    assert_eq!(report.shadow_nodes_rendered, vec!["Shadows"]);
    assert_eq!(compositor.shadow_node("Shadows").unwrap().render_count(), 2);
}

/// The shadow node lives as long as one workspace uses it.
#[test]
fn test_shadow_node_released_with_last_user() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(ReusePolicy::Reuse),
        device.clone(),
        CompositorConfig::default(),
    );
    let first = compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    let second = compositor
        .instantiate_workspace("Forward", Some(output(2000)), cameras())
        .unwrap();

    compositor.teardown_workspace(first).unwrap();
    assert_eq!(compositor.shadow_node("Shadows").map(|s| s.users()), Some(1));
    compositor.teardown_workspace(second).unwrap();
    assert!(compositor.shadow_node("Shadows").is_none());
    assert_eq!(compositor.pool_stats().in_use, 0);

    compositor.evict_unused();
    assert_eq!(device.live_textures(), 0);
}

// ============================================================================
// Frame execution
// ============================================================================

/// Stereo: slot 0 renders the left half, slot 1 the right half.
#[test]
fn test_execution_slots_apply_viewport_modifiers() {
    init_logging();
    let node = NodeDefinition::new("Eye").with_input("frame").with_target(
        TargetDefinition::new(TextureRef::input("frame")).with_pass(PassDefinition::clear()),
    );
    let mut store = GraphDefinitionStore::new();
    store.register_node(node).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("Stereo")
                .with_node("Eye")
                .connect_output("Eye", "frame")
                .with_execution_mask(0x03)
                .with_viewport_modifier(0, Vec4::new(0.0, 0.0, 0.5, 1.0))
                .with_viewport_modifier(1, Vec4::new(0.5, 0.0, 0.5, 1.0)),
        )
        .unwrap();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(store, device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Stereo", Some(output(1000)), cameras())
        .unwrap();

    let report = compositor.tick(handle).unwrap();
    assert_eq!(report.passes_executed, 2);
    assert_eq!(
        viewports(&device.take_submitted()[0]),
        vec![
            PixelRect::from((0, 0, 32, 32)),
            PixelRect::from((32, 0, 32, 32))
        ]
    );

    compositor.set_execution_mask(handle, 0x02).unwrap();
    let report = compositor.tick(handle).unwrap();
    assert_eq!(report.passes_executed, 1);
    assert_eq!(
        viewports(&device.take_submitted()[0]),
        vec![PixelRect::from((32, 0, 32, 32))]
    );
}

#[test]
fn test_only_initial_passes_run_once() {
    init_logging();
    let node = NodeDefinition::new("Accumulate").with_input("frame").with_target(
        TargetDefinition::new(TextureRef::input("frame"))
            .with_pass(PassDefinition::clear().only_initial())
            .with_pass(PassDefinition::quad("composite")),
    );
    let mut store = GraphDefinitionStore::new();
    store.register_node(node).unwrap();
    store
        .register_workspace(
            WorkspaceDefinition::new("History")
                .with_node("Accumulate")
                .connect_output("Accumulate", "frame"),
        )
        .unwrap();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(store, device, CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("History", Some(output(1000)), cameras())
        .unwrap();

    let first = compositor.tick(handle).unwrap();
    assert_eq!((first.passes_executed, first.passes_skipped), (2, 0));
    let second = compositor.tick(handle).unwrap();
    assert_eq!((second.passes_executed, second.passes_skipped), (1, 1));
    assert_eq!(compositor.workspace(handle).unwrap().frames_executed(), 2);
}

#[test]
fn test_listeners_observe_passes_in_plan_order() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(deferred_store(), device, CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();
    let listener = Arc::new(RecordingListener::default());
    compositor
        .add_listener(handle, listener.clone() as Arc<dyn PassListener>)
        .unwrap();

    compositor.tick(handle).unwrap();
    assert_eq!(
        *listener.events.lock(),
        vec![
            "before Gbuffer[0:0]",
            "after Gbuffer[0:0]",
            "before Gbuffer[0:1]",
            "after Gbuffer[0:1]",
            "before Lighting[0:0]",
            "after Lighting[0:0]",
            "before Composite[0:0]",
            "after Composite[0:0]",
        ]
    );
}

#[test]
fn test_output_texture_rebinds_between_frames() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(msaa_store(), device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Msaa", Some(output(1000)), cameras())
        .unwrap();
    compositor
        .set_output_texture(handle, TextureHandle::new(1001))
        .unwrap();
    compositor.tick(handle).unwrap();

    let submitted = device.take_submitted();
    let last_target = submitted[0].iter().rev().find_map(|c| match c {
        Command::BindTarget { texture, .. } => Some(*texture),
        _ => None,
    });
    assert_eq!(last_target, Some(TextureHandle::new(1001)));
}

#[test]
fn test_resize_output_reallocates_output_sized_textures() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(deferred_store(), device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();
    compositor.tick(handle).unwrap();
    device.take_submitted();

    let resized = OutputTarget::new(TextureHandle::new(1001), 128, 64, TextureFormat::Bgra8Unorm);
    compositor.resize_output(handle, resized).unwrap();

    let workspace = compositor.workspace(handle).unwrap();
    assert_eq!(workspace.output(), Some(&resized));
    let plan = workspace.plan();
    let albedo = plan.texture(plan.texture_id("Gbuffer/albedo").unwrap());
    assert_eq!((albedo.descriptor.width, albedo.descriptor.height), (128, 64));
    let physical = workspace.allocation().unwrap().physical_count();
    assert_eq!(compositor.pool_stats().in_use, physical);

    let report = compositor.tick(handle).unwrap();
    assert!(report.is_clean());
    let submitted = device.take_submitted();
    assert_eq!(
        viewports(&submitted[0]),
        vec![PixelRect::from((0, 0, 128, 64)); 4]
    );
    let last_target = submitted[0].iter().rev().find_map(|c| match c {
        Command::BindTarget { texture, .. } => Some(*texture),
        _ => None,
    });
    assert_eq!(last_target, Some(TextureHandle::new(1001)));
}

#[test]
fn test_failed_resize_keeps_current_plan() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        deferred_store(),
        device.clone(),
        CompositorConfig::default().with_texture_budget(64 * 1024),
    );
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();
    let live = device.live_textures();

    let huge = OutputTarget::new(TextureHandle::new(1001), 4096, 4096, TextureFormat::Bgra8Unorm);
    assert!(matches!(
        compositor.resize_output(handle, huge),
        Err(CompositorError::Allocation(_))
    ));
    assert_eq!(compositor.workspace(handle).unwrap().output(), Some(&output(1000)));
    assert_eq!(device.live_textures(), live);
    assert!(compositor.tick(handle).unwrap().is_clean());
}

/// Shadow maps sized against the output follow it; fixed-size maps stay.
#[rstest]
#[case::match_output(SizePolicy::MatchOutput, (128, 64))]
#[case::explicit(SizePolicy::Explicit { width: 256, height: 256 }, (64, 32))]
fn test_resize_output_resizes_shadow_nodes(
    #[case] size: SizePolicy,
    #[case] expected: (u32, u32),
) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store_with_map_size(ReusePolicy::Reuse, size),
        device,
        CompositorConfig::default(),
    );
    let first = compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    compositor
        .instantiate_workspace("Forward", Some(output(2000)), cameras())
        .unwrap();

    let resized = OutputTarget::new(TextureHandle::new(1001), 128, 64, TextureFormat::Bgra8Unorm);
    compositor.resize_output(first, resized).unwrap();
    let shadows = compositor.shadow_node("Shadows").unwrap();
    assert_eq!(shadows.output_size(), expected);
    assert_eq!(shadows.users(), 2);

    for (_, result) in compositor.tick_all() {
        assert!(result.unwrap().is_clean());
    }
}

// ============================================================================
// Errors and lifecycle
// ============================================================================

fn compositor_with_materials(
    materials: StaticMaterials,
    device: Arc<DummyDevice>,
    policy: PassErrorPolicy,
) -> Compositor {
    Compositor::new(
        Arc::new(deferred_store()),
        device,
        Arc::new(materials),
        Arc::new(scene()),
        CompositorConfig::default().with_pass_error_policy(policy),
    )
}

#[rstest]
#[case::missing(
    StaticMaterials::new().with_material("lighting"),
    PassFailure::MissingMaterial("composite".into())
)]
#[case::compiling(
    StaticMaterials::new().with_material("lighting").with_compiling_material("composite"),
    PassFailure::MaterialNotReady("composite".into())
)]
fn test_abort_frame_submits_nothing(#[case] materials: StaticMaterials, #[case] reason: PassFailure) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor =
        compositor_with_materials(materials, device.clone(), PassErrorPolicy::AbortFrame);
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();

    match compositor.tick(handle) {
        Err(CompositorError::Pass(err)) => assert_eq!(err.reason, reason),
        other => panic!("expected a pass error, got {other:?}"),
    }
    assert_eq!(device.submission_count(), 0);
    assert_eq!(compositor.workspace(handle).unwrap().frames_executed(), 0);
}

#[test]
fn test_skip_target_keeps_the_rest_of_the_frame() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor_with_materials(
        StaticMaterials::new().with_material("composite"),
        device.clone(),
        PassErrorPolicy::SkipTarget,
    );
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();

    let report = compositor.tick(handle).unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        report.errors[0].reason,
        PassFailure::MissingMaterial("lighting".into())
    );
    assert_eq!(report.passes_executed, 3);
    assert_eq!(report.passes_skipped, 1);
    assert_eq!(device.submission_count(), 1);
}

#[test]
fn test_scene_pass_without_camera_fails() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(deferred_store(), device, CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), CameraSet::new())
        .unwrap();
    match compositor.tick(handle) {
        Err(CompositorError::Pass(err)) => {
            assert_eq!(err.reason, PassFailure::NoCameraBound(None))
        }
        other => panic!("expected a pass error, got {other:?}"),
    }

    compositor.set_camera(handle, None, viewer()).unwrap();
    assert!(compositor.tick(handle).unwrap().is_clean());
}

#[test]
fn test_workspace_lifecycle() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(deferred_store(), device.clone(), CompositorConfig::default());
    let handle = compositor
        .instantiate_workspace("Deferred", Some(output(1000)), cameras())
        .unwrap();
    let state = |c: &Compositor| c.workspace(handle).map(|w| w.state());

    assert_eq!(state(&compositor), Some(WorkspaceState::Instantiated));
    compositor.tick(handle).unwrap();
    assert_eq!(state(&compositor), Some(WorkspaceState::Active));

    compositor.set_enabled(handle, false).unwrap();
    assert_eq!(state(&compositor), Some(WorkspaceState::Suspended));
    compositor.tick(handle).unwrap();
    assert_eq!(device.submission_count(), 1);

    compositor.set_enabled(handle, true).unwrap();
    compositor.tick(handle).unwrap();
    assert_eq!(device.submission_count(), 2);

    compositor.teardown_workspace(handle).unwrap();
    assert_eq!(state(&compositor), None);
    assert_eq!(
        compositor.teardown_workspace(handle),
        Err(CompositorError::State(StateError::StaleHandle))
    );
}

#[test]
fn test_dropping_compositor_releases_textures() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        shadowed_store(ReusePolicy::Reuse),
        device.clone(),
        CompositorConfig::default(),
    );
    compositor
        .instantiate_workspace("Forward", Some(output(1000)), cameras())
        .unwrap();
    compositor
        .instantiate_workspace("Forward", Some(output(2000)), cameras())
        .unwrap();
    let pool = compositor.pool().clone();
    assert!(pool.lock().stats().in_use > 0);

    drop(compositor);
    assert_eq!(pool.lock().stats().in_use, 0);
}

#[test]
fn test_texture_budget_rejects_workspace() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut compositor = compositor(
        deferred_store(),
        device.clone(),
        CompositorConfig::default().with_texture_budget(1024),
    );
    assert!(matches!(
        compositor.instantiate_workspace("Deferred", Some(output(1000)), cameras()),
        Err(CompositorError::Allocation(_))
    ));
    assert_eq!(device.live_textures(), 0);
}
