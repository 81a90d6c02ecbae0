//! Shadow node definitions.
//!
//! A shadow node is a regular node whose targets render shadow maps. It is
//! never connected in a workspace; `render_scene` passes request it by name
//! and the frame executor decides each frame whether its passes must run
//! again (see [`ReusePolicy`](crate::definition::ReusePolicy)).

use glam::{Vec2, Vec3};

use crate::definition::NodeDefinition;
use crate::error::DefinitionError;

/// How the shadow camera for one map is fitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowTechnique {
    /// Light-space camera covering the whole view frustum
    Uniform,
    /// Light-space camera tightly fitted around the view frustum
    Focused,
    /// Parallel-split shadow maps; `split` on the map selects the slice
    Pssm {
        num_splits: usize,
        lambda: f32,
        split_padding: f32,
    },
    /// Camera fitted to a receiver plane
    PlaneOptimal { normal: Vec3, distance: f32 },
}

/// One shadow map produced by a shadow node
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowMapDefinition {
    /// Local texture of the shadow node that holds this map
    pub texture: String,
    /// Index into the list of closest shadow-casting lights
    pub light: usize,
    /// PSSM slice rendered into this map
    pub split: usize,
    pub technique: ShadowTechnique,
    /// Region of `texture` used when several maps share an atlas
    pub uv_offset: Vec2,
    pub uv_length: Vec2,
}

impl ShadowMapDefinition {
    pub fn new(texture: impl Into<String>, light: usize, technique: ShadowTechnique) -> Self {
        Self {
            texture: texture.into(),
            light,
            split: 0,
            technique,
            uv_offset: Vec2::ZERO,
            uv_length: Vec2::ONE,
        }
    }

    pub fn with_split(mut self, split: usize) -> Self {
        self.split = split;
        self
    }

    pub fn with_atlas_region(mut self, uv_offset: Vec2, uv_length: Vec2) -> Self {
        self.uv_offset = uv_offset;
        self.uv_length = uv_length;
        self
    }
}

/// A node producing shadow maps for the closest `num_lights` casters
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowNodeDefinition {
    pub node: NodeDefinition,
    pub num_lights: usize,
    pub shadow_maps: Vec<ShadowMapDefinition>,
}

impl ShadowNodeDefinition {
    pub fn new(node: NodeDefinition, num_lights: usize) -> Self {
        Self {
            node,
            num_lights,
            shadow_maps: Vec::new(),
        }
    }

    pub fn with_shadow_map(mut self, map: ShadowMapDefinition) -> Self {
        self.shadow_maps.push(map);
        self
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        self.node.validate()?;

        let invalid = |reason: String| DefinitionError::Invalid {
            name: self.node.name.clone(),
            reason,
        };

        if !self.node.inputs.is_empty() {
            return Err(invalid("shadow nodes cannot have input channels".into()));
        }

        for (index, map) in self.shadow_maps.iter().enumerate() {
            if self.node.texture(&map.texture).is_none() {
                return Err(DefinitionError::UnknownReference {
                    name: map.texture.clone(),
                    context: format!("shadow map #{index} of '{}'", self.node.name),
                });
            }
            if map.light >= self.num_lights {
                return Err(invalid(format!(
                    "shadow map #{index} uses light {} but the node only tracks {} light(s)",
                    map.light, self.num_lights
                )));
            }
            if let ShadowTechnique::Pssm { num_splits, .. } = map.technique {
                if num_splits == 0 || map.split >= num_splits {
                    return Err(invalid(format!(
                        "shadow map #{index} uses split {} of {num_splits}",
                        map.split
                    )));
                }
            }
        }

        for target in &self.node.targets {
            for pass in &target.passes {
                if let crate::definition::PassOp::RenderScene(scene) = &pass.op {
                    if scene.shadows.is_some() {
                        return Err(invalid("shadow nodes cannot request shadow nodes".into()));
                    }
                    if let Some(map) = scene.shadow_map {
                        if map >= self.shadow_maps.len() {
                            return Err(invalid(format!(
                                "render_scene pass uses shadow map #{map} which is not declared"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
