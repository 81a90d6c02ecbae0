//! Node and target definitions

use std::collections::HashSet;

use crate::definition::{PassDefinition, TextureDeclaration, TextureRef};
use crate::error::DefinitionError;
use crate::types::TextureFormat;

/// Named input slot of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChannel {
    pub name: String,
    /// When set, the connected texture must have exactly this format
    pub format: Option<TextureFormat>,
}

/// Named output slot of a node, exposing one of its textures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChannel {
    pub name: String,
    pub texture: TextureRef,
}

/// One render target within a node and the passes that draw into it
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDefinition {
    pub texture: TextureRef,
    pub passes: Vec<PassDefinition>,
}

impl TargetDefinition {
    pub fn new(texture: TextureRef) -> Self {
        Self {
            texture,
            passes: Vec::new(),
        }
    }

    pub fn with_pass(mut self, pass: PassDefinition) -> Self {
        self.passes.push(pass);
        self
    }
}

/// A reusable rendering unit.
///
/// Nodes are immutable once registered and shared by every workspace that
/// references them.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDefinition {
    pub name: String,
    pub inputs: Vec<InputChannel>,
    pub outputs: Vec<OutputChannel>,
    pub textures: Vec<TextureDeclaration>,
    pub targets: Vec<TargetDefinition>,
}

impl NodeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            textures: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputChannel {
            name: name.into(),
            format: None,
        });
        self
    }

    pub fn with_typed_input(mut self, name: impl Into<String>, format: TextureFormat) -> Self {
        self.inputs.push(InputChannel {
            name: name.into(),
            format: Some(format),
        });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, texture: TextureRef) -> Self {
        self.outputs.push(OutputChannel {
            name: name.into(),
            texture,
        });
        self
    }

    pub fn with_texture(mut self, declaration: TextureDeclaration) -> Self {
        self.textures.push(declaration);
        self
    }

    pub fn with_target(mut self, target: TargetDefinition) -> Self {
        self.targets.push(target);
        self
    }

    pub fn input(&self, name: &str) -> Option<&InputChannel> {
        self.inputs.iter().find(|c| c.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputChannel> {
        self.outputs.iter().find(|c| c.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureDeclaration> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn pass_count(&self) -> usize {
        self.targets.iter().map(|t| t.passes.len()).sum()
    }

    /// Every texture reference made by the node's targets, passes and outputs.
    pub fn texture_refs(&self) -> impl Iterator<Item = &TextureRef> + '_ {
        self.targets
            .iter()
            .flat_map(|target| {
                std::iter::once(&target.texture).chain(target.passes.iter().flat_map(|pass| {
                    pass.reads()
                        .into_iter()
                        .chain(pass.uav_writes())
                        .collect::<Vec<_>>()
                }))
            })
            .chain(self.outputs.iter().map(|o| &o.texture))
    }

    /// Globals this node writes, either as a render target or through a UAV.
    pub fn global_writes(&self) -> HashSet<&str> {
        let mut writes = HashSet::new();
        for target in &self.targets {
            for pass in &target.passes {
                if pass.writes_target() {
                    if let TextureRef::Global(name) = &target.texture {
                        writes.insert(name.as_str());
                    }
                }
                for uav in pass.uav_writes() {
                    if let TextureRef::Global(name) = uav {
                        writes.insert(name.as_str());
                    }
                }
            }
        }
        writes
    }

    /// Globals this node reads.
    pub fn global_reads(&self) -> HashSet<&str> {
        let mut reads = HashSet::new();
        for target in &self.targets {
            for pass in &target.passes {
                for texture in pass.reads() {
                    if let TextureRef::Global(name) = texture {
                        reads.insert(name.as_str());
                    }
                }
            }
        }
        reads
    }

    /// Check internal consistency: unique names and resolvable local references.
    ///
    /// Global references are checked when a workspace is compiled.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let context = format!("node '{}'", self.name);

        let mut seen = HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.name.as_str()) {
                return Err(DefinitionError::Invalid {
                    name: self.name.clone(),
                    reason: format!("duplicate input channel '{}'", input.name),
                });
            }
        }
        seen.clear();
        for output in &self.outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(DefinitionError::Invalid {
                    name: self.name.clone(),
                    reason: format!("duplicate output channel '{}'", output.name),
                });
            }
        }
        seen.clear();
        for texture in &self.textures {
            if !seen.insert(texture.name.as_str()) {
                return Err(DefinitionError::Invalid {
                    name: self.name.clone(),
                    reason: format!("duplicate texture '{}'", texture.name),
                });
            }
            if texture.sample_count == 0 || !texture.sample_count.is_power_of_two() {
                return Err(DefinitionError::Invalid {
                    name: self.name.clone(),
                    reason: format!(
                        "texture '{}' has invalid sample count {}",
                        texture.name, texture.sample_count
                    ),
                });
            }
        }

        for texture in self.texture_refs() {
            let known = match texture {
                TextureRef::Input(name) => self.input(name).is_some(),
                TextureRef::Local(name) => self.texture(name).is_some(),
                TextureRef::Global(_) => true,
            };
            if !known {
                return Err(DefinitionError::UnknownReference {
                    name: texture.to_string(),
                    context,
                });
            }
        }

        Ok(())
    }
}
